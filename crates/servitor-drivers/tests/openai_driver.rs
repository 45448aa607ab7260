//! OpenAI-compatible driver against a mock HTTP server.

use std::time::Duration;

use serde_json::json;
use servitor_core::{
    EmbeddingDriver, InferenceArguments, InferenceDriver, ServitorError, StopReason,
};
use servitor_drivers::OpenAiDriver;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn driver(server: &MockServer) -> OpenAiDriver {
    OpenAiDriver::new(
        &format!("{}/v1", server.uri()),
        Some("sk-local".into()),
        "servo-7b",
        "servo-embed",
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn ping_lists_models_with_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header("Authorization", "Bearer sk-local"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(1)
        .mount(&server)
        .await;

    assert!(driver(&server).ping().await);
}

#[tokio::test]
async fn infer_maps_arguments_onto_completions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/completions"))
        .and(header("Authorization", "Bearer sk-local"))
        .and(body_json(json!({
            "model": "servo-7b",
            "prompt": "ALICE: hi\n\nSERVO:",
            "temperature": 0.9f32,
            "top_p": 0.2f32,
            "frequency_penalty": 1.1f32,
            "max_tokens": 256,
            "stop": ["\nALICE"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"text": " hello there", "finish_reason": "length"}],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let args = InferenceArguments {
        prompt: Some("\u{2}ALICE: hi\u{3}\n\nSERVO:".into()),
        temperature: Some(0.9),
        stopping_strings: Some(vec!["\nALICE".into()]),
        ..Default::default()
    };
    let result = driver(&server).infer(&args).await.unwrap();

    assert_eq!(result.text, " hello there");
    assert_eq!(result.tokens, vec![0, 0, 0]);
    assert_eq!(result.stop_reason, StopReason::TokenLimit);
}

#[tokio::test]
async fn infer_without_choices_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let err = driver(&server)
        .infer(&InferenceArguments::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ServitorError::Inference(_)));
    assert!(err.to_string().contains("completions response carried no results"));
}

#[tokio::test]
async fn embed_reads_first_vector() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_json(json!({"model": "servo-embed", "input": "remember this"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"embedding": [0.5, 0.25], "index": 0}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let driver = driver(&server);
    assert_eq!(driver.embed("remember this").await.unwrap(), vec![0.5, 0.25]);
    assert_eq!(driver.dimensions().await.unwrap(), Some(2));
}

#[tokio::test]
async fn dimensions_embeds_sample_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_json(json!({"model": "servo-embed", "input": "test"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"embedding": [0.1, 0.2, 0.3]}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let driver = driver(&server);
    assert_eq!(driver.dimensions().await.unwrap(), Some(3));
    assert_eq!(driver.dimensions().await.unwrap(), Some(3));
}

#[tokio::test]
async fn embed_failure_maps_to_embedding_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let err = driver(&server).embed("x").await.unwrap_err();
    assert!(matches!(err, ServitorError::Embedding(_)));
    assert!(err.to_string().contains("slow down"));
}
