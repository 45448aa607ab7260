//! Driver for OpenAI-compatible completion servers (vLLM, llama.cpp server,
//! LocalAI and friends).
//!
//! | route         | method | body                         | response                      |
//! |---------------|--------|------------------------------|-------------------------------|
//! | `models`      | GET    |                              | model list                    |
//! | `completions` | POST   | `{model, prompt, ..}`        | `{choices: [{text}], usage}`  |
//! | `embeddings`  | POST   | `{model, input}`             | `{data: [{embedding}]}`       |
//!
//! The API exposes no tokenizer. `tokenize` estimates one token per four
//! bytes of text, which is close enough for budgeting but carries no ids.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use servitor_core::{
    BackendConfig, EmbeddingDriver, InferenceArguments, InferenceDriver, InferenceResult,
    ServitorError, StopReason, Tokenizer,
};

use crate::error::{DriverError, Result};
use crate::http::HttpBackend;

const BYTES_PER_TOKEN: usize = 4;

/// Strip the control-character sequence markers; these servers take plain text.
pub fn strip_special(prompt: &str) -> String {
    prompt.replace(['\u{2}', '\u{3}'], "")
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    text: String,
    #[serde(default)]
    finish_reason: Option<StopReason>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionUsage {
    #[serde(default)]
    completion_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: CompletionUsage,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

/// Driver for one OpenAI-compatible server.
pub struct OpenAiDriver {
    http: HttpBackend,
    inference_model: String,
    embedding_model: String,
    dimensions: OnceCell<usize>,
}

impl OpenAiDriver {
    /// `secret`, when set, is sent as a bearer token.
    pub fn new(
        endpoint: &str,
        secret: Option<String>,
        inference_model: impl Into<String>,
        embedding_model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let authorization = secret
            .filter(|s| !s.is_empty())
            .map(|s| format!("Bearer {s}"));
        Ok(Self {
            http: HttpBackend::new(endpoint, authorization, timeout)?,
            inference_model: inference_model.into(),
            embedding_model: embedding_model.into(),
            dimensions: OnceCell::new(),
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let inference_model = config
            .inference_model
            .clone()
            .ok_or(DriverError::MissingSetting("backend.inference_model"))?;
        let embedding_model = config
            .embedding_model
            .clone()
            .ok_or(DriverError::MissingSetting("backend.embedding_model"))?;
        Self::new(
            config.endpoint(),
            config.secret.clone(),
            inference_model,
            embedding_model,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn endpoint(&self) -> &str {
        self.http.endpoint()
    }

    fn completion_request(&self, args: &InferenceArguments) -> CompletionRequest<'_> {
        let merged = args.clone().or(&InferenceArguments::recommended());
        CompletionRequest {
            model: &self.inference_model,
            prompt: strip_special(merged.prompt.as_deref().unwrap_or("")),
            temperature: merged.temperature,
            top_p: merged.top_p,
            frequency_penalty: merged.token_repetition_penalty_max,
            max_tokens: merged.max_new_tokens,
            stop: merged.stopping_strings,
        }
    }

    #[instrument(skip(self, text), fields(chars = text.len(), model = %self.embedding_model))]
    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let response: EmbeddingResponse = self
            .http
            .post(
                "embeddings",
                &EmbeddingRequest {
                    model: &self.embedding_model,
                    input: text,
                },
            )
            .await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or(DriverError::EmptyResponse {
                route: "embeddings",
            })
    }
}

#[async_trait]
impl Tokenizer for OpenAiDriver {
    async fn tokenize(&self, text: &str) -> servitor_core::Result<Vec<u32>> {
        Ok(vec![0; text.len().div_ceil(BYTES_PER_TOKEN)])
    }
}

#[async_trait]
impl InferenceDriver for OpenAiDriver {
    #[instrument(skip(self), fields(endpoint = %self.endpoint()))]
    async fn ping(&self) -> bool {
        self.http.answers("models", None).await
    }

    async fn defaults(&self) -> servitor_core::Result<InferenceArguments> {
        Ok(InferenceArguments::recommended())
    }

    #[instrument(skip(self, args), fields(model = %self.inference_model))]
    async fn infer(&self, args: &InferenceArguments) -> servitor_core::Result<InferenceResult> {
        let request = self.completion_request(args);
        let response: CompletionResponse = self.http.post("completions", &request).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(DriverError::EmptyResponse {
                route: "completions",
            })?;

        let stop_reason = choice.finish_reason.unwrap_or_default();
        debug!(
            tokens = response.usage.completion_tokens,
            stop_reason = stop_reason.as_str(),
            "inference complete"
        );
        Ok(InferenceResult {
            text: choice.text,
            tokens: vec![0; response.usage.completion_tokens],
            stop_reason,
            fragments: None,
        })
    }
}

#[async_trait]
impl EmbeddingDriver for OpenAiDriver {
    async fn embed(&self, text: &str) -> servitor_core::Result<Vec<f32>> {
        let embedding = self
            .request_embedding(text)
            .await
            .map_err(|e| ServitorError::Embedding(e.to_string()))?;
        let _ = self.dimensions.set(embedding.len());
        Ok(embedding)
    }

    /// Embeds a short sample on first use to learn the model's width.
    async fn dimensions(&self) -> servitor_core::Result<Option<usize>> {
        let dimensions = self
            .dimensions
            .get_or_try_init(|| async {
                self.request_embedding("test").await.map(|e| e.len())
            })
            .await
            .map_err(|e| ServitorError::Embedding(e.to_string()))?;
        Ok(Some(*dimensions))
    }
}
