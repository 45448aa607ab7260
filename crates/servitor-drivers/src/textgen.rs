//! Driver for the text-generation-webui legacy API (`/api/v1/`).
//!
//! | route         | method | body                | response                 |
//! |---------------|--------|---------------------|--------------------------|
//! | `model`       | GET    |                     | loaded model             |
//! | `token-count` | POST   | `{prompt}`          | token count              |
//! | `generate`    | POST   | generation settings | `{results: [{text}]}`    |
//!
//! The API reports token counts but not ids, so `tokenize` yields one
//! placeholder id per counted token. Lengths are exact; ids are not.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use servitor_core::{
    BackendConfig, InferenceArguments, InferenceDriver, InferenceResult, ServitorError,
    StopReason, Tokenizer,
};

use crate::error::{DriverError, Result};
use crate::http::HttpBackend;

const STX: char = '\u{2}';
const ETX: char = '\u{3}';

/// Rewrite control-character sequence markers into the webui's text form:
/// ETX becomes `</s>`, STX is dropped.
pub fn convert_special(prompt: &str) -> String {
    prompt.replace(ETX, "</s>").replace(STX, "")
}

#[derive(Debug, Serialize)]
struct PromptRequest<'a> {
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct CountedTokens {
    tokens: usize,
}

/// Older builds answer `{tokens}`, newer ones `{results: [{tokens}]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenCount {
    Flat(CountedTokens),
    Wrapped { results: Vec<CountedTokens> },
}

impl TokenCount {
    fn count(&self) -> Option<usize> {
        match self {
            TokenCount::Flat(c) => Some(c.tokens),
            TokenCount::Wrapped { results } => results.first().map(|c| c.tokens),
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    #[serde(flatten)]
    args: InferenceArguments,
    #[serde(skip_serializing_if = "Option::is_none")]
    repetition_penalty: Option<f32>,
    length_penalty: f32,
    typical_p: f32,
    do_sample: bool,
    early_stopping: bool,
    skip_special_tokens: bool,
}

#[derive(Debug, Deserialize)]
struct GeneratedText {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    results: Vec<GeneratedText>,
}

/// Driver for one text-generation-webui server.
pub struct TextgenDriver {
    http: HttpBackend,
}

impl TextgenDriver {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: HttpBackend::new(endpoint, None, timeout)?,
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        Self::new(config.endpoint(), Duration::from_secs(config.timeout_secs))
    }

    pub fn endpoint(&self) -> &str {
        self.http.endpoint()
    }

    /// Number of tokens in `text`.
    #[instrument(skip(self, text), fields(chars = text.len()))]
    pub async fn count_tokens(&self, text: &str) -> Result<usize> {
        let count: TokenCount = self
            .http
            .post("token-count", &PromptRequest { prompt: text })
            .await?;
        count.count().ok_or(DriverError::EmptyResponse {
            route: "token-count",
        })
    }

    /// The request sent to `generate`: `args` over the recommended
    /// defaults, plus the sampling switches the webui expects.
    fn generate_request(args: &InferenceArguments) -> GenerateRequest {
        let mut merged = args.clone().or(&InferenceArguments::recommended());
        merged.prompt = Some(convert_special(merged.prompt.as_deref().unwrap_or("")));
        let repetition_penalty = merged.token_repetition_penalty_max;

        GenerateRequest {
            args: merged,
            repetition_penalty,
            length_penalty: 0.0,
            typical_p: 1.0,
            do_sample: true,
            early_stopping: true,
            skip_special_tokens: true,
        }
    }
}

#[async_trait]
impl Tokenizer for TextgenDriver {
    async fn tokenize(&self, text: &str) -> servitor_core::Result<Vec<u32>> {
        self.count_tokens(text)
            .await
            .map(|n| vec![0; n])
            .map_err(|e| ServitorError::Tokenize(e.to_string()))
    }
}

#[async_trait]
impl InferenceDriver for TextgenDriver {
    #[instrument(skip(self), fields(endpoint = %self.endpoint()))]
    async fn ping(&self) -> bool {
        self.http.answers("model", None).await
    }

    async fn defaults(&self) -> servitor_core::Result<InferenceArguments> {
        Ok(InferenceArguments::recommended())
    }

    #[instrument(skip(self, args), fields(max_new_tokens = ?args.max_new_tokens))]
    async fn infer(&self, args: &InferenceArguments) -> servitor_core::Result<InferenceResult> {
        let request = Self::generate_request(args);
        let response: GenerateResponse = self.http.post("generate", &request).await?;
        let text = response
            .results
            .into_iter()
            .next()
            .map(|r| r.text)
            .ok_or(DriverError::EmptyResponse { route: "generate" })?;

        let tokens = self.tokenize(&text).await?;
        debug!(tokens = tokens.len(), "inference complete");
        Ok(InferenceResult {
            text,
            tokens,
            stop_reason: StopReason::Unknown,
            fragments: None,
        })
    }
}
