//! Driver for the basilisk HTTP API.
//!
//! Routes are resolved against the base endpoint:
//!
//! | route      | method | body                 | response                           |
//! |------------|--------|----------------------|------------------------------------|
//! | `ping`     | GET    |                      | `pong`                             |
//! | `config`   | GET    |                      | inference defaults                 |
//! | `tokenize` | POST   | `{prompt}`           | `{tokens, fragments}`              |
//! | `infer`    | POST   | inference arguments  | `{text, tokens, stop_reason?, ..}` |
//! | `embed`    | POST   | `{prompt}`           | `{embedding, model, dimensions}`   |

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use servitor_core::{
    BackendConfig, EmbeddingDriver, InferenceArguments, InferenceDriver, InferenceResult,
    ServitorError, Tokenizer,
};

use crate::error::Result;
use crate::http::HttpBackend;

#[derive(Debug, Serialize)]
struct PromptRequest<'a> {
    prompt: &'a str,
}

/// Response of the `tokenize` route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenizeResult {
    pub tokens: Vec<u32>,
    /// String form of each token.
    #[serde(default)]
    pub fragments: Vec<String>,
}

/// Response of the `embed` route.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EmbedResult {
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub dimensions: usize,
}

/// Driver for one basilisk server.
pub struct BasiliskDriver {
    http: HttpBackend,
    dimensions: OnceLock<usize>,
}

impl BasiliskDriver {
    /// Build a driver for `endpoint`; `secret` is sent verbatim as the
    /// `Authorization` header.
    pub fn new(endpoint: &str, secret: Option<String>, timeout: Duration) -> Result<Self> {
        let secret = secret.filter(|s| !s.is_empty());
        Ok(Self {
            http: HttpBackend::new(endpoint, secret, timeout)?,
            dimensions: OnceLock::new(),
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        Self::new(
            config.endpoint(),
            config.secret.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn endpoint(&self) -> &str {
        self.http.endpoint()
    }

    /// Tokenize `text`, keeping the string fragments.
    #[instrument(skip(self, text), fields(chars = text.len()))]
    pub async fn tokenize_detailed(&self, text: &str) -> Result<TokenizeResult> {
        self.http
            .post("tokenize", &PromptRequest { prompt: text })
            .await
    }

    /// Embed `text`, keeping the model metadata.
    #[instrument(skip(self, text), fields(chars = text.len()))]
    pub async fn embed_detailed(&self, text: &str) -> Result<EmbedResult> {
        let result: EmbedResult = self
            .http
            .post("embed", &PromptRequest { prompt: text })
            .await?;
        let dimensions = if result.dimensions > 0 {
            result.dimensions
        } else {
            result.embedding.len()
        };
        if self.dimensions.set(dimensions).is_ok() {
            debug!(model = %result.model, dimensions, "embedding model detected");
        }
        Ok(result)
    }
}

#[async_trait]
impl Tokenizer for BasiliskDriver {
    async fn tokenize(&self, text: &str) -> servitor_core::Result<Vec<u32>> {
        self.tokenize_detailed(text)
            .await
            .map(|r| r.tokens)
            .map_err(|e| ServitorError::Tokenize(e.to_string()))
    }
}

#[async_trait]
impl InferenceDriver for BasiliskDriver {
    #[instrument(skip(self), fields(endpoint = %self.endpoint()))]
    async fn ping(&self) -> bool {
        self.http.answers("ping", Some("pong")).await
    }

    #[instrument(skip(self))]
    async fn defaults(&self) -> servitor_core::Result<InferenceArguments> {
        Ok(self.http.get("config").await?)
    }

    #[instrument(skip(self, args), fields(max_new_tokens = ?args.max_new_tokens))]
    async fn infer(&self, args: &InferenceArguments) -> servitor_core::Result<InferenceResult> {
        let result: InferenceResult = self.http.post("infer", args).await?;
        debug!(
            tokens = result.tokens.len(),
            stop_reason = result.stop_reason.as_str(),
            "inference complete"
        );
        Ok(result)
    }
}

#[async_trait]
impl EmbeddingDriver for BasiliskDriver {
    async fn embed(&self, text: &str) -> servitor_core::Result<Vec<f32>> {
        self.embed_detailed(text)
            .await
            .map(|r| r.embedding)
            .map_err(|e| ServitorError::Embedding(e.to_string()))
    }

    async fn dimensions(&self) -> servitor_core::Result<Option<usize>> {
        Ok(self.dimensions.get().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_secret_is_dropped() {
        let config = BackendConfig {
            secret: Some(String::new()),
            ..Default::default()
        };
        let driver = BasiliskDriver::from_config(&config).unwrap();
        assert!(!driver.http.has_authorization());
        assert_eq!(driver.endpoint(), servitor_core::DEFAULT_ENDPOINT);
    }
}
