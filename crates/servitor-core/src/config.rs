//! TOML configuration for a Servitor deployment.
//!
//! ```toml
//! [agent]
//! name = "servo"
//!
//! [formatter]
//! internal_monologue = true
//!
//! [bridge]
//! baseprompt = "{char} is a helpful robot. {extra}"
//! timezone = "UTC"
//!
//! [bridge.args]
//! temperature = 0.7
//!
//! [vector]
//! recall_limit = 2
//!
//! [backend]
//! kind = "basilisk"
//! endpoint = "http://127.0.0.1:5000/basilisk/"
//! ```
//!
//! Every section and key is optional.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bridge::BridgeConfig;
use crate::character::AgentDescriptor;
use crate::error::{Result, ServitorError};
use crate::format::FormatterOptions;
use crate::memory::VectorMemoryConfig;

/// Default basilisk endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:5000/basilisk/";

/// Which HTTP API the backend speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Basilisk,
    /// text-generation-webui legacy API.
    Textgen,
    /// OpenAI-compatible completions and embeddings.
    #[serde(alias = "openai")]
    OpenAi,
}

impl BackendKind {
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            BackendKind::Basilisk => DEFAULT_ENDPOINT,
            BackendKind::Textgen => "http://127.0.0.1:5000/api/v1/",
            BackendKind::OpenAi => "http://127.0.0.1:8000/v1/",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Falls back to the default endpoint of `kind`.
    pub endpoint: Option<String>,
    /// Basilisk sends it verbatim as `Authorization`; OpenAI as a bearer token.
    pub secret: Option<String>,
    /// Completion model, required by `open_ai`.
    pub inference_model: Option<String>,
    /// Embedding model, required by `open_ai`.
    pub embedding_model: Option<String>,
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            endpoint: None,
            secret: None,
            inference_model: None,
            embedding_model: None,
            timeout_secs: 120,
        }
    }
}

impl BackendConfig {
    pub fn endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .unwrap_or_else(|| self.kind.default_endpoint())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServitorConfig {
    pub agent: AgentDescriptor,
    pub formatter: FormatterOptions,
    pub bridge: BridgeConfig,
    pub vector: VectorMemoryConfig,
    pub backend: BackendConfig,
}

impl ServitorConfig {
    /// Read and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading config");
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ServitorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Override backend settings from `SERVITOR_ENDPOINT` / `SERVITOR_SECRET`.
    pub fn apply_env(self) -> Self {
        self.with_backend_overrides(
            std::env::var("SERVITOR_ENDPOINT").ok(),
            std::env::var("SERVITOR_SECRET").ok(),
        )
    }

    fn with_backend_overrides(mut self, endpoint: Option<String>, secret: Option<String>) -> Self {
        if let Some(endpoint) = endpoint.filter(|e| !e.is_empty()) {
            self.backend.endpoint = Some(endpoint);
        }
        if let Some(secret) = secret.filter(|s| !s.is_empty()) {
            self.backend.secret = Some(secret);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.bridge.hard_limit == 0 {
            return Err(ServitorError::Config("bridge.hard_limit must be positive".into()));
        }
        if self.bridge.window_limit == 0 {
            return Err(ServitorError::Config("bridge.window_limit must be positive".into()));
        }
        if self.vector.window_view > self.vector.window_size {
            return Err(ServitorError::Config(format!(
                "vector.window_view ({}) exceeds vector.window_size ({})",
                self.vector.window_view, self.vector.window_size
            )));
        }
        if self.agent.name.trim().is_empty() {
            return Err(ServitorError::Config("agent.name must not be empty".into()));
        }
        if self.backend.timeout_secs == 0 {
            return Err(ServitorError::Config("backend.timeout_secs must be positive".into()));
        }
        if self.backend.kind == BackendKind::OpenAi
            && (self.backend.inference_model.is_none() || self.backend.embedding_model.is_none())
        {
            return Err(ServitorError::Config(
                "open_ai backend needs inference_model and embedding_model".into(),
            ));
        }
        Ok(())
    }
}
