//! Picks and builds the driver named by `backend.kind`.

use std::sync::Arc;

use servitor_core::{BackendConfig, BackendKind, EmbeddingDriver, InferenceDriver};

use crate::basilisk::BasiliskDriver;
use crate::error::Result;
use crate::openai::OpenAiDriver;
use crate::textgen::TextgenDriver;

/// A configured backend driver.
#[derive(Clone)]
pub enum Backend {
    Basilisk(Arc<BasiliskDriver>),
    Textgen(Arc<TextgenDriver>),
    OpenAi(Arc<OpenAiDriver>),
}

impl Backend {
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        Ok(match config.kind {
            BackendKind::Basilisk => {
                Backend::Basilisk(Arc::new(BasiliskDriver::from_config(config)?))
            }
            BackendKind::Textgen => {
                Backend::Textgen(Arc::new(TextgenDriver::from_config(config)?))
            }
            BackendKind::OpenAi => Backend::OpenAi(Arc::new(OpenAiDriver::from_config(config)?)),
        })
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Basilisk(_) => BackendKind::Basilisk,
            Backend::Textgen(_) => BackendKind::Textgen,
            Backend::OpenAi(_) => BackendKind::OpenAi,
        }
    }

    pub fn endpoint(&self) -> &str {
        match self {
            Backend::Basilisk(d) => d.endpoint(),
            Backend::Textgen(d) => d.endpoint(),
            Backend::OpenAi(d) => d.endpoint(),
        }
    }

    pub fn inference(&self) -> Arc<dyn InferenceDriver> {
        match self {
            Backend::Basilisk(d) => d.clone(),
            Backend::Textgen(d) => d.clone(),
            Backend::OpenAi(d) => d.clone(),
        }
    }

    /// The embedding side, if the backend has one. text-generation-webui
    /// does not embed.
    pub fn embedding(&self) -> Option<Arc<dyn EmbeddingDriver>> {
        match self {
            Backend::Basilisk(d) => Some(d.clone()),
            Backend::Textgen(_) => None,
            Backend::OpenAi(d) => Some(d.clone()),
        }
    }
}
