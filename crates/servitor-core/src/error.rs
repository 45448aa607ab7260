//! Error taxonomy for servitor-core.

use servitor_state::StorageError;

/// Servitor errors.
#[derive(Debug, thiserror::Error)]
pub enum ServitorError {
    #[error("tokenizer error: {0}")]
    Tokenize(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for servitor-core operations.
pub type Result<T> = std::result::Result<T, ServitorError>;
