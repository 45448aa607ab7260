//! Errors raised by the HTTP drivers.

use servitor_core::ServitorError;

/// Driver errors.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{route} failed with status {status}: {body}")]
    Status {
        route: &'static str,
        status: u16,
        body: String,
    },

    #[error("could not decode {route} response: {source}")]
    Decode {
        route: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{route} response carried no results")]
    EmptyResponse { route: &'static str },

    #[error("missing setting: {0}")]
    MissingSetting(&'static str),
}

impl DriverError {
    /// Status code of a rejected request.
    pub fn status(&self) -> Option<u16> {
        match self {
            DriverError::Status { status, .. } => Some(*status),
            DriverError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Failures surface as inference errors unless the caller maps them first.
impl From<DriverError> for ServitorError {
    fn from(err: DriverError) -> Self {
        ServitorError::Inference(err.to_string())
    }
}

/// Result type for driver requests.
pub type Result<T> = std::result::Result<T, DriverError>;
