//! Backend error taxonomy.

use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ConfigurationError {
    pub message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors surfaced by a reasoning backend or the client in front of it.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SDKError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    /// Transport failure, rate limit or server-side error. Retryable.
    #[error("backend unavailable: {message}")]
    Unavailable {
        message: String,
        status: Option<u16>,
    },
    /// The backend answered with something that does not follow the protocol.
    #[error("backend protocol error: {0}")]
    Protocol(String),
    #[error("backend request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
}

impl SDKError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
            status: None,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}
