//! Error types for protocol decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding wire data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The input was not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field was absent or blank.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// The JSON was well-formed but had an unexpected shape.
    #[error("invalid structure: {0}")]
    InvalidStructure(String),

    /// A push message carried a type this client does not handle.
    #[error("unknown event type `{0}`")]
    UnknownEventType(String),
}

impl ProtocolError {
    /// Creates an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure(message.into())
    }
}
