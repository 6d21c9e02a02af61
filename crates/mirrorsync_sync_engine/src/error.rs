//! Error types for the sync engine.

use mirrorsync_core::CoreError;
use mirrorsync_protocol::{ProtocolError, PushError, RemoteError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while syncing.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local store error.
    #[error("store error: {0}")]
    Core(#[from] CoreError),

    /// The remote API call failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// A message could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The push connection failed.
    #[error("push error: {0}")]
    Push(#[from] PushError),

    /// No credential is set on the context.
    #[error("no credential available")]
    NotAuthenticated,

    /// The pass was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// No tokio runtime is available to spawn background work.
    #[error("no tokio runtime available")]
    NoRuntime,
}

impl SyncError {
    /// Returns true if this error can be retried on a later pass.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(err) => err.is_transient(),
            SyncError::Push(_) => true,
            _ => false,
        }
    }
}
