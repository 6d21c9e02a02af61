//! Error types for the local mirror.

use mirrorsync_protocol::EntityId;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while reading or writing the local mirror.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] mirrorsync_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A journal batch could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The journal is damaged before its final record.
    #[error("journal corruption at offset {offset}: {message}")]
    JournalCorruption {
        /// Offset of the damaged record.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch on a record that is followed by further data.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the record.
        offset: u64,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// The store directory is missing or not usable.
    #[error("invalid store: {message}")]
    InvalidStore {
        /// Description of the problem.
        message: String,
    },

    /// The entity does not exist locally.
    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid store error.
    pub fn invalid_store(message: impl Into<String>) -> Self {
        Self::InvalidStore {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
