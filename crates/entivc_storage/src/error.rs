//! Error types for storage adapters.

use std::io;
use thiserror::Error;

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Errors that can occur in a storage adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization of persisted state failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The adapter has been closed.
    #[error("adapter is closed")]
    Closed,

    /// Persisted state failed validation on load.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The adapter rejected an update.
    #[error("update rejected: {0}")]
    Rejected(String),

    /// A remote service call failed.
    #[error("remote service error: {0}")]
    Remote(String),

    /// A media item was not found.
    #[error("media item not found: id {id}, hash {content_hash}")]
    MediaNotFound {
        /// The requested media id.
        id: String,
        /// The requested content hash.
        content_hash: String,
    },
}

impl AdapterError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Creates a rejection error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// Creates a remote-service error.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }
}
