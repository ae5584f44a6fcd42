//! Error types for replica coordination.

use entivc_core::CoreError;
use entivc_storage::AdapterError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during replica coordination.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A core engine operation failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A storage adapter call failed.
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// The project is not loaded on this replica.
    #[error("project not loaded: {project_id}")]
    ProjectNotLoaded {
        /// The requested project id.
        project_id: String,
    },

    /// The broadcast channel was closed.
    #[error("channel closed: {name}")]
    ChannelClosed {
        /// The channel name.
        name: String,
    },
}
