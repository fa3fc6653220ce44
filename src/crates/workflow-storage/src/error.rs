//! Error types for the storage port

use thiserror::Error;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur against the [`StoragePort`](crate::StoragePort)
#[derive(Error, Debug)]
pub enum StorageError {
    /// No snapshot/event/result exists for the given key
    #[error("not found: {0}")]
    NotFound(String),

    /// `put_snapshot` was called with a version that already exists
    #[error("snapshot already exists for execution {execution_id} at version {version}")]
    VersionConflict { execution_id: String, version: u64 },

    /// JSON (de)serialization of a stored blob failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The caller does not hold a valid lease for the execution
    #[error("lease lost or not held for execution {0}")]
    LeaseLost(String),

    /// `delete_execution` was called while a lease was held
    #[error("cannot delete execution {0}: an active lease is held")]
    LeaseHeld(String),

    /// Backend-specific failure (I/O, connection, etc.)
    #[error("storage backend error: {0}")]
    Backend(String),
}
