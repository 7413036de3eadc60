//! Error types for snapshot storage

use thiserror::Error;

/// Result type for snapshot operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur while storing or loading snapshots
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// No snapshot with the requested identity
    #[error("Snapshot not found: {0}")]
    NotFound(String),

    /// JSON encoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binary encoding failure
    #[error("Binary serialization error: {0}")]
    BinarySerialization(#[from] bincode::Error),

    /// Backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Snapshot payload or key is malformed
    #[error("Invalid snapshot: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
