//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Payload, ACL or scope serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Object not found.
    #[error("object not found: {bucket}/{id}")]
    NotFound { bucket: String, id: String },

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),
}

impl From<offsync_core::CoreError> for StoreError {
    fn from(e: offsync_core::CoreError) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
