//! Error types for the client.

use offsync_core::Permission;
use offsync_store::StoreError;
use offsync_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// A synchronization holds the gate. Nothing was read or written.
    #[error("locked: a synchronization is in progress")]
    Locked,

    /// Empty or otherwise unusable bucket name.
    #[error("invalid bucket name: {0:?}")]
    InvalidBucket(String),

    /// Object not cached, or deleted.
    #[error("object not found: {bucket}/{id}")]
    NotFound { bucket: String, id: String },

    /// The acting principal lacks a permission on the object.
    #[error("not authorized: {permission:?} on {bucket}/{id}")]
    NotAuthorized {
        bucket: String,
        id: String,
        permission: Permission,
    },
}

impl ClientError {
    /// Whether the operation was rejected by the gate and may be retried.
    pub fn is_locked(&self) -> bool {
        matches!(self, ClientError::Locked | ClientError::Sync(SyncError::Locked))
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
