//! Error types for the sync module.

use thiserror::Error;

/// Errors reported by a remote query or batch executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote answered with a non-success status.
    #[error("remote returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The response could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The gate rejected the acquisition. Nothing was read or written.
    #[error("locked: another synchronization or local operation is in progress")]
    Locked,

    /// Empty or otherwise unusable bucket name.
    #[error("invalid bucket name: {0:?}")]
    InvalidBucket(String),

    /// The bucket has no sync scope.
    #[error("sync scope not configured for bucket {0}")]
    ScopeNotConfigured(String),

    /// A conflict resolver returned neither of its arguments.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Remote query or batch failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] offsync_store::StoreError),

    /// A spawned page-apply task panicked or was cancelled.
    #[error("apply task failed: {0}")]
    TaskFailed(String),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
