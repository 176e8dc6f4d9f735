//! Error types for offsync core.

use thiserror::Error;

/// Errors raised while building or decoding core values.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
