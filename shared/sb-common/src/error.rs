//! Common error type.

use thiserror::Error;

/// Errors raised while encoding or decoding protocol frames.
#[derive(Debug, Error)]
pub enum Error {
    /// Frame was not valid JSON or named an unknown event type.
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Frame decoded but carried an unusable payload.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// Result alias for common operations.
pub type Result<T> = std::result::Result<T, Error>;
