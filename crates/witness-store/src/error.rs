//! Store error types.

use thiserror::Error;

/// Errors from outbox operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Append refused because shutdown has begun.
    #[error("outbox is shut down")]
    Shutdown,

    /// Append refused because the outbox file is saturated.
    #[error("outbox backpressure: {bytes} bytes on disk")]
    Backpressure {
        /// Current file size in bytes.
        bytes: u64,
    },

    /// Filesystem failure.
    #[error("outbox I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be serialized to a journal line.
    #[error("record serialization failed: {0}")]
    Serialization(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
