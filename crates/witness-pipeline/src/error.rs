//! Pipeline error types.

use thiserror::Error;
use witness_store::StoreError;

use crate::transport::TransportError;

/// Errors surfaced by the audit pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Enqueue refused because shutdown has begun.
    #[error("audit pipeline is shutting down")]
    Shutdown,

    /// Enqueue refused because the outbox is saturated.
    #[error("audit outbox backpressure: {bytes} bytes on disk")]
    Backpressure {
        /// Outbox size in bytes.
        bytes: u64,
    },

    /// The journal failed.
    #[error(transparent)]
    Store(StoreError),

    /// Delivery failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Envelope encryption or keyring failure.
    #[error(transparent)]
    Crypto(#[from] witness_crypto::CryptoError),

    /// The record could not be canonically encoded.
    #[error(transparent)]
    Encoding(#[from] witness_core::CanonicalError),

    /// The shutdown drain did not complete before its deadline.
    #[error("drain incomplete: {remaining} records still pending")]
    DrainIncomplete {
        /// Records left in the outbox.
        remaining: usize,
    },
}

impl PipelineError {
    /// Whether retrying the operation could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Crypto(e) => e.is_retryable(),
            // Disk trouble is usually transient (ENOSPC clearing, etc.).
            Self::Store(_) => true,
            Self::Shutdown
            | Self::Backpressure { .. }
            | Self::Encoding(_)
            | Self::DrainIncomplete { .. } => false,
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Shutdown => Self::Shutdown,
            StoreError::Backpressure { bytes } => Self::Backpressure { bytes },
            other => Self::Store(other),
        }
    }
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
