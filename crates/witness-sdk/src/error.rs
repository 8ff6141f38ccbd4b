//! SDK initialization errors.

use thiserror::Error;

/// Errors fatal at [`AuditClient::init`](crate::AuditClient::init).
#[derive(Debug, Error)]
pub enum InitError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] witness_config::ConfigError),

    /// The outbox could not be opened.
    #[error(transparent)]
    Store(#[from] witness_store::StoreError),

    /// The ingest transport could not be built.
    #[error(transparent)]
    Transport(#[from] witness_pipeline::TransportError),

    /// The key service client could not be built.
    #[error(transparent)]
    Kms(#[from] witness_crypto::KmsError),
}

/// Result type for initialization.
pub type InitResult<T> = Result<T, InitError>;
