//! Crypto-related error types.

use thiserror::Error;

use crate::kms::KmsError;

/// Errors that can occur during hashing, chaining, or envelope crypto.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The local development KEK is missing or malformed.
    #[error("invalid local keyring: {0}")]
    InvalidLocalKey(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encrypt(String),

    /// Decryption failed (bad key, tampered ciphertext, wrong context).
    #[error("decryption failed: {0}")]
    Decrypt(String),

    /// The key commitment in the frame does not match the unwrapped DEK.
    #[error("key commitment mismatch")]
    CommitmentMismatch,

    /// The ciphertext frame is structurally invalid.
    #[error("malformed ciphertext frame: {0}")]
    MalformedFrame(String),

    /// The algorithm suite is not supported by this build.
    #[error("unsupported cipher suite: {0}")]
    UnsupportedSuite(u32),

    /// No keyring can be built from the configuration.
    #[error("keyring unavailable: {0}")]
    KeyringUnavailable(String),

    /// A KMS operation failed.
    #[error(transparent)]
    Kms(#[from] KmsError),

    /// The payload could not be canonically encoded.
    #[error(transparent)]
    Encoding(#[from] witness_core::CanonicalError),
}

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

impl CryptoError {
    /// Whether retrying the operation could succeed (transient KMS trouble).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kms(e) => e.is_retryable(),
            _ => false,
        }
    }
}
