//! Configuration error types.

use thiserror::Error;

/// Errors from configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field is missing or empty.
    #[error("missing required config field: {field}")]
    MissingField {
        /// Dotted field path.
        field: String,
    },

    /// A field value is out of range or malformed.
    #[error("invalid config value for {field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
