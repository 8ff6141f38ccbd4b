//! Telemetry error types.

use thiserror::Error;

/// Errors from telemetry setup.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Logging could not be initialized (usually: already initialized).
    #[error("failed to initialize logging: {0}")]
    InitError(String),

    /// The logging configuration is invalid.
    #[error("invalid logging configuration: {0}")]
    ConfigError(String),
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
