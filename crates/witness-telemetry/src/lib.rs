//! Witness Telemetry - Logging and metrics for the Witness audit SDK.
//!
//! This crate provides:
//! - Configurable logging setup with multiple formats and targets
//! - An internally-synchronized metrics registry (counters, gauges,
//!   latency histograms) exposed through the SDK handle
//!
//! # Example
//!
//! ```rust,no_run
//! use witness_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), witness_telemetry::TelemetryError> {
//! let config = LogConfig::new("info").with_format(LogFormat::Compact);
//! setup_logging(&config)?;
//! tracing::info!("audit pipeline starting");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod logging;
mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{setup_default_logging, setup_logging, LogConfig, LogFormat, LogTarget};
pub use metrics::{HistogramSnapshot, MetricsRegistry, MetricsSnapshot};
