//! Witness SDK - Tamper-evident, encrypted audit logging for LLM calls.
//!
//! Witness wraps an application's LLM calls and, for each one, captures the
//! prompt and response, envelope-encrypts them under a customer master key,
//! links the record into a BLAKE3 hash chain, journals it to a crash-safe
//! outbox, and ships it to an ingest endpoint in idempotent batches with
//! at-least-once delivery and graceful drain on shutdown.
//!
//! # Example
//!
//! ```rust,no_run
//! use witness_sdk::{AuditClient, AuditConfig, CallMeta, ModelVendor};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = AuditClient::init(AuditConfig {
//!     data_dir: "/var/lib/myapp/witness".into(),
//!     tenant_id: "acme".into(),
//!     api_key: "wk-...".into(),
//!     ingest_url: "https://ingest.witness.example".into(),
//!     cmk_arn: "local-dev".into(),
//!     ..Default::default()
//! })
//! .await?;
//!
//! let ask = client.wrap_llm(
//!     CallMeta::new(ModelVendor::Anthropic, "claude-sonnet-4-20250514"),
//!     |prompt: String| async move {
//!         // call your LLM here
//!         Ok::<_, std::io::Error>(format!("echo: {prompt}"))
//!     },
//! );
//!
//! let answer = ask("hello".to_string()).await?;
//! println!("{answer}");
//!
//! let report = client.shutdown().await;
//! std::process::exit(report.exit_code());
//! # }
//! ```
//!
//! Audit failures are never surfaced through the wrapped call: the
//! original LLM result (or error) always comes back untouched.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod client;
mod error;

pub use client::{AuditClient, AuditClientBuilder};
pub use error::{InitError, InitResult};

pub use witness_config::AuditConfig;
pub use witness_core::{CallMeta, EncryptedBundle, ModelVendor};
pub use witness_pipeline::{DrainReport, PipelineError, TransportError};
pub use witness_telemetry::{MetricsRegistry, MetricsSnapshot};
