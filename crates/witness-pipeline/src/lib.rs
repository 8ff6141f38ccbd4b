//! Witness Pipeline - The durable audit pipeline.
//!
//! This crate provides:
//! - The batcher: composes batches from the ring and the outbox and drives
//!   delivery with a single in-flight flush
//! - The transport: HTTPS ingest with status classification and jittered
//!   retry
//! - The shutdown coordinator: signal handling and drain-to-empty
//! - The recorder: turns one observed LLM call into an encrypted,
//!   chain-linked, journaled record
//!
//! Delivery is at-least-once; the ingest endpoint deduplicates via the
//! `Idempotency-Key` header.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod batcher;
mod capture;
mod error;
mod shutdown;
mod transport;

pub use batcher::{Batcher, BatcherConfig, DrainReport};
pub use capture::{round_latency_ms, Recorder};
pub use error::{PipelineError, PipelineResult};
pub use shutdown::{install_signal_handler, ShutdownCoordinator, ShutdownEvent, ShutdownPhase};
pub use transport::{
    classify_status, post_with_retry, HttpTransport, IngestTransport, TransportError, USER_AGENT,
};
