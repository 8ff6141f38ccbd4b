//! Witness Store - Durable queueing for pending audit records.
//!
//! This crate provides:
//! - The outbox: a crash-safe, append-only JSON-lines journal
//! - The ring buffer: a bounded in-memory FIFO mirroring recent records
//!
//! Together they implement the pipeline's durability contract: after
//! `append` returns, a record is never *only* in memory.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod outbox;
mod ring;

pub use error::{StoreError, StoreResult};
pub use outbox::{HeadSlice, Outbox, MAX_FILE_BYTES, WARN_FILE_BYTES};
pub use ring::RingBuffer;
