//! Witness Test - Mock collaborators for exercising the audit pipeline.
//!
//! Production code must never depend on this crate; it exists for the
//! workspace's unit and integration tests.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod mock;

pub use mock::{MockKms, MockTransport};
