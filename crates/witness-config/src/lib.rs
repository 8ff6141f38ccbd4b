//! Witness Config - Configuration for the Witness audit SDK.
//!
//! File loading and layering belong to the embedding application; this
//! crate defines the typed configuration, environment-variable *fallback*
//! (applied only to fields the embedder left unset), and validation run at
//! `init`.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod env;
mod error;
mod types;
mod validate;

pub use env::apply_env_fallback;
pub use error::{ConfigError, ConfigResult};
pub use types::AuditConfig;
pub use validate::validate;
