//! Convenience re-exports for consumers of `witness-core`.

pub use crate::canonical::{canonicalize, to_canonical_bytes, CanonicalError};
pub use crate::retry::{retry, RetryOutcome, RetryPolicy};
pub use crate::tokens::TokenCounter;
pub use crate::types::{CallMeta, EncryptedBundle, ModelVendor, QueuedRecord, RecordId, Timestamp};
