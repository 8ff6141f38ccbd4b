//! Convenience re-exports for consumers of `witness-crypto`.

pub use crate::chain::{ChainLink, HashChain};
pub use crate::envelope::{decrypt_bundle, encrypt_bundle};
pub use crate::error::{CryptoError, CryptoResult};
pub use crate::hash::LeafHash;
pub use crate::keyring::{build_keyring, EncryptionContext, Keyring};
