//! Witness Crypto - Hashing, chaining, and envelope encryption.
//!
//! This crate provides:
//! - BLAKE3 leaf hashing over canonical record bytes
//! - The per-process tamper-evident hash chain
//! - Customer-controlled envelope encryption (KMS or local keyring)
//! - Key commitment on both the encrypt and decrypt paths
//!
//! # Security Model
//!
//! Every record's prompt/response bundle is encrypted under a fresh random
//! data-encryption key, which is wrapped by the customer master key. The
//! ciphertext frame embeds a commitment to the DEK so a swapped key is
//! detected before AEAD opening. Records are linked by leaf hash: each
//! carries the hash of its predecessor, so any historical edit breaks the
//! chain and is detectable.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod chain;
mod envelope;
mod error;
mod hash;
mod keyring;
mod kms;

pub use chain::{verify_chain, ChainIssue, ChainLink, HashChain};
pub use envelope::{decrypt_bundle, encrypt_bundle, SUITE_AES256_GCM};
pub use error::{CryptoError, CryptoResult};
pub use hash::{digest_value, LeafHash};
pub use keyring::{
    build_keyring, CommitmentPolicy, DataKey, EncryptionContext, Keyring, KmsKeyring,
    LocalKeyring, LOCAL_DEV_CMK_ARN, LOCAL_DEV_KEK_VAR,
};
pub use kms::{HttpKmsApi, KmsApi, KmsDataKey, KmsError};
