//! Keyrings: sources of wrapped data-encryption keys.
//!
//! A keyring hands out fresh per-record DEKs wrapped under the customer
//! master key and unwraps them again for audit tooling. Keyrings are cheap
//! to construct and are rebuilt for every call so master-key rotation takes
//! effect without a restart; only the suite constant may be cached.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use rand::RngCore;
use std::collections::BTreeMap;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};
use crate::kms::KmsApi;

/// The `cmk_arn` sentinel that selects the local development keyring.
pub const LOCAL_DEV_CMK_ARN: &str = "local-dev";

/// Environment variable holding the 32-byte hex local KEK.
pub const LOCAL_DEV_KEK_VAR: &str = "LOCAL_DEV_KEK";

/// Encryption context bound into every wrap and every ciphertext.
///
/// A `BTreeMap` so its serialized form is canonical by construction.
pub type EncryptionContext = BTreeMap<String, String>;

/// Key commitment policy.
///
/// There is exactly one policy: commitment is produced on encrypt and
/// verified on decrypt. The enum exists so the policy shows up in types
/// rather than as an implicit behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommitmentPolicy {
    /// Commit on encrypt, verify on decrypt.
    #[default]
    RequireEncryptRequireDecrypt,
}

/// A 32-byte data-encryption key, zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DataKey([u8; 32]);

impl DataKey {
    /// Generate a fresh random key.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Construct from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Decrypt`] if the slice is not 32 bytes.
    pub fn from_slice(slice: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; 32] = slice
            .try_into()
            .map_err(|_| CryptoError::Decrypt(format!("data key must be 32 bytes, got {}", slice.len())))?;
        Ok(Self(bytes))
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DataKey(..)")
    }
}

/// Source of wrapped data-encryption keys.
#[async_trait]
pub trait Keyring: Send + Sync {
    /// Generate a fresh DEK bound to `context`; returns the plaintext key
    /// and its wrapped form.
    ///
    /// # Errors
    ///
    /// Returns a [`CryptoError`] if key generation or wrapping fails.
    async fn generate_data_key(
        &self,
        context: &EncryptionContext,
    ) -> CryptoResult<(DataKey, Vec<u8>)>;

    /// Unwrap a previously wrapped DEK bound to `context`.
    ///
    /// # Errors
    ///
    /// Returns a [`CryptoError`] if the blob is malformed or the context
    /// does not match.
    async fn unwrap_data_key(
        &self,
        wrapped: &[u8],
        context: &EncryptionContext,
    ) -> CryptoResult<DataKey>;

    /// The commitment policy in force.
    fn commitment_policy(&self) -> CommitmentPolicy {
        CommitmentPolicy::RequireEncryptRequireDecrypt
    }
}

/// Build the keyring selected by `cmk_arn`.
///
/// `"local-dev"` selects [`LocalKeyring`] (reading [`LOCAL_DEV_KEK_VAR`]);
/// anything else is treated as a master-key reference served by `kms`.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidLocalKey`] if the local KEK is missing or
/// malformed, or [`CryptoError::KeyringUnavailable`] when a remote master
/// key is named but no key service is configured.
pub fn build_keyring(
    cmk_arn: &str,
    kms: Option<Arc<dyn KmsApi>>,
) -> CryptoResult<Arc<dyn Keyring>> {
    if cmk_arn == LOCAL_DEV_CMK_ARN {
        Ok(Arc::new(LocalKeyring::from_env()?))
    } else {
        let kms = kms.ok_or_else(|| {
            CryptoError::KeyringUnavailable(format!(
                "cmk_arn '{cmk_arn}' requires a key service endpoint"
            ))
        })?;
        Ok(Arc::new(KmsKeyring::new(cmk_arn.to_string(), kms)))
    }
}

// 12-byte GCM nonce prepended to the wrapped-key blob.
const WRAP_IV_LEN: usize = 12;

/// Local development keyring: raw-AES wrapping under a KEK from the
/// environment. Never use outside development.
pub struct LocalKeyring {
    kek: DataKey,
}

impl LocalKeyring {
    /// Read the KEK from [`LOCAL_DEV_KEK_VAR`].
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLocalKey`] if the variable is unset or
    /// not 32 bytes of hex.
    pub fn from_env() -> CryptoResult<Self> {
        let hex_key = std::env::var(LOCAL_DEV_KEK_VAR).map_err(|_| {
            CryptoError::InvalidLocalKey(format!("{LOCAL_DEV_KEK_VAR} is not set"))
        })?;
        Self::from_hex(&hex_key)
    }

    /// Construct from a 64-char hex KEK.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLocalKey`] on bad hex or length.
    pub fn from_hex(hex_key: &str) -> CryptoResult<Self> {
        let mut bytes = hex::decode(hex_key.trim())
            .map_err(|e| CryptoError::InvalidLocalKey(format!("KEK is not valid hex: {e}")))?;
        let kek = DataKey::from_slice(&bytes)
            .map_err(|_| CryptoError::InvalidLocalKey(format!(
                "KEK must be 32 bytes, got {}",
                bytes.len()
            )))?;
        bytes.zeroize();
        Ok(Self { kek })
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.kek.as_bytes()))
    }

    fn context_aad(context: &EncryptionContext) -> Vec<u8> {
        // BTreeMap serializes with sorted keys, so this is canonical.
        serde_json::to_vec(context).unwrap_or_default()
    }
}

#[async_trait]
impl Keyring for LocalKeyring {
    async fn generate_data_key(
        &self,
        context: &EncryptionContext,
    ) -> CryptoResult<(DataKey, Vec<u8>)> {
        let dek = DataKey::random();

        let mut iv = [0u8; WRAP_IV_LEN];
        rand::rngs::OsRng.fill_bytes(&mut iv);
        let aad = Self::context_aad(context);

        let wrapped_body = self
            .cipher()
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: dek.as_bytes(),
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::Encrypt("DEK wrap failed".to_string()))?;

        let mut wrapped = Vec::with_capacity(WRAP_IV_LEN + wrapped_body.len());
        wrapped.extend_from_slice(&iv);
        wrapped.extend_from_slice(&wrapped_body);
        Ok((dek, wrapped))
    }

    async fn unwrap_data_key(
        &self,
        wrapped: &[u8],
        context: &EncryptionContext,
    ) -> CryptoResult<DataKey> {
        if wrapped.len() <= WRAP_IV_LEN {
            return Err(CryptoError::MalformedFrame(
                "wrapped key blob too short".to_string(),
            ));
        }
        let (iv, body) = wrapped.split_at(WRAP_IV_LEN);
        let aad = Self::context_aad(context);

        let mut plaintext = self
            .cipher()
            .decrypt(
                Nonce::from_slice(iv),
                Payload {
                    msg: body,
                    aad: &aad,
                },
            )
            .map_err(|_| {
                CryptoError::Decrypt("DEK unwrap failed (wrong KEK or context)".to_string())
            })?;
        let dek = DataKey::from_slice(&plaintext)?;
        plaintext.zeroize();
        Ok(dek)
    }
}

impl std::fmt::Debug for LocalKeyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LocalKeyring(..)")
    }
}

/// Production keyring backed by the remote key service.
pub struct KmsKeyring {
    cmk_arn: String,
    kms: Arc<dyn KmsApi>,
}

impl KmsKeyring {
    /// Create a keyring for the given master key.
    #[must_use]
    pub fn new(cmk_arn: String, kms: Arc<dyn KmsApi>) -> Self {
        Self { cmk_arn, kms }
    }
}

#[async_trait]
impl Keyring for KmsKeyring {
    async fn generate_data_key(
        &self,
        context: &EncryptionContext,
    ) -> CryptoResult<(DataKey, Vec<u8>)> {
        let key = self.kms.generate_data_key(&self.cmk_arn, context).await?;
        let dek = DataKey::from_slice(&key.plaintext)?;
        Ok((dek, key.wrapped))
    }

    async fn unwrap_data_key(
        &self,
        wrapped: &[u8],
        context: &EncryptionContext,
    ) -> CryptoResult<DataKey> {
        let mut plaintext = self
            .kms
            .decrypt_data_key(&self.cmk_arn, wrapped, context)
            .await?;
        let dek = DataKey::from_slice(&plaintext)?;
        plaintext.zeroize();
        Ok(dek)
    }
}

impl std::fmt::Debug for KmsKeyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KmsKeyring")
            .field("cmk_arn", &self.cmk_arn)
            .finish_non_exhaustive()
    }
}
