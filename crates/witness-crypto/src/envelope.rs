//! Envelope encryption of prompt/response bundles.
//!
//! Frame layout (before base64):
//!
//! ```text
//! version:u8 = 1 | suite_id:u16 BE | commitment:32 | iv:12 | body + tag
//! ```
//!
//! The commitment is `blake3::derive_key` of the DEK under a fixed domain
//! string; it is verified before AEAD opening so a swapped or corrupted
//! wrapped key fails closed rather than producing a garbage plaintext path.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use rand::RngCore;

use witness_core::EncryptedBundle;

use crate::error::{CryptoError, CryptoResult};
use crate::keyring::{DataKey, EncryptionContext, Keyring};

/// Suite 1: AES-256-GCM with a 12-byte IV and 16-byte tag.
pub const SUITE_AES256_GCM: u32 = 1;

const FRAME_VERSION: u8 = 1;
const COMMITMENT_LEN: usize = 32;
const IV_LEN: usize = 12;
const HEADER_LEN: usize = 1 + 2 + COMMITMENT_LEN + IV_LEN;
const COMMITMENT_DOMAIN: &str = "witness envelope key commitment v1";

fn key_commitment(dek: &DataKey) -> [u8; 32] {
    blake3::derive_key(COMMITMENT_DOMAIN, dek.as_bytes())
}

fn context_aad(context: &EncryptionContext) -> Vec<u8> {
    serde_json::to_vec(context).unwrap_or_default()
}

fn b64() -> base64::engine::general_purpose::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

/// Envelope-encrypt `plaintext` under a fresh data key from `keyring`.
///
/// The encryption context is bound both to the key wrap and to the
/// ciphertext itself (as AEAD associated data).
///
/// # Errors
///
/// Returns a [`CryptoError`] if key generation or encryption fails.
pub async fn encrypt_bundle(
    keyring: &dyn Keyring,
    plaintext: &[u8],
    context: &EncryptionContext,
) -> CryptoResult<EncryptedBundle> {
    let (dek, wrapped) = keyring.generate_data_key(context).await?;

    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(dek.as_bytes()));
    let aad = context_aad(context);
    let body = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| CryptoError::Encrypt("AEAD seal failed".to_string()))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.push(FRAME_VERSION);
    frame.extend_from_slice(
        &u16::try_from(SUITE_AES256_GCM)
            .map_err(|_| CryptoError::UnsupportedSuite(SUITE_AES256_GCM))?
            .to_be_bytes(),
    );
    frame.extend_from_slice(&key_commitment(&dek));
    frame.extend_from_slice(&iv);
    frame.extend_from_slice(&body);

    Ok(EncryptedBundle {
        ciphertext: b64().encode(&frame),
        encrypted_data_key: b64().encode(&wrapped),
        suite_id: SUITE_AES256_GCM,
    })
}

/// Decrypt a bundle produced by [`encrypt_bundle`].
///
/// Unwraps the DEK via the keyring, verifies the frame's key commitment,
/// then opens the AEAD with the context as associated data.
///
/// # Errors
///
/// Returns a [`CryptoError`] on a malformed frame, commitment mismatch,
/// unsupported suite, or authentication failure.
pub async fn decrypt_bundle(
    keyring: &dyn Keyring,
    bundle: &EncryptedBundle,
    context: &EncryptionContext,
) -> CryptoResult<Vec<u8>> {
    if bundle.suite_id != SUITE_AES256_GCM {
        return Err(CryptoError::UnsupportedSuite(bundle.suite_id));
    }

    let frame = b64()
        .decode(&bundle.ciphertext)
        .map_err(|e| CryptoError::MalformedFrame(format!("ciphertext base64: {e}")))?;
    let wrapped = b64()
        .decode(&bundle.encrypted_data_key)
        .map_err(|e| CryptoError::MalformedFrame(format!("data key base64: {e}")))?;

    if frame.len() <= HEADER_LEN {
        return Err(CryptoError::MalformedFrame(format!(
            "frame too short: {} bytes",
            frame.len()
        )));
    }
    if frame[0] != FRAME_VERSION {
        return Err(CryptoError::MalformedFrame(format!(
            "unknown frame version {}",
            frame[0]
        )));
    }
    let suite = u32::from(u16::from_be_bytes([frame[1], frame[2]]));
    if suite != SUITE_AES256_GCM {
        return Err(CryptoError::UnsupportedSuite(suite));
    }

    let commitment = &frame[3..3 + COMMITMENT_LEN];
    let iv = &frame[3 + COMMITMENT_LEN..HEADER_LEN];
    let body = &frame[HEADER_LEN..];

    let dek = keyring.unwrap_data_key(&wrapped, context).await?;
    if key_commitment(&dek) != *commitment {
        return Err(CryptoError::CommitmentMismatch);
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(dek.as_bytes()));
    let aad = context_aad(context);
    cipher
        .decrypt(
            Nonce::from_slice(iv),
            Payload {
                msg: body,
                aad: &aad,
            },
        )
        .map_err(|_| CryptoError::Decrypt("AEAD open failed".to_string()))
}
