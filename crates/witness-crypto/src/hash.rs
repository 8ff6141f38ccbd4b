//! Leaf hashing using BLAKE3.
//!
//! A leaf hash is the BLAKE3 digest of a record's canonical bytes. It is
//! both the chain link to the next record and the leaf of the server-side
//! Merkle tree, so its wire form (64-char lowercase hex) must be stable
//! across platforms and releases.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use witness_core::canonical::to_canonical_bytes;

/// A BLAKE3 leaf hash (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeafHash([u8; 32]);

impl LeafHash {
    /// Hash arbitrary bytes.
    #[must_use]
    pub fn digest(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Get the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Encode as 64-character lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Decode from a hex string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex or not 32 bytes.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(bytes))
    }
}

/// Hash an optional JSON value in canonical form.
///
/// A missing value hashes as the literal bytes `null`, matching the
/// digests of records produced by earlier releases. Changing this mapping
/// would silently fork every existing chain.
#[must_use]
pub fn digest_value(value: Option<&Value>) -> LeafHash {
    match value {
        Some(v) => LeafHash::digest(&to_canonical_bytes(v)),
        None => LeafHash::digest(b"null"),
    }
}

impl fmt::Debug for LeafHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LeafHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for LeafHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for LeafHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for LeafHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl AsRef<[u8]> for LeafHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn digest_is_deterministic() {
        let a = LeafHash::digest(b"hello world");
        let b = LeafHash::digest(b"hello world");
        assert_eq!(a, b);
        assert_ne!(a, LeafHash::digest(b"different"));
    }

    #[test]
    fn hex_is_64_lowercase_chars() {
        let hex = LeafHash::digest(b"x").to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hex_round_trip() {
        let hash = LeafHash::digest(b"round trip");
        assert_eq!(LeafHash::from_hex(&hash.to_hex()).unwrap(), hash);
        assert!(LeafHash::from_hex("abc").is_err());
    }

    #[test]
    fn missing_value_hashes_as_null_literal() {
        assert_eq!(digest_value(None), LeafHash::digest(b"null"));
        // The JSON null value canonicalizes to the same bytes.
        assert_eq!(digest_value(Some(&Value::Null)), digest_value(None));
    }

    #[test]
    fn digest_ignores_key_order() {
        let a = json!({"p": "hi", "q": 1});
        let b: Value = serde_json::from_str(r#"{"q": 1, "p": "hi"}"#).unwrap();
        assert_eq!(digest_value(Some(&a)), digest_value(Some(&b)));
    }

    #[test]
    fn known_vector_is_stable() {
        // Pinned so a serializer change that alters canonical bytes fails loudly.
        let v = json!({"a": 1, "b": [true, null, "x"]});
        let expected = LeafHash::digest(br#"{"a":1,"b":[true,null,"x"]}"#);
        assert_eq!(digest_value(Some(&v)), expected);
    }

    #[test]
    fn serde_as_hex_string() {
        let hash = LeafHash::digest(b"serde");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        let back: LeafHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
