//! Common types used throughout Witness.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an audit record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub Uuid);

impl RecordId {
    /// Create a new random record ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a record ID from a UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp wrapper for consistent wire formatting.
///
/// The wire form is RFC 3339 at millisecond precision with a trailing `Z`,
/// which is what leaf hashes are computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    /// Get the current timestamp.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create a timestamp from a `DateTime<Utc>`.
    #[must_use]
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// RFC 3339 with millisecond precision (`2024-01-15T09:30:00.123Z`).
    #[must_use]
    pub fn to_rfc3339_millis(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Get the inner `DateTime<Utc>`.
    #[must_use]
    pub fn into_inner(self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_rfc3339_millis())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

/// LLM vendor attribution carried on every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVendor {
    /// OpenAI API.
    OpenAi,
    /// Anthropic API.
    Anthropic,
    /// xAI Grok API.
    Grok,
    /// Locally-hosted model.
    Local,
}

impl fmt::Display for ModelVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::Grok => write!(f, "grok"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Per-call metadata supplied by the embedder when wrapping an LLM function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallMeta {
    /// Which vendor serves the wrapped call.
    pub model_vendor: ModelVendor,
    /// Model name as sent to the vendor API.
    pub model_name: String,
    /// Optional end-user attribution.
    pub user_id: Option<String>,
}

impl CallMeta {
    /// Create metadata for a call with no user attribution.
    #[must_use]
    pub fn new(model_vendor: ModelVendor, model_name: impl Into<String>) -> Self {
        Self {
            model_vendor,
            model_name: model_name.into(),
            user_id: None,
        }
    }

    /// Attach an end-user identifier.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Envelope-encrypted prompt/response bundle.
///
/// `ciphertext` is the base64 of the full framed AEAD output (header, IV,
/// body, auth tag); `encrypted_data_key` is the base64 wrapped DEK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBundle {
    /// Base64 framed ciphertext.
    pub ciphertext: String,
    /// Base64 wrapped data-encryption key.
    pub encrypted_data_key: String,
    /// Algorithm suite identifier (1 = AES-256-GCM, 12-byte IV, 16-byte tag).
    pub suite_id: u32,
}

/// A chain-linked record queued for delivery.
///
/// `payload` is the full outbox-line object (including `prev_hash` and
/// `leaf_hash`); `leaf_hash` is duplicated here so batching code never has
/// to dig it back out of the JSON.
#[derive(Debug, Clone)]
pub struct QueuedRecord {
    /// Full record object as it appears on an outbox line.
    pub payload: serde_json::Value,
    /// Hex leaf hash of the record.
    pub leaf_hash: String,
}
