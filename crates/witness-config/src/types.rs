//! Configuration types for the Witness audit pipeline.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use witness_telemetry::LogConfig;

/// Root configuration for the audit pipeline.
///
/// Every batching knob defaults to a production-ready value so an embedder
/// only has to supply identity: where to spool, who the tenant is, where to
/// ship, and which master key wraps the data keys.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Directory for persistent SDK state (the outbox lives in
    /// `<data_dir>/queue/`).
    pub data_dir: PathBuf,
    /// Tenant/organization identifier stamped on every record.
    pub tenant_id: String,
    /// API key sent to the ingest endpoint. Prefer the `WITNESS_API_KEY`
    /// environment variable over storing this in a file.
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Base URL of the ingest service.
    pub ingest_url: String,
    /// Customer master key reference, or `"local-dev"` for the
    /// environment-keyed development keyring.
    pub cmk_arn: String,
    /// Endpoint of the key service (unused with `"local-dev"`).
    pub kms_url: Option<String>,
    /// Records per ingest batch.
    pub batch_size: usize,
    /// Interval between periodic flushes, in milliseconds.
    pub flush_interval_ms: u64,
    /// Flush attempts during the ring drain at shutdown.
    pub drain_ring_retries: u32,
    /// Flush attempts per round while draining the outbox at shutdown.
    pub drain_outbox_retries: u32,
    /// Total shutdown-drain deadline, in seconds.
    pub drain_deadline_secs: u64,
    /// Static metadata copied verbatim onto every record.
    pub static_meta: HashMap<String, serde_json::Value>,
    /// Logging configuration.
    pub logging: LogConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".witness"),
            tenant_id: String::new(),
            api_key: String::new(),
            ingest_url: String::new(),
            cmk_arn: String::new(),
            kms_url: None,
            batch_size: 10,
            flush_interval_ms: 2000,
            drain_ring_retries: 3,
            drain_outbox_retries: 5,
            drain_deadline_secs: 30,
            static_meta: HashMap::new(),
            logging: LogConfig::default(),
        }
    }
}

impl AuditConfig {
    /// Ring buffer capacity: twice the batch size.
    #[must_use]
    pub fn ring_capacity(&self) -> usize {
        self.batch_size.saturating_mul(2)
    }
}

impl std::fmt::Debug for AuditConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditConfig")
            .field("data_dir", &self.data_dir)
            .field("tenant_id", &self.tenant_id)
            .field("has_api_key", &!self.api_key.is_empty())
            .field("ingest_url", &self.ingest_url)
            .field("cmk_arn", &self.cmk_arn)
            .field("kms_url", &self.kms_url)
            .field("batch_size", &self.batch_size)
            .field("flush_interval_ms", &self.flush_interval_ms)
            .field("static_meta", &self.static_meta)
            .finish_non_exhaustive()
    }
}

impl Serialize for AuditConfig {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("AuditConfig", 11)?;
        state.serialize_field("data_dir", &self.data_dir)?;
        state.serialize_field("tenant_id", &self.tenant_id)?;
        // api_key is intentionally omitted.
        state.serialize_field("ingest_url", &self.ingest_url)?;
        state.serialize_field("cmk_arn", &self.cmk_arn)?;
        state.serialize_field("kms_url", &self.kms_url)?;
        state.serialize_field("batch_size", &self.batch_size)?;
        state.serialize_field("flush_interval_ms", &self.flush_interval_ms)?;
        state.serialize_field("drain_ring_retries", &self.drain_ring_retries)?;
        state.serialize_field("drain_outbox_retries", &self.drain_outbox_retries)?;
        state.serialize_field("drain_deadline_secs", &self.drain_deadline_secs)?;
        state.serialize_field("static_meta", &self.static_meta)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AuditConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.flush_interval_ms, 2000);
        assert_eq!(config.ring_capacity(), 20);
        assert_eq!(config.drain_deadline_secs, 30);
    }

    #[test]
    fn api_key_never_serialized() {
        let config = AuditConfig {
            api_key: "sk-secret".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-secret"));
        assert!(!json.contains("api_key"));
    }

    #[test]
    fn api_key_redacted_from_debug() {
        let config = AuditConfig {
            api_key: "sk-secret".to_string(),
            ..Default::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("has_api_key: true"));
    }

    #[test]
    fn bare_object_deserializes_with_defaults() {
        let config: AuditConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.batch_size, 10);
    }
}
