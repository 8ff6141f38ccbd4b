//! Shared harness for SDK integration tests.

// Each integration test binary compiles this module; not all of them use
// every helper.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use witness_sdk::{AuditClient, AuditConfig, CallMeta, ModelVendor};
use witness_test::MockTransport;

/// 32-byte hex KEK for the local-dev keyring.
pub const TEST_KEK: &str = "404142434445464748494a4b4c4d4e4f505152535455565758595a5b5c5d5e5f";

/// Config pointing at a tempdir, local-dev keyring, and fast batching.
pub fn test_config(dir: &TempDir, batch_size: usize, flush_interval_ms: u64) -> AuditConfig {
    AuditConfig {
        data_dir: dir.path().to_path_buf(),
        tenant_id: "acme".to_string(),
        api_key: "wk-test".to_string(),
        ingest_url: "https://ingest.invalid".to_string(),
        cmk_arn: "local-dev".to_string(),
        batch_size,
        flush_interval_ms,
        ..Default::default()
    }
}

/// Build a client over a mock transport, no signal handler, no logging.
pub async fn client_with(config: AuditConfig, transport: Arc<MockTransport>) -> Arc<AuditClient> {
    std::env::set_var("LOCAL_DEV_KEK", TEST_KEK);
    AuditClient::builder(config)
        .with_transport(transport)
        .without_signal_handler()
        .without_logging_setup()
        .build()
        .await
        .expect("client should build")
}

/// Metadata for a test call.
pub fn meta() -> CallMeta {
    CallMeta::new(ModelVendor::Anthropic, "claude-sonnet-4-20250514")
}

/// Path of the outbox journal under a test data dir.
pub fn outbox_path(dir: &TempDir) -> PathBuf {
    dir.path().join("queue").join("outbox.log")
}

/// Parse every outbox line.
pub fn outbox_records(dir: &TempDir) -> Vec<serde_json::Value> {
    let content = match std::fs::read_to_string(outbox_path(dir)) {
        Ok(content) => content,
        Err(_) => return Vec::new(),
    };
    content
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| serde_json::from_str(l).expect("outbox line should parse"))
        .collect()
}
