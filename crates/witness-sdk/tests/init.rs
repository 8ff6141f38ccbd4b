//! Process-global initialization semantics.

mod common;

use common::test_config;
use std::sync::Arc;
use tempfile::TempDir;
use witness_sdk::{AuditClient, AuditConfig};

#[tokio::test]
async fn init_is_idempotent_and_first_call_wins() {
    let dir = TempDir::new().unwrap();
    let first = AuditClient::init(test_config(&dir, 10, 600_000))
        .await
        .unwrap();

    // A second init with a different config returns the existing client.
    let other_dir = TempDir::new().unwrap();
    let second = AuditClient::init(AuditConfig {
        tenant_id: "someone-else".to_string(),
        ..test_config(&other_dir, 25, 1000)
    })
    .await
    .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.config().tenant_id, "acme");
    assert_eq!(second.config().batch_size, 10);
}
