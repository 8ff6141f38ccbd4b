//! End-to-end pipeline scenarios over a mock transport.

mod common;

use common::{client_with, meta, outbox_path, outbox_records, test_config};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use witness_sdk::{AuditConfig, TransportError};
use witness_test::MockTransport;

type LlmError = std::io::Error;

async fn echo_call(client: &Arc<witness_sdk::AuditClient>, prompt: &str) -> String {
    let ask = client.wrap_llm(meta(), |prompt: String| async move {
        Ok::<_, Infallible>(format!("echo: {prompt}"))
    });
    ask(prompt.to_string()).await.expect("echo never fails")
}

#[tokio::test]
async fn happy_path_delivers_one_batch() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::always_ok());
    let client = client_with(test_config(&dir, 2, 50), Arc::clone(&transport)).await;

    assert_eq!(echo_call(&client, "hi").await, "echo: hi");
    assert_eq!(echo_call(&client, "yo").await, "echo: yo");

    tokio::time::sleep(Duration::from_millis(200)).await;

    let posts = transport.posts();
    assert_eq!(posts.len(), 1, "exactly one POST expected");
    let records = posts[0].body["records"].as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(posts[0].body["tenantId"], "acme");

    // Idempotency-Key is the first record's leaf hash.
    assert_eq!(
        posts[0].idempotency_key,
        records[0]["leafHash"].as_str().unwrap()
    );
    // Chain linkage within the batch.
    assert!(records[0]["payload"]["prev_hash"].is_null());
    assert_eq!(
        records[1]["payload"]["prev_hash"],
        records[0]["payload"]["leaf_hash"]
    );

    assert!(outbox_records(&dir).is_empty(), "outbox should be empty");
    let snap = client.metrics().snapshot();
    assert_eq!(snap.records_enqueued, 2);
    assert_eq!(snap.records_delivered, 2);
}

#[tokio::test]
async fn restart_replays_journaled_records() {
    let dir = TempDir::new().unwrap();

    // First process: journal a record but never flush.
    {
        let transport = Arc::new(MockTransport::always_ok());
        let client = client_with(test_config(&dir, 10, 600_000), Arc::clone(&transport)).await;
        echo_call(&client, "survive me").await;
        assert_eq!(outbox_records(&dir).len(), 1);
        assert!(transport.posts().is_empty());
    }

    // Second process: the journal feeds the first flush.
    let transport = Arc::new(MockTransport::always_ok());
    let client = client_with(test_config(&dir, 10, 600_000), Arc::clone(&transport)).await;
    let delivered = client.flush().await.unwrap();
    assert_eq!(delivered, 1);

    let posts = transport.posts();
    assert_eq!(posts.len(), 1);
    let payload = &posts[0].body["records"][0]["payload"];
    assert_eq!(payload["tenant_id"], "acme");
    assert!(outbox_records(&dir).is_empty());
}

#[tokio::test]
async fn server_errors_are_retried_with_backoff() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::failing_first(
        3,
        TransportError::Server { status: 503 },
    ));
    let client = client_with(test_config(&dir, 10, 600_000), Arc::clone(&transport)).await;

    echo_call(&client, "persist").await;
    let delivered = client.flush().await.unwrap();
    assert_eq!(delivered, 1);

    // 503, 503, 503, then 200: four attempts inside one flush.
    assert_eq!(transport.post_count(), 4);
    assert!(outbox_records(&dir).is_empty());
    assert_eq!(client.metrics().snapshot().flush_failures, 0);
}

#[tokio::test]
async fn backpressure_refuses_new_records() {
    let dir = TempDir::new().unwrap();

    // Pre-fill the journal past the 5 MiB cap before the client opens it.
    let queue_dir = dir.path().join("queue");
    std::fs::create_dir_all(&queue_dir).unwrap();
    let line = format!("{{\"filler\":\"{}\"}}\n", "x".repeat(1024));
    let mut content = String::new();
    while content.len() <= 5 * 1024 * 1024 {
        content.push_str(&line);
    }
    std::fs::write(queue_dir.join("outbox.log"), &content).unwrap();

    let transport = Arc::new(MockTransport::always_ok());
    let client = client_with(test_config(&dir, 10, 600_000), Arc::clone(&transport)).await;

    let before = std::fs::metadata(outbox_path(&dir)).unwrap().len();
    echo_call(&client, "rejected").await; // audit failure is swallowed
    let after = std::fs::metadata(outbox_path(&dir)).unwrap().len();

    assert_eq!(before, after, "saturated outbox must not grow");
    let snap = client.metrics().snapshot();
    assert_eq!(snap.backpressure_rejections, 1);
    assert_eq!(snap.records_dropped, 1);
    assert_eq!(snap.records_enqueued, 0);
}

#[tokio::test]
async fn shutdown_drains_to_empty_with_exit_zero() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::always_ok());
    let client = client_with(test_config(&dir, 2, 600_000), Arc::clone(&transport)).await;

    for n in 0..5 {
        echo_call(&client, &format!("record {n}")).await;
    }

    let report = client.shutdown().await;
    assert!(report.complete);
    assert_eq!(report.exit_code(), 0);
    assert!(outbox_records(&dir).is_empty());
    assert_eq!(transport.records_posted(), 5);
    assert_eq!(client.drain_exit_code().await, Some(0));

    // Shutdown is idempotent.
    let again = client.shutdown().await;
    assert_eq!(again, report);
}

#[tokio::test]
async fn shutdown_with_dead_transport_reports_data_loss() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::scripted(vec![
        Err(TransportError::Server { status: 500 });
        256
    ]));
    let config = AuditConfig {
        drain_deadline_secs: 1,
        ..test_config(&dir, 2, 600_000)
    };
    let client = client_with(config, Arc::clone(&transport)).await;

    echo_call(&client, "doomed").await;

    let report = client.shutdown().await;
    assert!(!report.complete);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.remaining, 1);
    // The record is still journaled for the next process.
    assert_eq!(outbox_records(&dir).len(), 1);
}

#[tokio::test]
async fn enqueue_after_shutdown_is_refused_silently() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::always_ok());
    let client = client_with(test_config(&dir, 2, 600_000), Arc::clone(&transport)).await;

    client.shutdown().await;
    echo_call(&client, "too late").await; // result still comes back

    assert!(outbox_records(&dir).is_empty());
    assert_eq!(client.metrics().snapshot().records_dropped, 1);
}

#[tokio::test]
async fn chain_links_across_outbox_lines() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::always_ok());
    let client = client_with(test_config(&dir, 10, 600_000), Arc::clone(&transport)).await;

    for n in 0..3 {
        echo_call(&client, &format!("prompt {n}")).await;
    }

    let records = outbox_records(&dir);
    assert_eq!(records.len(), 3);
    assert!(records[0]["prev_hash"].is_null());
    assert_eq!(records[1]["prev_hash"], records[0]["leaf_hash"]);
    assert_eq!(records[2]["prev_hash"], records[1]["leaf_hash"]);

    for record in &records {
        let leaf = record["leaf_hash"].as_str().unwrap();
        assert_eq!(leaf.len(), 64);
        assert!(leaf.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

#[tokio::test]
async fn ring_never_exceeds_twice_batch_size() {
    let dir = TempDir::new().unwrap();
    // Non-retryable failures: every flush fails fast and restores.
    let transport = Arc::new(MockTransport::scripted(vec![
        Err(TransportError::Client { status: 400 });
        256
    ]));
    let client = client_with(test_config(&dir, 2, 600_000), Arc::clone(&transport)).await;

    for n in 0..12 {
        echo_call(&client, &format!("record {n}")).await;
        assert!(client.metrics().snapshot().ring_len <= 4);
    }
    assert_eq!(outbox_records(&dir).len(), 12);
}

#[tokio::test]
async fn wrapped_errors_propagate_untouched_and_unaudited() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::always_ok());
    let client = client_with(test_config(&dir, 10, 600_000), Arc::clone(&transport)).await;

    let failing = client.wrap_llm(meta(), |_prompt: String| async move {
        Err::<String, _>(LlmError::new(std::io::ErrorKind::TimedOut, "llm down"))
    });

    let err = failing("prompt".to_string()).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
    assert!(outbox_records(&dir).is_empty(), "failed calls are not audited");
    assert_eq!(client.metrics().snapshot().records_enqueued, 0);
}

#[tokio::test]
async fn bundles_decrypt_back_to_the_call() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::always_ok());
    let client = client_with(test_config(&dir, 10, 600_000), Arc::clone(&transport)).await;

    echo_call(&client, "secret prompt").await;

    let records = outbox_records(&dir);
    let bundle: witness_sdk::EncryptedBundle =
        serde_json::from_value(records[0]["enc"].clone()).unwrap();
    let plaintext = client.decrypt_bundle(&bundle).await.unwrap();
    let opened: serde_json::Value = serde_json::from_slice(&plaintext).unwrap();

    assert_eq!(opened["prompt"], "secret prompt");
    assert_eq!(opened["response"], "echo: secret prompt");
}

#[tokio::test]
async fn payload_carries_metadata_and_token_counts() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::always_ok());
    let mut config = test_config(&dir, 10, 600_000);
    config
        .static_meta
        .insert("deployment".to_string(), serde_json::json!("staging"));
    let client = client_with(config, Arc::clone(&transport)).await;

    echo_call(&client, "twelve chars").await;

    let record = &outbox_records(&dir)[0];
    assert_eq!(record["tenant_id"], "acme");
    assert_eq!(record["model_vendor"], "anthropic");
    assert_eq!(record["model_name"], "claude-sonnet-4-20250514");
    assert_eq!(record["deployment"], "staging");
    assert_eq!(record["prompt_tokens"], 3); // ceil(12 / 4)
    assert!(record["latency_ms"].as_f64().unwrap() >= 0.0);
    assert!(record["ts_client"].as_str().unwrap().ends_with('Z'));
    assert!(record["enc"]["ciphertext"].is_string());
    assert_eq!(record["enc"]["suite_id"], 1);
}
