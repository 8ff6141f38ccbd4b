//! HTTPS transport to the ingest endpoint.
//!
//! One POST per batch to `<ingest_url>/v1/ingest`. Failures are classified
//! into a closed sum type at the HTTP boundary; nothing downstream ever
//! parses classification back out of an error message.

use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use witness_core::retry::{retry, RetryOutcome, RetryPolicy};

/// User-agent sent on every ingest request.
pub const USER_AGENT: &str = concat!("witness/", env!("CARGO_PKG_VERSION"));

/// Per-attempt request timeout.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivery failures, classified by retryability.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// 429 from the ingest endpoint.
    #[error("rate limited by ingest endpoint")]
    RateLimited,

    /// 5xx from the ingest endpoint.
    #[error("ingest server error (status {status})")]
    Server {
        /// HTTP status returned.
        status: u16,
    },

    /// Non-429 4xx; almost always a misconfiguration (bad key, bad URL).
    #[error("ingest client error (status {status})")]
    Client {
        /// HTTP status returned.
        status: u16,
    },

    /// The request never completed (DNS, TLS, connect, timeout).
    #[error("ingest network error: {0}")]
    Network(String),
}

impl TransportError {
    /// Whether a retry could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Client { .. })
    }
}

/// Map an HTTP status to the error taxonomy. `Ok(())` for any 2xx.
///
/// # Errors
///
/// Returns the classified [`TransportError`] for non-2xx statuses.
pub fn classify_status(status: u16) -> Result<(), TransportError> {
    match status {
        200..=299 => Ok(()),
        429 => Err(TransportError::RateLimited),
        500..=599 => Err(TransportError::Server { status }),
        _ => Err(TransportError::Client { status }),
    }
}

/// A single-attempt batch delivery.
#[async_trait]
pub trait IngestTransport: Send + Sync {
    /// POST one ingest body. `idempotency_key` is the hex leaf hash of the
    /// batch's first record.
    ///
    /// # Errors
    ///
    /// Returns a classified [`TransportError`] on failure.
    async fn post_batch(&self, body: &Value, idempotency_key: &str) -> Result<(), TransportError>;
}

/// Reqwest-backed ingest client.
pub struct HttpTransport {
    client: reqwest::Client,
    ingest_url: Url,
    api_key: String,
}

impl HttpTransport {
    /// Build a transport for the given ingest base URL.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Network`] if the HTTP client cannot be
    /// constructed.
    pub fn new(ingest_url: Url, api_key: String) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(ATTEMPT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let mut ingest_url = ingest_url;
        let path = format!("{}/v1/ingest", ingest_url.path().trim_end_matches('/'));
        ingest_url.set_path(&path);

        Ok(Self {
            client,
            ingest_url,
            api_key,
        })
    }

    /// The fully-resolved ingest URL.
    #[must_use]
    pub fn ingest_url(&self) -> &Url {
        &self.ingest_url
    }
}

#[async_trait]
impl IngestTransport for HttpTransport {
    async fn post_batch(&self, body: &Value, idempotency_key: &str) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.ingest_url.clone())
            .header("x-api-key", &self.api_key)
            .header("Idempotency-Key", idempotency_key)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        debug!(status, url = %self.ingest_url, "Ingest POST completed");
        // 2xx means accepted; the body is ignored.
        classify_status(status)
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("ingest_url", &self.ingest_url.as_str())
            .finish_non_exhaustive()
    }
}

/// Deliver one body through the transport's retry loop: up to 5 attempts
/// with full jitter (`random(0, 250 * 2^(n-1)) ms`).
///
/// When `deadline` is set, no attempt is scheduled past it; the last error
/// is returned instead.
///
/// # Errors
///
/// Returns the final [`TransportError`] when every permitted attempt fails
/// or the error is non-retryable.
pub async fn post_with_retry(
    transport: &dyn IngestTransport,
    body: &Value,
    idempotency_key: &str,
    deadline: Option<Instant>,
) -> Result<(), TransportError> {
    let policy = RetryPolicy::transport();
    let outcome = retry(
        &policy,
        deadline,
        |attempt| async move {
            let result = transport.post_batch(body, idempotency_key).await;
            if let Err(ref error) = result {
                warn!(attempt, %error, "Ingest attempt failed");
            }
            result
        },
        TransportError::is_retryable,
    )
    .await;

    match outcome {
        RetryOutcome::Success(()) => Ok(()),
        RetryOutcome::Exhausted { error, attempts }
        | RetryOutcome::DeadlineElapsed { error, attempts } => {
            warn!(attempts, %error, "Ingest delivery failed");
            Err(error)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn classification_table() {
        assert!(classify_status(200).is_ok());
        assert!(classify_status(204).is_ok());
        assert_eq!(classify_status(429), Err(TransportError::RateLimited));
        assert_eq!(
            classify_status(503),
            Err(TransportError::Server { status: 503 })
        );
        assert_eq!(
            classify_status(401),
            Err(TransportError::Client { status: 401 })
        );
        assert_eq!(
            classify_status(404),
            Err(TransportError::Client { status: 404 })
        );
    }

    #[test]
    fn retryability() {
        assert!(TransportError::RateLimited.is_retryable());
        assert!(TransportError::Server { status: 500 }.is_retryable());
        assert!(TransportError::Network("dns".into()).is_retryable());
        assert!(!TransportError::Client { status: 400 }.is_retryable());
    }

    #[test]
    fn url_join_handles_trailing_slash_and_prefix() {
        let t = HttpTransport::new(
            Url::parse("https://ingest.example.com/").unwrap(),
            "k".into(),
        )
        .unwrap();
        assert_eq!(t.ingest_url().as_str(), "https://ingest.example.com/v1/ingest");

        let t = HttpTransport::new(
            Url::parse("https://example.com/audit").unwrap(),
            "k".into(),
        )
        .unwrap();
        assert_eq!(t.ingest_url().as_str(), "https://example.com/audit/v1/ingest");
    }

    struct Flaky {
        calls: AtomicU32,
        fail_first: u32,
        error: TransportError,
    }

    #[async_trait]
    impl IngestTransport for Flaky {
        async fn post_batch(&self, _body: &Value, _key: &str) -> Result<(), TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_server_errors_until_success() {
        let transport = Flaky {
            calls: AtomicU32::new(0),
            fail_first: 3,
            error: TransportError::Server { status: 503 },
        };
        let body = serde_json::json!({});
        post_with_retry(&transport, &body, "key", None).await.unwrap();
        assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let transport = Flaky {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
            error: TransportError::Client { status: 401 },
        };
        let body = serde_json::json!({});
        let err = post_with_retry(&transport, &body, "key", None)
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Client { status: 401 });
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_five_attempts() {
        let transport = Flaky {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
            error: TransportError::Network("unreachable".into()),
        };
        let body = serde_json::json!({});
        assert!(post_with_retry(&transport, &body, "key", None).await.is_err());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 5);
    }
}
