//! Mock transport and KMS doubles.

use async_trait::async_trait;
use rand::RngCore;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;
use witness_crypto::{KmsApi, KmsDataKey, KmsError};
use witness_pipeline::{IngestTransport, TransportError};

/// One captured ingest POST.
#[derive(Debug, Clone)]
pub struct CapturedPost {
    /// The request body.
    pub body: Value,
    /// The `Idempotency-Key` header.
    pub idempotency_key: String,
}

/// Scripted ingest transport.
///
/// Each POST pops the next scripted outcome; once the script is exhausted
/// every POST succeeds. All request bodies and idempotency keys are
/// captured for assertions.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<Vec<Result<(), TransportError>>>,
    posts: Mutex<Vec<CapturedPost>>,
}

impl MockTransport {
    /// A transport that always succeeds.
    #[must_use]
    pub fn always_ok() -> Self {
        Self::default()
    }

    /// A transport that plays `script` in order, then succeeds.
    #[must_use]
    pub fn scripted(script: Vec<Result<(), TransportError>>) -> Self {
        Self {
            script: Mutex::new(script),
            posts: Mutex::new(Vec::new()),
        }
    }

    /// A transport that fails `n` times with the given error, then succeeds.
    #[must_use]
    pub fn failing_first(n: usize, error: TransportError) -> Self {
        Self::scripted(vec![Err(error); n])
    }

    /// Every POST made so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (a prior test panic).
    #[must_use]
    pub fn posts(&self) -> Vec<CapturedPost> {
        self.posts.lock().expect("posts lock poisoned").clone()
    }

    /// Number of POST attempts made so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (a prior test panic).
    #[must_use]
    pub fn post_count(&self) -> usize {
        self.posts.lock().expect("posts lock poisoned").len()
    }

    /// Total records across all successful and failed POST bodies.
    #[must_use]
    pub fn records_posted(&self) -> usize {
        self.posts()
            .iter()
            .filter_map(|p| p.body["records"].as_array().map(Vec::len))
            .sum()
    }
}

#[async_trait]
impl IngestTransport for MockTransport {
    async fn post_batch(&self, body: &Value, idempotency_key: &str) -> Result<(), TransportError> {
        self.posts.lock().expect("posts lock poisoned").push(CapturedPost {
            body: body.clone(),
            idempotency_key: idempotency_key.to_string(),
        });
        let mut script = self.script.lock().expect("script lock poisoned");
        if script.is_empty() {
            Ok(())
        } else {
            script.remove(0)
        }
    }
}

/// In-memory key service double.
///
/// "Wrapping" hands out an opaque token and remembers the plaintext behind
/// it, which is all the envelope layer needs from a KMS in tests. Can be
/// switched into a permanent-failure mode to exercise error classification.
#[derive(Debug, Default)]
pub struct MockKms {
    keys: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
    deny: Mutex<Option<&'static str>>,
}

impl MockKms {
    /// A healthy key service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `AccessDenied`.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (a prior test panic).
    pub fn deny_access(&self) {
        *self.deny.lock().expect("deny lock poisoned") = Some("AccessDenied");
    }

    /// Make every subsequent call fail with `KeyDisabled`.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (a prior test panic).
    pub fn disable_key(&self) {
        *self.deny.lock().expect("deny lock poisoned") = Some("KeyDisabled");
    }

    fn failure(&self, cmk_arn: &str) -> Option<KmsError> {
        match *self.deny.lock().expect("deny lock poisoned") {
            Some("AccessDenied") => Some(KmsError::AccessDenied {
                cmk_arn: cmk_arn.to_string(),
            }),
            Some(_) => Some(KmsError::KeyDisabled {
                cmk_arn: cmk_arn.to_string(),
            }),
            None => None,
        }
    }
}

#[async_trait]
impl KmsApi for MockKms {
    async fn generate_data_key(
        &self,
        cmk_arn: &str,
        _context: &BTreeMap<String, String>,
    ) -> Result<KmsDataKey, KmsError> {
        if let Some(err) = self.failure(cmk_arn) {
            return Err(err);
        }
        let mut plaintext = vec![0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut plaintext);
        let wrapped = uuid::Uuid::new_v4().into_bytes().to_vec();
        self.keys
            .lock()
            .expect("keys lock poisoned")
            .insert(wrapped.clone(), plaintext.clone());
        Ok(KmsDataKey { plaintext, wrapped })
    }

    async fn decrypt_data_key(
        &self,
        cmk_arn: &str,
        wrapped: &[u8],
        _context: &BTreeMap<String, String>,
    ) -> Result<Vec<u8>, KmsError> {
        if let Some(err) = self.failure(cmk_arn) {
            return Err(err);
        }
        self.keys
            .lock()
            .expect("keys lock poisoned")
            .get(wrapped)
            .cloned()
            .ok_or_else(|| KmsError::InvalidResponse("unknown wrapped key".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_transport_plays_script_then_succeeds() {
        let transport = MockTransport::failing_first(1, TransportError::RateLimited);
        let body = serde_json::json!({"records": []});

        assert_eq!(
            transport.post_batch(&body, "k1").await,
            Err(TransportError::RateLimited)
        );
        assert_eq!(transport.post_batch(&body, "k2").await, Ok(()));
        assert_eq!(transport.post_count(), 2);
        assert_eq!(transport.posts()[1].idempotency_key, "k2");
    }

    #[tokio::test]
    async fn mock_kms_round_trips_keys() {
        let kms = MockKms::new();
        let ctx = BTreeMap::new();
        let key = kms.generate_data_key("arn:test", &ctx).await.unwrap();
        let plaintext = kms
            .decrypt_data_key("arn:test", &key.wrapped, &ctx)
            .await
            .unwrap();
        assert_eq!(plaintext, key.plaintext);
    }

    #[tokio::test]
    async fn mock_kms_denial_modes() {
        let kms = MockKms::new();
        kms.deny_access();
        let err = kms
            .generate_data_key("arn:test", &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, KmsError::AccessDenied { .. }));
        assert!(!err.is_retryable());
    }
}
