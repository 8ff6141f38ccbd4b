//! Record capture: one observed LLM call in, one journaled record out.
//!
//! The recorder canonicalizes the prompt/response pair, envelope-encrypts
//! it under a keyring built fresh for the call (so master-key rotation
//! needs no restart), assembles the payload, links it into the hash chain,
//! and enqueues it. Audit failures never reach the wrapped caller; they are
//! logged and counted here.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use witness_core::canonical::to_canonical_bytes;
use witness_core::{CallMeta, QueuedRecord, RecordId, Timestamp, TokenCounter};
use witness_crypto::{build_keyring, encrypt_bundle, EncryptionContext, HashChain, KmsApi};
use witness_telemetry::MetricsRegistry;

use crate::batcher::Batcher;
use crate::error::PipelineResult;

/// Round a latency to the 2-decimal milliseconds the wire format carries.
#[must_use]
pub fn round_latency_ms(latency: Duration) -> f64 {
    (latency.as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

/// Turns observed calls into encrypted, chain-linked, journaled records.
pub struct Recorder {
    tenant_id: String,
    static_meta: Map<String, Value>,
    cmk_arn: String,
    kms: Option<Arc<dyn KmsApi>>,
    chain: Arc<HashChain>,
    batcher: Batcher,
    metrics: MetricsRegistry,
    tokens: Arc<dyn TokenCounter>,
}

impl Recorder {
    /// Assemble a recorder.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: String,
        static_meta: Map<String, Value>,
        cmk_arn: String,
        kms: Option<Arc<dyn KmsApi>>,
        chain: Arc<HashChain>,
        batcher: Batcher,
        metrics: MetricsRegistry,
        tokens: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            tenant_id,
            static_meta,
            cmk_arn,
            kms,
            chain,
            batcher,
            metrics,
            tokens,
        }
    }

    /// The hash chain this recorder links into.
    #[must_use]
    pub fn chain(&self) -> &Arc<HashChain> {
        &self.chain
    }

    /// Capture one successful call, swallowing audit failures.
    ///
    /// This is the wrapper-facing entry point: any internal error is logged
    /// and counted, never returned, so the caller's result is untouched.
    pub async fn capture_logged(
        &self,
        meta: &CallMeta,
        prompt: &Value,
        response: &Value,
        latency: Duration,
    ) {
        if let Err(e) = self.capture(meta, prompt, response, latency).await {
            self.metrics.record_dropped();
            warn!(error = %e, "Failed to audit LLM call");
        }
    }

    /// Capture one successful call.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::PipelineError`] if encryption, journaling, or
    /// enqueueing fails. Callers on the wrapped path use
    /// [`Self::capture_logged`] instead.
    pub async fn capture(
        &self,
        meta: &CallMeta,
        prompt: &Value,
        response: &Value,
        latency: Duration,
    ) -> PipelineResult<()> {
        // Token counts come from the raw texts; non-string values count
        // over their canonical form.
        let prompt_tokens = self.count_tokens(prompt);
        let response_tokens = self.count_tokens(response);

        let plaintext = to_canonical_bytes(&json!({
            "prompt": prompt,
            "response": response,
        }));

        let mut context = EncryptionContext::new();
        context.insert("org_id".to_string(), self.tenant_id.clone());

        // Keyring per call: master-key rotation applies immediately.
        let keyring = build_keyring(&self.cmk_arn, self.kms.clone())?;
        let encrypt_started = Instant::now();
        let bundle = encrypt_bundle(keyring.as_ref(), &plaintext, &context).await?;
        self.metrics
            .observe_encrypt_latency(encrypt_started.elapsed());

        let mut payload = Map::new();
        for (key, value) in &self.static_meta {
            payload.insert(key.clone(), value.clone());
        }
        payload.insert("id".to_string(), json!(RecordId::new().to_string()));
        payload.insert("tenant_id".to_string(), json!(self.tenant_id));
        payload.insert("model_vendor".to_string(), json!(meta.model_vendor));
        payload.insert("model_name".to_string(), json!(meta.model_name));
        payload.insert("user_id".to_string(), json!(meta.user_id));
        payload.insert(
            "ts_client".to_string(),
            json!(Timestamp::now().to_rfc3339_millis()),
        );
        payload.insert("latency_ms".to_string(), json!(round_latency_ms(latency)));
        payload.insert("prompt_tokens".to_string(), json!(prompt_tokens));
        payload.insert("response_tokens".to_string(), json!(response_tokens));
        payload.insert("enc".to_string(), json!(bundle));

        let mut payload = Value::Object(payload);
        let link = self.chain.link(&mut payload);

        self.batcher
            .enqueue(QueuedRecord {
                payload,
                leaf_hash: link.leaf_hash.to_hex(),
            })
            .await
    }

    fn count_tokens(&self, value: &Value) -> usize {
        match value {
            Value::String(s) => self.tokens.count(s),
            other => {
                let bytes = to_canonical_bytes(other);
                self.tokens.count(&String::from_utf8_lossy(&bytes))
            },
        }
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("tenant_id", &self.tenant_id)
            .field("cmk_arn", &self.cmk_arn)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_rounds_to_two_decimals() {
        assert_eq!(round_latency_ms(Duration::from_micros(1_234_567)), 1234.57);
        assert_eq!(round_latency_ms(Duration::from_millis(250)), 250.0);
        assert_eq!(round_latency_ms(Duration::ZERO), 0.0);
    }
}
