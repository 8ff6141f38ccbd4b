//! KMS collaborator seam.
//!
//! The key service is an external collaborator: it hands out fresh data keys
//! wrapped under a customer master key and unwraps them on request. The
//! [`KmsApi`] trait is the seam; [`HttpKmsApi`] is the bundled JSON client,
//! and tests substitute a mock.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Errors from the KMS collaborator, classified for retry decisions.
#[derive(Debug, Error)]
pub enum KmsError {
    /// The caller is not permitted to use the master key.
    #[error("KMS access denied for {cmk_arn}")]
    AccessDenied {
        /// The master key that refused.
        cmk_arn: String,
    },

    /// The master key exists but is disabled.
    #[error("KMS key disabled: {cmk_arn}")]
    KeyDisabled {
        /// The disabled master key.
        cmk_arn: String,
    },

    /// The service answered with an unexpected status.
    #[error("KMS service error (status {status})")]
    Service {
        /// HTTP status returned.
        status: u16,
    },

    /// The request never completed (DNS, TLS, timeout).
    #[error("KMS network error: {0}")]
    Network(String),

    /// The service response could not be parsed.
    #[error("invalid KMS response: {0}")]
    InvalidResponse(String),
}

impl KmsError {
    /// Transient network and 5xx-class trouble is retryable;
    /// `AccessDenied` and `KeyDisabled` are permanent.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Service { status } => *status >= 500,
            Self::AccessDenied { .. } | Self::KeyDisabled { .. } | Self::InvalidResponse(_) => {
                false
            },
        }
    }
}

/// A freshly generated data key: plaintext plus its wrapped form.
#[derive(Debug)]
pub struct KmsDataKey {
    /// Plaintext 32-byte data key.
    pub plaintext: Vec<u8>,
    /// The same key wrapped under the master key.
    pub wrapped: Vec<u8>,
}

/// Wrap/unwrap interface to the key service.
#[async_trait]
pub trait KmsApi: Send + Sync {
    /// Generate a fresh 32-byte data key bound to `context`, returning the
    /// plaintext and wrapped forms.
    ///
    /// # Errors
    ///
    /// Returns a classified [`KmsError`] on failure.
    async fn generate_data_key(
        &self,
        cmk_arn: &str,
        context: &BTreeMap<String, String>,
    ) -> Result<KmsDataKey, KmsError>;

    /// Unwrap a previously wrapped data key bound to `context`.
    ///
    /// # Errors
    ///
    /// Returns a classified [`KmsError`] on failure.
    async fn decrypt_data_key(
        &self,
        cmk_arn: &str,
        wrapped: &[u8],
        context: &BTreeMap<String, String>,
    ) -> Result<Vec<u8>, KmsError>;
}

/// JSON-over-HTTPS client for the key service.
pub struct HttpKmsApi {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct GenerateDataKeyResponse {
    plaintext_b64: String,
    wrapped_b64: String,
}

#[derive(Deserialize)]
struct DecryptResponse {
    plaintext_b64: String,
}

#[derive(Deserialize)]
struct KmsErrorBody {
    code: Option<String>,
}

impl HttpKmsApi {
    /// Create a client for the key service at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`KmsError::Network`] if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, KmsError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .map_err(|e| KmsError::Network(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    async fn classify_failure(cmk_arn: &str, response: reqwest::Response) -> KmsError {
        let status = response.status().as_u16();
        let code = response
            .json::<KmsErrorBody>()
            .await
            .ok()
            .and_then(|body| body.code);
        match code.as_deref() {
            Some("AccessDenied") => KmsError::AccessDenied {
                cmk_arn: cmk_arn.to_string(),
            },
            Some("KeyDisabled") => KmsError::KeyDisabled {
                cmk_arn: cmk_arn.to_string(),
            },
            _ => KmsError::Service { status },
        }
    }
}

#[async_trait]
impl KmsApi for HttpKmsApi {
    async fn generate_data_key(
        &self,
        cmk_arn: &str,
        context: &BTreeMap<String, String>,
    ) -> Result<KmsDataKey, KmsError> {
        use base64::Engine as _;

        let response = self
            .client
            .post(format!("{}/v1/keys/generate", self.endpoint))
            .json(&serde_json::json!({
                "cmkArn": cmk_arn,
                "keySpec": "AES_256",
                "encryptionContext": context,
            }))
            .send()
            .await
            .map_err(|e| KmsError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::classify_failure(cmk_arn, response).await);
        }
        debug!(cmk_arn, "Generated data key");

        let body: GenerateDataKeyResponse = response
            .json()
            .await
            .map_err(|e| KmsError::InvalidResponse(e.to_string()))?;
        let engine = base64::engine::general_purpose::STANDARD;
        let plaintext = engine
            .decode(&body.plaintext_b64)
            .map_err(|e| KmsError::InvalidResponse(e.to_string()))?;
        let wrapped = engine
            .decode(&body.wrapped_b64)
            .map_err(|e| KmsError::InvalidResponse(e.to_string()))?;
        Ok(KmsDataKey { plaintext, wrapped })
    }

    async fn decrypt_data_key(
        &self,
        cmk_arn: &str,
        wrapped: &[u8],
        context: &BTreeMap<String, String>,
    ) -> Result<Vec<u8>, KmsError> {
        use base64::Engine as _;

        let engine = base64::engine::general_purpose::STANDARD;
        let response = self
            .client
            .post(format!("{}/v1/keys/decrypt", self.endpoint))
            .json(&serde_json::json!({
                "cmkArn": cmk_arn,
                "wrapped_b64": engine.encode(wrapped),
                "encryptionContext": context,
            }))
            .send()
            .await
            .map_err(|e| KmsError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::classify_failure(cmk_arn, response).await);
        }

        let body: DecryptResponse = response
            .json()
            .await
            .map_err(|e| KmsError::InvalidResponse(e.to_string()))?;
        engine
            .decode(&body.plaintext_b64)
            .map_err(|e| KmsError::InvalidResponse(e.to_string()))
    }
}

impl std::fmt::Debug for HttpKmsApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpKmsApi")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(KmsError::Network("timeout".into()).is_retryable());
        assert!(KmsError::Service { status: 503 }.is_retryable());
        assert!(!KmsError::Service { status: 400 }.is_retryable());
        assert!(!KmsError::AccessDenied {
            cmk_arn: "arn:x".into()
        }
        .is_retryable());
        assert!(!KmsError::KeyDisabled {
            cmk_arn: "arn:x".into()
        }
        .is_retryable());
    }
}
