//! Environment variable fallback.
//!
//! Env vars are **fallback**, not override: they fill only fields the
//! embedder left empty, so explicit configuration always wins.

use tracing::debug;

use crate::types::AuditConfig;

/// `WITNESS_*` fallback variables.
const ENV_TENANT_ID: &str = "WITNESS_TENANT_ID";
const ENV_API_KEY: &str = "WITNESS_API_KEY";
const ENV_INGEST_URL: &str = "WITNESS_INGEST_URL";
const ENV_CMK_ARN: &str = "WITNESS_CMK_ARN";
const ENV_KMS_URL: &str = "WITNESS_KMS_URL";
const ENV_DATA_DIR: &str = "WITNESS_DATA_DIR";
const ENV_LOG_LEVEL: &str = "WITNESS_LOG_LEVEL";

fn fallback(field: &mut String, var: &str) {
    if field.is_empty() {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                debug!(var, "Applied env fallback");
                *field = value;
            }
        }
    }
}

/// Fill unset fields of `config` from the environment.
pub fn apply_env_fallback(config: &mut AuditConfig) {
    fallback(&mut config.tenant_id, ENV_TENANT_ID);
    fallback(&mut config.api_key, ENV_API_KEY);
    fallback(&mut config.ingest_url, ENV_INGEST_URL);
    fallback(&mut config.cmk_arn, ENV_CMK_ARN);

    if config.kms_url.is_none() {
        if let Ok(value) = std::env::var(ENV_KMS_URL) {
            if !value.is_empty() {
                config.kms_url = Some(value);
            }
        }
    }

    if config.data_dir.as_os_str().is_empty() {
        if let Ok(value) = std::env::var(ENV_DATA_DIR) {
            if !value.is_empty() {
                config.data_dir = value.into();
            }
        }
    }

    // Level "": embedder asked for the environment's choice.
    if config.logging.level.is_empty() {
        if let Ok(value) = std::env::var(ENV_LOG_LEVEL) {
            if !value.is_empty() {
                config.logging.level = value;
            }
        }
    }
}
