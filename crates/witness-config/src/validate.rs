//! Configuration validation, run once at `init`.

use crate::error::{ConfigError, ConfigResult};
use crate::types::AuditConfig;

/// Largest batch the ingest endpoint accepts.
const BATCH_SIZE_UPPER_BOUND: usize = 500;

/// Smallest useful flush interval.
const FLUSH_INTERVAL_LOWER_BOUND_MS: u64 = 10;

/// Validate a fully-assembled configuration.
///
/// # Errors
///
/// Returns the first [`ConfigError`] found.
pub fn validate(config: &AuditConfig) -> ConfigResult<()> {
    require_nonempty("tenant_id", &config.tenant_id)?;
    require_nonempty("api_key", &config.api_key)?;
    require_nonempty("cmk_arn", &config.cmk_arn)?;

    require_nonempty("ingest_url", &config.ingest_url)?;
    let url = url::Url::parse(&config.ingest_url).map_err(|e| ConfigError::ValidationError {
        field: "ingest_url".to_owned(),
        message: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::ValidationError {
            field: "ingest_url".to_owned(),
            message: format!("unsupported scheme '{}'; expected http or https", url.scheme()),
        });
    }

    if config.data_dir.as_os_str().is_empty() {
        return Err(ConfigError::MissingField {
            field: "data_dir".to_owned(),
        });
    }

    if config.batch_size == 0 || config.batch_size > BATCH_SIZE_UPPER_BOUND {
        return Err(ConfigError::ValidationError {
            field: "batch_size".to_owned(),
            message: format!("must be between 1 and {BATCH_SIZE_UPPER_BOUND}"),
        });
    }

    if config.flush_interval_ms < FLUSH_INTERVAL_LOWER_BOUND_MS {
        return Err(ConfigError::ValidationError {
            field: "flush_interval_ms".to_owned(),
            message: format!("must be at least {FLUSH_INTERVAL_LOWER_BOUND_MS}"),
        });
    }

    if config.drain_deadline_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "drain_deadline_secs".to_owned(),
            message: "must be at least 1".to_owned(),
        });
    }

    Ok(())
}

fn require_nonempty(field: &str, value: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField {
            field: field.to_owned(),
        });
    }
    Ok(())
}
