//! The embedder-facing audit client.

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Map;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

use witness_config::{apply_env_fallback, validate, AuditConfig, ConfigError};
use witness_core::{CallMeta, EncryptedBundle, HeuristicTokenCounter, TokenCounter};
use witness_crypto::{
    build_keyring, decrypt_bundle, CryptoError, EncryptionContext, HashChain, HttpKmsApi, KmsApi,
};
use witness_pipeline::{
    install_signal_handler, Batcher, BatcherConfig, DrainReport, HttpTransport, IngestTransport,
    PipelineResult, Recorder, ShutdownCoordinator, ShutdownEvent, ShutdownPhase,
};
use witness_store::Outbox;
use witness_telemetry::{setup_logging, MetricsRegistry};

use crate::error::InitResult;

/// Process-global client installed by [`AuditClient::init`].
static GLOBAL: OnceCell<Arc<AuditClient>> = OnceCell::const_new();

/// Handle to the audit pipeline.
///
/// All process-wide state (chain head, ring, outbox handle, shutdown flag)
/// lives behind this handle; there is no hidden module state besides the
/// optional [`AuditClient::init`] singleton slot.
pub struct AuditClient {
    config: AuditConfig,
    batcher: Batcher,
    recorder: Recorder,
    coordinator: Arc<ShutdownCoordinator>,
    metrics: MetricsRegistry,
    kms: Option<Arc<dyn KmsApi>>,
    drain_report: tokio::sync::Mutex<Option<DrainReport>>,
}

/// Builder for [`AuditClient`], mostly for tests that substitute
/// collaborators.
pub struct AuditClientBuilder {
    config: AuditConfig,
    transport: Option<Arc<dyn IngestTransport>>,
    kms: Option<Arc<dyn KmsApi>>,
    tokens: Arc<dyn TokenCounter>,
    handle_signals: bool,
    setup_logging: bool,
}

impl AuditClientBuilder {
    fn new(config: AuditConfig) -> Self {
        Self {
            config,
            transport: None,
            kms: None,
            tokens: Arc::new(HeuristicTokenCounter),
            handle_signals: true,
            setup_logging: true,
        }
    }

    /// Substitute the ingest transport.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn IngestTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Substitute the key service client.
    #[must_use]
    pub fn with_kms(mut self, kms: Arc<dyn KmsApi>) -> Self {
        self.kms = Some(kms);
        self
    }

    /// Substitute the token counter.
    #[must_use]
    pub fn with_token_counter(mut self, tokens: Arc<dyn TokenCounter>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Skip installing OS signal handlers (tests, or hosts that own signal
    /// dispatch and call [`AuditClient::shutdown`] themselves).
    #[must_use]
    pub fn without_signal_handler(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// Skip logging setup (the host already installed a subscriber).
    #[must_use]
    pub fn without_logging_setup(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Build and start the client: validate config, open the outbox, spawn
    /// the flush timer and (optionally) the signal handler.
    ///
    /// # Errors
    ///
    /// Returns an [`InitError`](crate::InitError) if the configuration is
    /// invalid or the outbox cannot be opened.
    pub async fn build(self) -> InitResult<Arc<AuditClient>> {
        let mut config = self.config;
        apply_env_fallback(&mut config);
        validate(&config)?;

        if self.setup_logging {
            // A host subscriber may already be installed; that is fine.
            if let Err(e) = setup_logging(&config.logging) {
                debug!(error = %e, "Logging setup skipped");
            }
        }

        let metrics = MetricsRegistry::new();
        let outbox = Arc::new(Outbox::open(&config.data_dir).await?);
        metrics.set_outbox_bytes(outbox.len_bytes().await);

        let kms: Option<Arc<dyn KmsApi>> = match (self.kms, &config.kms_url) {
            (Some(kms), _) => Some(kms),
            (None, Some(endpoint)) => Some(Arc::new(HttpKmsApi::new(endpoint.clone())?)),
            (None, None) => None,
        };
        if config.cmk_arn != witness_crypto::LOCAL_DEV_CMK_ARN && kms.is_none() {
            return Err(ConfigError::MissingField {
                field: "kms_url".to_owned(),
            }
            .into());
        }

        let transport: Arc<dyn IngestTransport> = match self.transport {
            Some(transport) => transport,
            None => {
                // Validation proved the URL parses.
                let url = Url::parse(&config.ingest_url).map_err(|e| {
                    ConfigError::ValidationError {
                        field: "ingest_url".to_owned(),
                        message: e.to_string(),
                    }
                })?;
                Arc::new(HttpTransport::new(url, config.api_key.clone())?)
            },
        };

        let batcher = Batcher::new(
            BatcherConfig {
                tenant_id: config.tenant_id.clone(),
                batch_size: config.batch_size,
                flush_interval: std::time::Duration::from_millis(config.flush_interval_ms),
                drain_ring_retries: config.drain_ring_retries,
                drain_outbox_retries: config.drain_outbox_retries,
                drain_deadline: std::time::Duration::from_secs(config.drain_deadline_secs),
            },
            Arc::clone(&outbox),
            transport,
            metrics.clone(),
        );

        let chain = Arc::new(HashChain::new());
        let recorder = Recorder::new(
            config.tenant_id.clone(),
            Map::from_iter(config.static_meta.clone()),
            config.cmk_arn.clone(),
            kms.clone(),
            chain,
            batcher.clone(),
            metrics.clone(),
            self.tokens,
        );

        let coordinator = Arc::new(ShutdownCoordinator::new());
        // Detached; it exits on its own when the phase leaves Running.
        let _ = batcher.spawn_timer(coordinator.subscribe());

        let client = Arc::new(AuditClient {
            config,
            batcher,
            recorder,
            coordinator: Arc::clone(&coordinator),
            metrics,
            kms,
            drain_report: tokio::sync::Mutex::new(None),
        });

        if self.handle_signals {
            let _ = install_signal_handler(Arc::clone(&coordinator));
        }
        // Whoever flips the phase (signal or explicit call), one task runs
        // the drain.
        client.clone().spawn_drain_watcher();

        info!(
            tenant_id = %client.config.tenant_id,
            batch_size = client.config.batch_size,
            "Witness audit pipeline started"
        );
        Ok(client)
    }
}

impl AuditClient {
    /// Start building a client with substituted collaborators.
    #[must_use]
    pub fn builder(config: AuditConfig) -> AuditClientBuilder {
        AuditClientBuilder::new(config)
    }

    /// Create an independent (non-global) client. Used by tests and by
    /// hosts embedding several tenants in one process.
    ///
    /// # Errors
    ///
    /// Returns an [`InitError`](crate::InitError) if the configuration is
    /// invalid or the outbox cannot be opened.
    pub async fn new(config: AuditConfig) -> InitResult<Arc<Self>> {
        Self::builder(config).build().await
    }

    /// Initialize the process-global client. Idempotent: the first call
    /// wins and later calls return the existing handle.
    ///
    /// # Errors
    ///
    /// Returns an [`InitError`](crate::InitError) from the first (winning)
    /// initialization.
    pub async fn init(config: AuditConfig) -> InitResult<Arc<Self>> {
        let client = GLOBAL
            .get_or_try_init(|| async { Self::new(config).await })
            .await?;
        Ok(Arc::clone(client))
    }

    /// Wrap an async LLM function.
    ///
    /// The wrapped function behaves identically to `f`: its result or error
    /// comes back untouched. On success, the call is timed and audited in
    /// the background pipeline; audit failures are logged and counted, never
    /// surfaced.
    pub fn wrap_llm<F, Fut, P, R, E>(
        self: &Arc<Self>,
        meta: CallMeta,
        f: F,
    ) -> impl Fn(P) -> BoxFuture<'static, Result<R, E>>
    where
        F: Fn(P) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        P: Serialize + Send + 'static,
        R: Serialize + Send + 'static,
        E: Send + 'static,
    {
        let client = Arc::clone(self);
        move |prompt: P| {
            let client = Arc::clone(&client);
            let meta = meta.clone();
            let f = f.clone();
            Box::pin(async move {
                // Snapshot the prompt before handing it to the call.
                let prompt_value = serde_json::to_value(&prompt);
                let started = Instant::now();
                let result = f(prompt).await;

                if let Ok(response) = &result {
                    let latency = started.elapsed();
                    match (prompt_value, serde_json::to_value(response)) {
                        (Ok(prompt), Ok(response)) => {
                            client
                                .recorder
                                .capture_logged(&meta, &prompt, &response, latency)
                                .await;
                        },
                        (Err(e), _) | (_, Err(e)) => {
                            client.metrics.record_dropped();
                            warn!(error = %e, "LLM call not auditable; value not serializable");
                        },
                    }
                }
                result
            })
        }
    }

    /// Decrypt a bundle produced by this tenant's pipeline. For audit
    /// tooling; the hot path never decrypts.
    ///
    /// # Errors
    ///
    /// Returns a [`CryptoError`] if the keyring cannot be built or the
    /// bundle fails authentication.
    pub async fn decrypt_bundle(&self, bundle: &EncryptedBundle) -> Result<Vec<u8>, CryptoError> {
        let keyring = build_keyring(&self.config.cmk_arn, self.kms.clone())?;
        let mut context = EncryptionContext::new();
        context.insert("org_id".to_string(), self.config.tenant_id.clone());
        decrypt_bundle(keyring.as_ref(), bundle, &context).await
    }

    /// Force one flush now (no-op if a flush is already running).
    ///
    /// # Errors
    ///
    /// Returns the flush error, with dripped records already restored.
    pub async fn flush(&self) -> PipelineResult<usize> {
        self.batcher.flush_once().await
    }

    /// The pipeline's metrics registry.
    #[must_use]
    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// The effective configuration.
    #[must_use]
    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> ShutdownPhase {
        self.coordinator.phase()
    }

    /// Drain and stop the pipeline.
    ///
    /// Refuses new records, cancels the timer, drains the ring and then the
    /// outbox within the configured deadline. Safe to call more than once;
    /// later calls return the first drain's report.
    pub async fn shutdown(&self) -> DrainReport {
        self.coordinator.begin_drain(ShutdownEvent::Requested);

        let mut slot = self.drain_report.lock().await;
        if let Some(report) = *slot {
            return report;
        }
        let report = self.batcher.drain().await;
        self.coordinator.mark_stopped();
        *slot = Some(report);
        report
    }

    /// Exit code for orchestrators: 0 when the last drain delivered
    /// everything, 1 when records were abandoned, `None` before any drain.
    pub async fn drain_exit_code(&self) -> Option<i32> {
        self.drain_report
            .lock()
            .await
            .as_ref()
            .map(DrainReport::exit_code)
    }

    fn spawn_drain_watcher(self: Arc<Self>) {
        let mut phase_rx = self.coordinator.subscribe();
        tokio::spawn(async move {
            if phase_rx
                .wait_for(|phase| *phase != ShutdownPhase::Running)
                .await
                .is_err()
            {
                return;
            }
            let report = self.shutdown().await;
            if !report.complete {
                warn!(remaining = report.remaining, "Audit drain abandoned records");
            }
        });
    }
}

impl std::fmt::Debug for AuditClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditClient")
            .field("config", &self.config)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
