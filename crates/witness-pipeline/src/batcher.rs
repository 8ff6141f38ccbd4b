//! Batch composition and delivery.
//!
//! The batcher owns the ring, the outbox handle, and the transport. A
//! periodic timer and a size threshold both funnel into `flush_once`, which
//! holds the flush lock for its whole run, so at most one flush is ever in
//! its HTTP phase and outbox reads never race the truncation that follows.

use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use witness_core::retry::{retry, RetryOutcome, RetryPolicy};
use witness_core::QueuedRecord;
use witness_store::{Outbox, RingBuffer};
use witness_telemetry::MetricsRegistry;

use crate::error::{PipelineError, PipelineResult};
use crate::shutdown::ShutdownPhase;
use crate::transport::{post_with_retry, IngestTransport};

/// Batching knobs, projected from the embedder's configuration.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Tenant identifier stamped on every ingest body.
    pub tenant_id: String,
    /// Records per batch.
    pub batch_size: usize,
    /// Periodic flush interval.
    pub flush_interval: Duration,
    /// Flush attempts for the ring drain at shutdown.
    pub drain_ring_retries: u32,
    /// Flush attempts per round for the outbox drain at shutdown.
    pub drain_outbox_retries: u32,
    /// Total drain deadline.
    pub drain_deadline: Duration,
}

/// Outcome of a shutdown drain, for orchestrators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Whether the outbox was emptied before the deadline.
    pub complete: bool,
    /// Records still pending when the drain stopped.
    pub remaining: usize,
}

impl DrainReport {
    /// Process exit code: 0 when every record was delivered, 1 otherwise,
    /// so orchestrators can detect data loss.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.complete)
    }
}

struct BatcherInner {
    config: BatcherConfig,
    ring: std::sync::Mutex<RingBuffer<QueuedRecord>>,
    outbox: Arc<Outbox>,
    transport: Arc<dyn IngestTransport>,
    metrics: MetricsRegistry,
    flush_lock: tokio::sync::Mutex<()>,
    draining: AtomicBool,
}

/// Composes batches from the ring and the outbox and drives delivery.
#[derive(Clone)]
pub struct Batcher {
    inner: Arc<BatcherInner>,
}

impl Batcher {
    /// Create a batcher. The ring capacity is `2 * batch_size`.
    #[must_use]
    pub fn new(
        config: BatcherConfig,
        outbox: Arc<Outbox>,
        transport: Arc<dyn IngestTransport>,
        metrics: MetricsRegistry,
    ) -> Self {
        let ring = RingBuffer::new(config.batch_size.saturating_mul(2));
        Self {
            inner: Arc::new(BatcherInner {
                config,
                ring: std::sync::Mutex::new(ring),
                outbox,
                transport,
                metrics,
                flush_lock: tokio::sync::Mutex::new(()),
                draining: AtomicBool::new(false),
            }),
        }
    }

    /// The outbox behind this batcher.
    #[must_use]
    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.inner.outbox
    }

    /// Current ring length.
    #[must_use]
    pub fn ring_len(&self) -> usize {
        self.lock_ring().len()
    }

    fn lock_ring(&self) -> std::sync::MutexGuard<'_, RingBuffer<QueuedRecord>> {
        self.inner
            .ring
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// Accept one chain-linked record: journal it durably, mirror it into
    /// the ring, and schedule an opportunistic flush once a full batch is
    /// buffered.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Shutdown`] once draining has begun.
    /// - [`PipelineError::Backpressure`] when the outbox is saturated.
    /// - [`PipelineError::Store`] on journal failure.
    pub async fn enqueue(&self, record: QueuedRecord) -> PipelineResult<()> {
        if self.is_draining() {
            return Err(PipelineError::Shutdown);
        }

        let metrics = &self.inner.metrics;
        let size = match self.inner.outbox.append(&record.payload).await {
            Ok(size) => size,
            Err(e) => {
                let e: PipelineError = e.into();
                if matches!(e, PipelineError::Backpressure { .. }) {
                    metrics.backpressure_rejected();
                }
                return Err(e);
            },
        };
        metrics.set_outbox_bytes(size);
        if size > witness_store::WARN_FILE_BYTES {
            metrics.outbox_warning();
        }

        let ring_len = {
            let mut ring = self.lock_ring();
            if let Some(evicted) = ring.push(record) {
                // Still on disk; it will be read back at flush time.
                debug!(leaf_hash = %evicted.leaf_hash, "Ring full; evicted oldest record");
            }
            ring.len()
        };
        metrics.set_ring_len(ring_len as u64);
        metrics.record_enqueued();

        if ring_len >= self.inner.config.batch_size && !self.is_draining() {
            let batcher = self.clone();
            tokio::spawn(async move {
                if let Err(e) = batcher.flush_once().await {
                    warn!(error = %e, "Opportunistic flush failed");
                }
            });
        }
        Ok(())
    }

    /// Run one flush if no flush is currently running; otherwise a no-op.
    ///
    /// Returns the number of records delivered (0 for a no-op or an empty
    /// queue).
    ///
    /// # Errors
    ///
    /// Returns the delivery or journal error; dripped records have been
    /// restored to the ring.
    pub async fn flush_once(&self) -> PipelineResult<usize> {
        let Ok(_guard) = self.inner.flush_lock.try_lock() else {
            return Ok(0);
        };
        self.flush_locked(None).await
    }

    /// Run one flush, waiting for any in-flight flush to finish first.
    async fn flush_wait(&self, deadline: Option<Instant>) -> PipelineResult<usize> {
        let _guard = self.inner.flush_lock.lock().await;
        self.flush_locked(deadline).await
    }

    async fn flush_locked(&self, deadline: Option<Instant>) -> PipelineResult<usize> {
        let inner = &self.inner;
        let batch_size = inner.config.batch_size;
        let started = Instant::now();

        let dripped = {
            let mut ring = self.lock_ring();
            let dripped = ring.drip(batch_size);
            inner.metrics.set_ring_len(ring.len() as u64);
            dripped
        };

        let composed = match self.compose(&dripped).await {
            Ok(composed) => composed,
            Err(e) => {
                self.restore(dripped);
                return Err(e);
            },
        };

        if composed.batch.is_empty() {
            // Nothing deliverable. A head of pure garbage is truncated away
            // here so it cannot wedge the queue.
            if composed.disk_consumed > 0 {
                self.drop_garbage(composed.garbage);
                inner.outbox.truncate_prefix(composed.disk_consumed).await?;
            }
            return Ok(0);
        }

        let body = self.build_body(&composed.batch);
        let idempotency_key = composed.batch[0].leaf_hash.clone();
        let delivered = composed.batch.len();

        match post_with_retry(&*inner.transport, &body, &idempotency_key, deadline).await {
            Ok(()) => {},
            Err(e) => {
                // The dripped records stay pending: back into the ring they
                // go (their journal lines were never truncated).
                self.restore(dripped);
                inner.metrics.flush_failed();
                return Err(e.into());
            },
        }

        self.drop_garbage(composed.garbage);
        inner.outbox.truncate_prefix(composed.disk_consumed).await?;

        let metrics = &inner.metrics;
        metrics.records_delivered(delivered as u64);
        metrics.observe_flush_latency(started.elapsed());
        metrics.set_queue_depth(
            composed.total_disk.saturating_sub(composed.disk_consumed) as u64,
        );
        metrics.set_outbox_bytes(inner.outbox.len_bytes().await);

        debug!(
            delivered,
            truncated = composed.disk_consumed,
            "Flush delivered a batch"
        );
        Ok(delivered)
    }

    /// Compose a batch: dripped ring records first, topped up from the head
    /// of the outbox. Journal lines already represented in the batch count
    /// toward the truncation prefix without being duplicated into it.
    async fn compose(&self, dripped: &[QueuedRecord]) -> PipelineResult<Composed> {
        let inner = &self.inner;
        let batch_size = inner.config.batch_size;

        let mut batch: Vec<QueuedRecord> = dripped.to_vec();
        let mut batch_hashes: HashSet<String> =
            batch.iter().map(|r| r.leaf_hash.clone()).collect();

        let head = inner.outbox.stream_head(batch_size).await?;
        inner.metrics.set_queue_depth(head.total_lines as u64);

        let mut disk_consumed = 0usize;
        let mut garbage = 0usize;
        for entry in head.entries {
            let Some(payload) = entry else {
                // Unparseable line; consumed with the prefix and reported
                // as a drop.
                disk_consumed += 1;
                garbage += 1;
                continue;
            };
            let leaf_hash = payload
                .get("leaf_hash")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if leaf_hash.is_empty() {
                disk_consumed += 1;
                garbage += 1;
                continue;
            }
            if batch_hashes.contains(&leaf_hash) {
                // The journal line for a record already in this batch.
                disk_consumed += 1;
                continue;
            }
            if batch.len() >= batch_size {
                break;
            }
            batch_hashes.insert(leaf_hash.clone());
            batch.push(QueuedRecord { payload, leaf_hash });
            disk_consumed += 1;
        }

        Ok(Composed {
            batch,
            disk_consumed,
            garbage,
            total_disk: head.total_lines,
        })
    }

    fn build_body(&self, batch: &[QueuedRecord]) -> Value {
        let records: Vec<Value> = batch
            .iter()
            .map(|r| json!({ "payload": r.payload, "leafHash": r.leaf_hash }))
            .collect();
        json!({
            "tenantId": self.inner.config.tenant_id,
            "records": records,
        })
    }

    fn restore(&self, dripped: Vec<QueuedRecord>) {
        if dripped.is_empty() {
            return;
        }
        let mut ring = self.lock_ring();
        ring.restore_front(dripped);
        self.inner.metrics.set_ring_len(ring.len() as u64);
    }

    fn drop_garbage(&self, garbage: usize) {
        if garbage > 0 {
            error!(count = garbage, "Dropping unparseable outbox lines");
            for _ in 0..garbage {
                self.inner.metrics.record_dropped();
            }
        }
    }

    /// Flush with the shutdown retry schedule: `500 * 2^(n-1)` ms delays
    /// capped at 4000 ms, up to `max_attempts` attempts.
    ///
    /// # Errors
    ///
    /// Returns the last flush error once attempts are exhausted.
    pub async fn flush_with_retry(
        &self,
        max_attempts: u32,
        deadline: Option<Instant>,
    ) -> PipelineResult<usize> {
        let policy = RetryPolicy::flush(max_attempts);
        let outcome = retry(
            &policy,
            deadline,
            |_attempt| self.flush_wait(deadline),
            PipelineError::is_retryable,
        )
        .await;
        match outcome {
            RetryOutcome::Success(delivered) => Ok(delivered),
            RetryOutcome::Exhausted { error, attempts }
            | RetryOutcome::DeadlineElapsed { error, attempts } => {
                warn!(attempts, error = %error, "Flush retries exhausted");
                Err(error)
            },
        }
    }

    /// Stop accepting records. Called once by the shutdown path.
    pub fn begin_drain(&self) {
        self.inner.draining.store(true, Ordering::SeqCst);
        self.inner.outbox.begin_shutdown();
    }

    /// Drain the pipeline to empty (or to the deadline).
    ///
    /// Refuses new records, drains the ring with a short retry schedule, then
    /// drains the outbox round by round until the journal is empty, a round
    /// fails outright, or the deadline passes.
    pub async fn drain(&self) -> DrainReport {
        let config = &self.inner.config;
        let deadline = Instant::now() + config.drain_deadline;
        self.begin_drain();

        // Ring first: its records are the freshest and cheapest to ship.
        if let Err(e) = self
            .flush_with_retry(config.drain_ring_retries, Some(deadline))
            .await
        {
            warn!(error = %e, "Ring drain failed; falling through to outbox drain");
        }

        loop {
            let remaining = match self.inner.outbox.line_count().await {
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "Cannot read outbox during drain");
                    return DrainReport {
                        complete: false,
                        remaining: usize::MAX,
                    };
                },
            };
            if remaining == 0 {
                info!("Audit pipeline drained to empty");
                return DrainReport {
                    complete: true,
                    remaining: 0,
                };
            }
            if Instant::now() >= deadline {
                error!(remaining, "Drain deadline elapsed with records pending");
                return DrainReport {
                    complete: false,
                    remaining,
                };
            }
            if let Err(e) = self
                .flush_with_retry(config.drain_outbox_retries, Some(deadline))
                .await
            {
                error!(error = %e, remaining, "Outbox drain round failed");
                return DrainReport {
                    complete: false,
                    remaining,
                };
            }
        }
    }

    /// Spawn the periodic flush timer. The task stops as soon as the
    /// pipeline leaves the `Running` phase.
    pub fn spawn_timer(&self, mut phase_rx: watch::Receiver<ShutdownPhase>) -> JoinHandle<()> {
        let batcher = self.clone();
        let interval = self.inner.config.flush_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = batcher.flush_once().await {
                            warn!(error = %e, "Periodic flush failed");
                        }
                    },
                    _ = async {
                        phase_rx.wait_for(|phase| *phase != ShutdownPhase::Running).await.map(|_| ())
                    } => {
                        debug!("Flush timer cancelled");
                        break;
                    },
                }
            }
        })
    }
}

impl std::fmt::Debug for Batcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batcher")
            .field("config", &self.inner.config)
            .field("draining", &self.is_draining())
            .finish_non_exhaustive()
    }
}

struct Composed {
    batch: Vec<QueuedRecord>,
    disk_consumed: usize,
    garbage: usize,
    total_disk: usize,
}
