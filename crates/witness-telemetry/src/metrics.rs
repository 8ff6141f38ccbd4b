//! In-process metrics registry.
//!
//! Counters, gauges, and latency histograms backed by atomics, cheap enough
//! to update on the hot path and safe to read from any thread. Embedders
//! get a cloneable handle and can export a [`MetricsSnapshot`] into their
//! own metrics system.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upper bounds (milliseconds) of the latency histogram buckets; the last
/// bucket is unbounded.
const LATENCY_BUCKETS_MS: [u64; 8] = [1, 2, 5, 10, 25, 50, 100, 250];

#[derive(Debug, Default)]
struct Histogram {
    buckets: [AtomicU64; 9],
    count: AtomicU64,
    sum_micros: AtomicU64,
}

impl Histogram {
    fn record(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        let idx = LATENCY_BUCKETS_MS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros.fetch_add(
            u64::try_from(latency.as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let mut buckets = [0u64; 9];
        for (slot, bucket) in buckets.iter_mut().zip(self.buckets.iter()) {
            *slot = bucket.load(Ordering::Relaxed);
        }
        HistogramSnapshot {
            buckets,
            count: self.count.load(Ordering::Relaxed),
            sum_micros: self.sum_micros.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of one histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramSnapshot {
    /// Counts per bucket; bucket `i` covers latencies up to
    /// `LATENCY_BUCKETS_MS[i]`, with a final unbounded bucket.
    pub buckets: [u64; 9],
    /// Total samples.
    pub count: u64,
    /// Sum of all samples in microseconds.
    pub sum_micros: u64,
}

impl HistogramSnapshot {
    /// Mean sample latency, if any samples were recorded.
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        if self.count == 0 {
            None
        } else {
            Some(Duration::from_micros(self.sum_micros / self.count))
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    records_enqueued: AtomicU64,
    records_delivered: AtomicU64,
    records_dropped: AtomicU64,
    flush_failures: AtomicU64,
    backpressure_rejections: AtomicU64,
    outbox_warnings: AtomicU64,
    queue_depth: AtomicU64,
    ring_len: AtomicU64,
    outbox_bytes: AtomicU64,
    encrypt_latency: Histogram,
    flush_latency: Histogram,
}

/// Cloneable handle to the pipeline's metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    inner: Arc<Inner>,
}

impl MetricsRegistry {
    /// Create a fresh registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A record passed `enqueue` successfully.
    pub fn record_enqueued(&self) {
        self.inner.records_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Records acknowledged by the ingest endpoint.
    pub fn records_delivered(&self, n: u64) {
        self.inner.records_delivered.fetch_add(n, Ordering::Relaxed);
    }

    /// A record was dropped before delivery (encoding/crypto failure,
    /// unparseable journal line).
    pub fn record_dropped(&self) {
        self.inner.records_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// A flush attempt failed.
    pub fn flush_failed(&self) {
        self.inner.flush_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// An enqueue was refused for backpressure.
    pub fn backpressure_rejected(&self) {
        self.inner
            .backpressure_rejections
            .fetch_add(1, Ordering::Relaxed);
    }

    /// An append landed in the outbox warning band (over 80% of the cap).
    pub fn outbox_warning(&self) {
        self.inner.outbox_warnings.fetch_add(1, Ordering::Relaxed);
    }

    /// Set the pending-record gauge (outbox line count).
    pub fn set_queue_depth(&self, depth: u64) {
        self.inner.queue_depth.store(depth, Ordering::Relaxed);
    }

    /// Set the ring-length gauge.
    pub fn set_ring_len(&self, len: u64) {
        self.inner.ring_len.store(len, Ordering::Relaxed);
    }

    /// Set the outbox-size gauge (bytes).
    pub fn set_outbox_bytes(&self, bytes: u64) {
        self.inner.outbox_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Sample an envelope-encryption latency.
    pub fn observe_encrypt_latency(&self, latency: Duration) {
        self.inner.encrypt_latency.record(latency);
    }

    /// Sample a flush latency.
    pub fn observe_flush_latency(&self, latency: Duration) {
        self.inner.flush_latency.record(latency);
    }

    /// Current values of every metric.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = &self.inner;
        MetricsSnapshot {
            records_enqueued: inner.records_enqueued.load(Ordering::Relaxed),
            records_delivered: inner.records_delivered.load(Ordering::Relaxed),
            records_dropped: inner.records_dropped.load(Ordering::Relaxed),
            flush_failures: inner.flush_failures.load(Ordering::Relaxed),
            backpressure_rejections: inner.backpressure_rejections.load(Ordering::Relaxed),
            outbox_warnings: inner.outbox_warnings.load(Ordering::Relaxed),
            queue_depth: inner.queue_depth.load(Ordering::Relaxed),
            ring_len: inner.ring_len.load(Ordering::Relaxed),
            outbox_bytes: inner.outbox_bytes.load(Ordering::Relaxed),
            encrypt_latency: inner.encrypt_latency.snapshot(),
            flush_latency: inner.flush_latency.snapshot(),
        }
    }
}

/// Point-in-time view of every pipeline metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Records accepted by `enqueue`.
    pub records_enqueued: u64,
    /// Records acknowledged by the ingest endpoint.
    pub records_delivered: u64,
    /// Records dropped before delivery.
    pub records_dropped: u64,
    /// Failed flush attempts.
    pub flush_failures: u64,
    /// Enqueues refused for backpressure.
    pub backpressure_rejections: u64,
    /// Appends that landed in the outbox warning band.
    pub outbox_warnings: u64,
    /// Pending records (outbox lines).
    pub queue_depth: u64,
    /// Ring buffer length.
    pub ring_len: u64,
    /// Outbox file size in bytes.
    pub outbox_bytes: u64,
    /// Envelope encryption latency.
    pub encrypt_latency: HistogramSnapshot,
    /// Flush latency.
    pub flush_latency: HistogramSnapshot,
}
