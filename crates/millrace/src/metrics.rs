//! Engine counters and the periodic metrics collector.
//!
//! The dispatcher and its request tasks bump lock-free counters on
//! [`EngineStats`]; the [`MetricsCollector`] runs as an independent periodic
//! task that samples them and pushes named values to a [`MetricsSink`]. The
//! collector only ever reads atomics, so it can never block or skew
//! dispatcher timing, and sampling continues until its cancellation token
//! fires.

use core::time::Duration;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Metric names emitted by the collector.
pub mod names {
    pub const ACTIVE_WORKERS: &str = "active_workers";
    pub const PROCESSED_TOTAL: &str = "processed_total";
    pub const FAILED_TOTAL: &str = "failed_total";
    pub const CANCELLED_TOTAL: &str = "cancelled_total";
    pub const QUEUE_WAIT_MS: &str = "queue_wait_ms";
    pub const DEGRADED: &str = "degraded";
}

/// Push boundary to an external telemetry system.
///
/// Implementations must be cheap and non-blocking; they are called from the
/// collector's sampling task on every tick.
pub trait MetricsSink: Send + Sync + 'static {
    fn observe(&self, name: &str, value: f64);
}

/// Shared lock-free counters updated by the dispatcher and sampled by the
/// collector.
#[derive(Debug, Default)]
pub struct EngineStats {
    active_workers: AtomicUsize,
    processed_total: AtomicU64,
    failed_total: AtomicU64,
    cancelled_total: AtomicU64,
    queue_wait_micros: AtomicU64,
    queue_waits: AtomicU64,
    degraded: AtomicBool,
}

impl EngineStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn worker_finished(&self) {
        self.active_workers.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_processed(&self) {
        self.processed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_queue_wait(&self, wait: Duration) {
        self.queue_wait_micros
            .fetch_add(wait.as_micros() as u64, Ordering::Relaxed);
        self.queue_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::Relaxed);
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Relaxed)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_workers: self.active_workers.load(Ordering::Relaxed),
            processed_total: self.processed_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
            cancelled_total: self.cancelled_total.load(Ordering::Relaxed),
            queue_wait_micros: self.queue_wait_micros.load(Ordering::Relaxed),
            queue_waits: self.queue_waits.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of the engine counters.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub active_workers: usize,
    pub processed_total: u64,
    pub failed_total: u64,
    pub cancelled_total: u64,
    pub queue_wait_micros: u64,
    pub queue_waits: u64,
    pub degraded: bool,
}

impl StatsSnapshot {
    /// Mean queue wait in milliseconds over everything recorded so far.
    pub fn mean_queue_wait_ms(&self) -> f64 {
        if self.queue_waits == 0 {
            0.0
        } else {
            self.queue_wait_micros as f64 / self.queue_waits as f64 / 1_000.0
        }
    }
}

/// Periodic sampler pushing engine counters to a [`MetricsSink`].
pub struct MetricsCollector {
    stats: Arc<EngineStats>,
    sink: Arc<dyn MetricsSink>,
    interval: Duration,
    last: StatsSnapshot,
}

impl MetricsCollector {
    pub fn new(stats: Arc<EngineStats>, sink: Arc<dyn MetricsSink>, interval: Duration) -> Self {
        let last = stats.snapshot();
        Self {
            stats,
            sink,
            interval,
            last,
        }
    }

    /// Samples on a fixed interval until `cancel` fires.
    ///
    /// Intended to be spawned alongside the dispatcher:
    ///
    /// ```ignore
    /// tokio::spawn(collector.run(token.clone()));
    /// ```
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = tick.tick() => self.sample(),
            }
        }
        // A final sample so shutdown totals are not lost.
        self.sample();
    }

    fn sample(&mut self) {
        let current = self.stats.snapshot();

        self.sink
            .observe(names::ACTIVE_WORKERS, current.active_workers as f64);
        self.sink
            .observe(names::PROCESSED_TOTAL, current.processed_total as f64);
        self.sink
            .observe(names::FAILED_TOTAL, current.failed_total as f64);
        self.sink
            .observe(names::CANCELLED_TOTAL, current.cancelled_total as f64);
        self.sink
            .observe(names::DEGRADED, if current.degraded { 1.0 } else { 0.0 });

        // Mean wait over the requests dispatched since the previous sample.
        let waits = current.queue_waits.saturating_sub(self.last.queue_waits);
        let micros = current
            .queue_wait_micros
            .saturating_sub(self.last.queue_wait_micros);
        let mean_ms = if waits == 0 {
            0.0
        } else {
            micros as f64 / waits as f64 / 1_000.0
        };
        self.sink.observe(names::QUEUE_WAIT_MS, mean_ms);

        self.last = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        observed: Mutex<Vec<(String, f64)>>,
    }

    impl MetricsSink for RecordingSink {
        fn observe(&self, name: &str, value: f64) {
            self.observed.lock().push((name.to_string(), value));
        }
    }

    impl RecordingSink {
        fn last(&self, name: &str) -> Option<f64> {
            self.observed
                .lock()
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, v)| *v)
        }
    }

    #[test]
    fn snapshot_reflects_recorded_counters() {
        let stats = EngineStats::new();
        stats.worker_started();
        stats.record_processed();
        stats.record_failed();
        stats.record_queue_wait(Duration::from_millis(4));
        stats.record_queue_wait(Duration::from_millis(2));

        let snap = stats.snapshot();
        assert_eq!(snap.active_workers, 1);
        assert_eq!(snap.processed_total, 1);
        assert_eq!(snap.failed_total, 1);
        assert_eq!(snap.queue_waits, 2);
        assert!((snap.mean_queue_wait_ms() - 3.0).abs() < 0.01);
    }

    #[test]
    fn snapshot_serializes() {
        let stats = EngineStats::new();
        stats.record_processed();
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["processed_total"], 1);
        assert_eq!(json["degraded"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn collector_pushes_named_counters() {
        let stats = EngineStats::new();
        let sink = Arc::new(RecordingSink::default());
        let collector = MetricsCollector::new(
            Arc::clone(&stats),
            Arc::clone(&sink) as Arc<dyn MetricsSink>,
            Duration::from_millis(100),
        );

        stats.record_processed();
        stats.record_processed();
        stats.record_failed();
        stats.set_degraded(true);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(collector.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(sink.last(names::PROCESSED_TOTAL), Some(2.0));
        assert_eq!(sink.last(names::FAILED_TOTAL), Some(1.0));
        assert_eq!(sink.last(names::DEGRADED), Some(1.0));
        assert_eq!(sink.last(names::QUEUE_WAIT_MS), Some(0.0));
    }
}
