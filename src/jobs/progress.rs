//! Batch progress accounting.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Point-in-time view of a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressStats {
    pub processed: u64,
    pub total: u64,
    pub qps: f64,
    pub avg_latency_ms: f64,
    pub fail_rate: f64,
    pub eta_sec: f64,
    pub elapsed_sec: f64,
    pub failed: u64,
}

/// Lock-free counters updated by workers.
///
/// Domains restored from a snapshot count as processed from the start, so
/// `processed` never goes below what a previous run reached.
#[derive(Debug)]
pub struct ProgressTracker {
    total: u64,
    resumed: u64,
    processed: AtomicU64,
    failed: AtomicU64,
    latency_ms: AtomicU64,
    started_at: Instant,
}

impl ProgressTracker {
    pub fn new(total: usize, resumed: usize) -> Self {
        Self {
            total: total as u64,
            resumed: resumed as u64,
            processed: AtomicU64::new(resumed as u64),
            failed: AtomicU64::new(0),
            latency_ms: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn record(&self, latency: Duration, failed: bool) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> JobProgressStats {
        let processed = self.processed();
        let failed = self.failed.load(Ordering::Relaxed);
        let latency_ms = self.latency_ms.load(Ordering::Relaxed);
        let fresh = processed.saturating_sub(self.resumed);

        let elapsed_sec = self.started_at.elapsed().as_secs_f64().max(0.001);
        let qps = fresh as f64 / elapsed_sec;
        let remaining = self.total.saturating_sub(processed);

        JobProgressStats {
            processed,
            total: self.total,
            qps,
            avg_latency_ms: if fresh > 0 { latency_ms as f64 / fresh as f64 } else { 0.0 },
            fail_rate: if fresh > 0 { failed as f64 / fresh as f64 } else { 0.0 },
            eta_sec: if qps > 0.0 { remaining as f64 / qps } else { 0.0 },
            elapsed_sec,
            failed,
        }
    }

    pub fn log(&self) {
        let stats = self.stats();
        tracing::info!(
            processed = stats.processed,
            total = stats.total,
            qps = %format!("{:.2}", stats.qps),
            avg_ms = stats.avg_latency_ms.round() as u64,
            fails = stats.failed,
            eta_s = stats.eta_sec.round() as u64,
            "progress"
        );
    }

    /// Log a progress line every `interval` until the handle is aborted.
    pub fn spawn_reporter(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracker.log();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn should_compute_rates() {
        let tracker = ProgressTracker::new(10, 0);
        tracker.record(Duration::from_millis(100), false);
        tracker.record(Duration::from_millis(300), true);
        tokio::time::advance(Duration::from_secs(2)).await;

        let stats = tracker.stats();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.failed, 1);
        assert!((stats.avg_latency_ms - 200.0).abs() < f64::EPSILON);
        assert!((stats.fail_rate - 0.5).abs() < f64::EPSILON);
        assert!((stats.qps - 1.0).abs() < 1e-9);
        assert!((stats.eta_sec - 8.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn should_start_from_resumed_count() {
        let tracker = ProgressTracker::new(5, 3);
        assert_eq!(tracker.stats().processed, 3);
        assert_eq!(tracker.stats().qps, 0.0);

        tracker.record(Duration::from_millis(10), false);
        let stats = tracker.stats();
        assert_eq!(stats.processed, 4);
        assert!((stats.avg_latency_ms - 10.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn should_report_zero_without_work() {
        let stats = ProgressTracker::new(0, 0).stats();
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.eta_sec, 0.0);
        assert_eq!(stats.fail_rate, 0.0);
    }

    #[test]
    fn should_serialize_camel_case() {
        let json = serde_json::to_value(JobProgressStats::default()).unwrap();
        assert!(json.get("avgLatencyMs").is_some());
        assert!(json.get("etaSec").is_some());
    }
}
