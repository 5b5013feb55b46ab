//! Resolver hit/miss counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-wide resolver counters, owned explicitly instead of living in a
/// global so independent resolvers keep independent numbers.
#[derive(Debug, Default)]
pub struct StatsCollector {
    hits: AtomicU64,
    misses: AtomicU64,
    time_spent_ms: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lookup that went to the network and how long it took.
    pub fn record_miss(&self, elapsed_ms: u64) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.time_spent_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    /// Zero all counters at the start of a batch.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.time_spent_ms.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DohStats {
        DohStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            time_spent_ms: self.time_spent_ms.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the resolver counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DohStats {
    pub hits: u64,
    pub misses: u64,
    pub time_spent_ms: u64,
}

impl DohStats {
    pub const fn queries(&self) -> u64 {
        self.hits + self.misses
    }

    /// Hit rate in percent.
    pub fn hit_rate(&self) -> f64 {
        let total = self.queries();
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64 * 100.0
    }

    /// Network time the cache hits avoided, assuming average miss latency.
    pub fn estimated_saved_ms(&self) -> u64 {
        if self.misses == 0 {
            return 0;
        }
        let avg_miss = self.time_spent_ms as f64 / self.misses as f64;
        (self.hits as f64 * avg_miss).round() as u64
    }
}
