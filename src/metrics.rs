//! Gateway metrics collection.
//!
//! Lock-free atomic counters for the concerns a gateway operator actually
//! cares about: request outcomes, stdio child lifecycle, and catalog merge
//! latency. No exporter is wired up (out of scope) — the counters exist and
//! are unit-tested so a future exporter has something to scrape.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free atomic metrics for gateway request handling.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    requests_forwarded: AtomicU64,
    requests_failed: AtomicU64,
    stdio_children_spawned: AtomicU64,
    stdio_children_active: AtomicU64,
    stdio_children_evicted: AtomicU64,
    catalog_merge_latency_us: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_requests_forwarded(&self) {
        self.requests_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_requests_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_stdio_spawned(&self) {
        self.stdio_children_spawned.fetch_add(1, Ordering::Relaxed);
        self.stdio_children_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_stdio_evicted(&self) {
        self.stdio_children_evicted.fetch_add(1, Ordering::Relaxed);
        self.stdio_children_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Exponential moving average over catalog-merge wall time, matching
    /// the weighting used for upstream call latency elsewhere in this
    /// corpus (90% history, 10% new sample).
    pub fn record_catalog_merge_latency_us(&self, latency_us: u64) {
        let current = self.catalog_merge_latency_us.load(Ordering::Relaxed);
        let new_avg = if current == 0 {
            latency_us
        } else {
            (current.saturating_mul(9).saturating_add(latency_us)) / 10
        };
        self.catalog_merge_latency_us.store(new_avg, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_forwarded: self.requests_forwarded.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            stdio_children_spawned: self.stdio_children_spawned.load(Ordering::Relaxed),
            stdio_children_active: self.stdio_children_active.load(Ordering::Relaxed),
            stdio_children_evicted: self.stdio_children_evicted.load(Ordering::Relaxed),
            catalog_merge_latency_ms: self.catalog_merge_latency_us.load(Ordering::Relaxed) as f64
                / 1000.0,
        }
    }
}

/// A point-in-time, serializable view of [`GatewayMetrics`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub requests_forwarded: u64,
    pub requests_failed: u64,
    pub stdio_children_spawned: u64,
    pub stdio_children_active: u64,
    pub stdio_children_evicted: u64,
    pub catalog_merge_latency_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_counters() {
        let m = GatewayMetrics::new();
        m.inc_requests_forwarded();
        m.inc_requests_forwarded();
        m.inc_requests_failed();
        let snap = m.snapshot();
        assert_eq!(snap.requests_forwarded, 2);
        assert_eq!(snap.requests_failed, 1);
    }

    #[test]
    fn stdio_lifecycle_counters() {
        let m = GatewayMetrics::new();
        m.inc_stdio_spawned();
        m.inc_stdio_spawned();
        assert_eq!(m.snapshot().stdio_children_active, 2);
        m.inc_stdio_evicted();
        let snap = m.snapshot();
        assert_eq!(snap.stdio_children_active, 1);
        assert_eq!(snap.stdio_children_evicted, 1);
        assert_eq!(snap.stdio_children_spawned, 2);
    }

    #[test]
    fn latency_ema() {
        let m = GatewayMetrics::new();
        m.record_catalog_merge_latency_us(1000);
        assert_eq!(m.snapshot().catalog_merge_latency_ms, 1.0);
        m.record_catalog_merge_latency_us(2000);
        assert_eq!(m.snapshot().catalog_merge_latency_ms, 1.1);
    }
}
