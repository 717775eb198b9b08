//! Ingest pipeline metrics (spec §4.5): depth, utilization, in-flight,
//! and cumulative counters, read without locking the queue itself.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct IngestMetrics {
    pub max_size: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_depth_seen: AtomicUsize,
    pub enqueued_total: AtomicU64,
    pub processed_total: AtomicU64,
    pub failed_total: AtomicU64,
    pub rejected_total: AtomicU64,
    pub dropped_total: AtomicU64,
    pub latency_sum_ms: AtomicU64,
    pub latency_count: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestMetricsSnapshot {
    pub depth: usize,
    pub max_size: usize,
    pub utilization: f64,
    pub in_flight: usize,
    pub enqueued_total: u64,
    pub processed_total: u64,
    pub failed_total: u64,
    pub rejected_total: u64,
    pub dropped_total: u64,
    pub average_latency_ms: f64,
    pub max_depth_seen: usize,
}

impl IngestMetrics {
    pub fn new(max_size: usize) -> Self {
        Self { max_size: AtomicUsize::new(max_size), ..Default::default() }
    }

    pub fn record_enqueued(&self, depth: usize) {
        self.enqueued_total.fetch_add(1, Ordering::Relaxed);
        self.max_depth_seen.fetch_max(depth, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self, latency: Duration) {
        self.processed_total.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_ms.fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, depth: usize) -> IngestMetricsSnapshot {
        let max_size = self.max_size.load(Ordering::Relaxed);
        let latency_count = self.latency_count.load(Ordering::Relaxed);
        let latency_sum = self.latency_sum_ms.load(Ordering::Relaxed);
        IngestMetricsSnapshot {
            depth,
            max_size,
            utilization: if max_size == 0 { 0.0 } else { depth as f64 / max_size as f64 },
            in_flight: self.in_flight.load(Ordering::Relaxed),
            enqueued_total: self.enqueued_total.load(Ordering::Relaxed),
            processed_total: self.processed_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
            rejected_total: self.rejected_total.load(Ordering::Relaxed),
            dropped_total: self.dropped_total.load(Ordering::Relaxed),
            average_latency_ms: if latency_count == 0 { 0.0 } else { latency_sum as f64 / latency_count as f64 },
            max_depth_seen: self.max_depth_seen.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_computes_utilization_and_average_latency() {
        let metrics = IngestMetrics::new(10);
        metrics.record_enqueued(4);
        metrics.record_processed(Duration::from_millis(100));
        metrics.record_processed(Duration::from_millis(300));
        let snap = metrics.snapshot(4);
        assert_eq!(snap.utilization, 0.4);
        assert_eq!(snap.average_latency_ms, 200.0);
        assert_eq!(snap.processed_total, 2);
    }
}
