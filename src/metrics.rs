//! Per-instance request metrics (spec §4.C).
//!
//! Lock-free like `circuit_breaker.rs`'s state: every counter is an atomic so
//! `record_request`/`increment_active`/`decrement_active` never block a
//! concurrent reader taking a `snapshot`.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::model::PerformanceBucket;

/// Immutable point-in-time view of a [`ServiceMetrics`], returned by `snapshot`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub active_connections: u64,
    pub avg_response_time_ms: f64,
    pub min_response_time_ms: Option<u64>,
    pub max_response_time_ms: Option<u64>,
    pub error_rate: f64,
    pub success_rate: f64,
    /// Requests per second since the first recorded request, or `0.0` if none yet.
    pub throughput: f64,
    pub performance_score: f64,
}

impl MetricsSnapshot {
    pub fn performance_bucket(&self) -> PerformanceBucket {
        PerformanceBucket::from_score(self.performance_score)
    }
}

/// One instance's running counters. `successful + failed == total` is
/// maintained by construction: every `record_request` increments exactly one
/// of the two alongside `total`.
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    active_connections: AtomicU64,
    total_response_time_ms: AtomicU64,
    min_response_time_ms: AtomicU64,
    max_response_time_ms: AtomicU64,
    first_request_millis: AtomicI64,
    last_request_millis: AtomicI64,
}

const UNSET_EXTREMUM: u64 = u64::MAX;

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            min_response_time_ms: AtomicU64::new(UNSET_EXTREMUM),
            first_request_millis: AtomicI64::new(0),
            ..Default::default()
        }
    }

    /// Record the outcome and latency of one completed request.
    pub fn record_request(&self, success: bool, response_time_ms: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        self.total_response_time_ms.fetch_add(response_time_ms, Ordering::Relaxed);
        self.min_response_time_ms.fetch_min(response_time_ms, Ordering::Relaxed);
        self.max_response_time_ms.fetch_max(response_time_ms, Ordering::Relaxed);

        let now = crate::ids::wall_now_millis();
        self.first_request_millis.fetch_max(0, Ordering::Relaxed);
        let _ = self.first_request_millis.compare_exchange(
            0,
            now,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
        self.last_request_millis.store(now, Ordering::Relaxed);
    }

    pub fn increment_active(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_active(&self) {
        // Connections never go negative; a decrement on an already-zero
        // counter indicates a caller bug elsewhere, not underflow here.
        let _ = self.active_connections.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
            Some(n.saturating_sub(1))
        });
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_requests.load(Ordering::Relaxed);
        let successful = self.successful_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        let active = self.active_connections.load(Ordering::Relaxed);
        let total_rt = self.total_response_time_ms.load(Ordering::Relaxed);
        let min_raw = self.min_response_time_ms.load(Ordering::Relaxed);
        let max_raw = self.max_response_time_ms.load(Ordering::Relaxed);
        let first = self.first_request_millis.load(Ordering::Relaxed);
        let last = self.last_request_millis.load(Ordering::Relaxed);

        let avg_response_time_ms = if total > 0 { total_rt as f64 / total as f64 } else { 0.0 };
        let error_rate = if total > 0 { failed as f64 / total as f64 * 100.0 } else { 0.0 };
        let success_rate = if total > 0 { 100.0 - error_rate } else { 100.0 };
        let throughput = if first > 0 && last > first {
            let elapsed_secs = (last - first) as f64 / 1000.0;
            if elapsed_secs > 0.0 { total as f64 / elapsed_secs } else { total as f64 }
        } else {
            0.0
        };

        let performance_score = (100.0
            - 2.0 * error_rate
            - (avg_response_time_ms / 20.0).min(50.0)
            - (active as f64 / 5.0).min(20.0))
        .max(0.0);

        MetricsSnapshot {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            active_connections: active,
            avg_response_time_ms,
            min_response_time_ms: if min_raw == UNSET_EXTREMUM { None } else { Some(min_raw) },
            max_response_time_ms: if max_raw == 0 && total == 0 { None } else { Some(max_raw) },
            error_rate,
            success_rate,
            throughput,
            performance_score,
        }
    }

    /// Clear all counters atomically from the caller's perspective: no reader
    /// ever observes a partially-reset state because every field is reset to
    /// its zero value independently but `total == successful + failed` holds
    /// both before and after (0 == 0 + 0).
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.successful_requests.store(0, Ordering::Relaxed);
        self.failed_requests.store(0, Ordering::Relaxed);
        self.total_response_time_ms.store(0, Ordering::Relaxed);
        self.min_response_time_ms.store(UNSET_EXTREMUM, Ordering::Relaxed);
        self.max_response_time_ms.store(0, Ordering::Relaxed);
        self.first_request_millis.store(0, Ordering::Relaxed);
        self.last_request_millis.store(0, Ordering::Relaxed);
        // active_connections intentionally untouched: it reflects in-flight
        // work, not historical counters, and resetting it would desync from
        // reality while requests are still outstanding.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_plus_failed_equals_total() {
        let metrics = ServiceMetrics::new();
        metrics.record_request(true, 10);
        metrics.record_request(false, 20);
        metrics.record_request(true, 30);
        let snap = metrics.snapshot();
        assert_eq!(snap.successful_requests + snap.failed_requests, snap.total_requests);
        assert_eq!(snap.total_requests, 3);
    }

    #[test]
    fn min_and_max_track_extremes() {
        let metrics = ServiceMetrics::new();
        metrics.record_request(true, 50);
        metrics.record_request(true, 10);
        metrics.record_request(true, 90);
        let snap = metrics.snapshot();
        assert_eq!(snap.min_response_time_ms, Some(10));
        assert_eq!(snap.max_response_time_ms, Some(90));
    }

    #[test]
    fn active_connections_never_underflow() {
        let metrics = ServiceMetrics::new();
        metrics.decrement_active();
        assert_eq!(metrics.active_connections(), 0);
        metrics.increment_active();
        metrics.increment_active();
        metrics.decrement_active();
        assert_eq!(metrics.active_connections(), 1);
    }

    #[test]
    fn reset_clears_counters_but_not_active_connections() {
        let metrics = ServiceMetrics::new();
        metrics.record_request(true, 10);
        metrics.increment_active();
        metrics.reset();
        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.active_connections, 1);
    }

    #[test]
    fn performance_score_degrades_with_errors_and_latency() {
        let healthy = ServiceMetrics::new();
        for _ in 0..10 {
            healthy.record_request(true, 5);
        }
        let unhealthy = ServiceMetrics::new();
        for _ in 0..10 {
            unhealthy.record_request(false, 400);
        }
        assert!(healthy.snapshot().performance_score > unhealthy.snapshot().performance_score);
        assert_eq!(unhealthy.snapshot().performance_bucket(), PerformanceBucket::Critical);
    }

    #[test]
    fn no_requests_yields_full_success_rate_and_zero_score_inputs() {
        let metrics = ServiceMetrics::new();
        let snap = metrics.snapshot();
        assert_eq!(snap.success_rate, 100.0);
        assert_eq!(snap.error_rate, 0.0);
        assert_eq!(snap.throughput, 0.0);
    }
}
