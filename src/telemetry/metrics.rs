//! Lock-free request metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Upper bounds (inclusive, milliseconds) of the request duration buckets.
///
/// Durations above the last bound land in an overflow bucket.
pub const DURATION_BUCKETS_MS: [u64; 10] = [5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];

/// Sink for per-request telemetry.
pub trait RequestMetrics: Send + Sync + 'static {
    /// Record one completed request.
    fn record_request(&self, duration: Duration, success: bool);
}

/// Metrics sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl RequestMetrics for NoopMetrics {
    fn record_request(&self, _duration: Duration, _success: bool) {}
}

/// Request counters and a fixed-bucket duration histogram.
///
/// All counters are independent and use `Relaxed` ordering, so a snapshot
/// taken under load may be off by the requests in flight.
pub struct ServerMetrics {
    start_time: Instant,
    requests_ok: AtomicU64,
    requests_failed: AtomicU64,
    /// Total request time in microseconds
    request_time_us: AtomicU64,
    buckets: [AtomicU64; DURATION_BUCKETS_MS.len() + 1],
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            requests_ok: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            request_time_us: AtomicU64::new(0),
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Take a point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests_ok = self.requests_ok.load(Ordering::Relaxed);
        let requests_failed = self.requests_failed.load(Ordering::Relaxed);
        let total = requests_ok + requests_failed;
        let request_time_us = self.request_time_us.load(Ordering::Relaxed);

        let avg_request_ms = if total > 0 {
            request_time_us as f64 / total as f64 / 1000.0
        } else {
            0.0
        };

        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            requests_ok,
            requests_failed,
            avg_request_ms,
            bucket_bounds_ms: DURATION_BUCKETS_MS.to_vec(),
            bucket_counts: self
                .buckets
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
        }
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestMetrics for ServerMetrics {
    fn record_request(&self, duration: Duration, success: bool) {
        let counter = if success {
            &self.requests_ok
        } else {
            &self.requests_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.request_time_us.fetch_add(micros, Ordering::Relaxed);

        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let bucket = DURATION_BUCKETS_MS
            .iter()
            .position(|&bound| millis <= bound)
            .unwrap_or(DURATION_BUCKETS_MS.len());
        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
    }
}

/// Serializable view of [`ServerMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub requests_ok: u64,
    pub requests_failed: u64,
    pub avg_request_ms: f64,
    pub bucket_bounds_ms: Vec<u64>,
    /// One count per bound, plus a final overflow bucket
    pub bucket_counts: Vec<u64>,
}
