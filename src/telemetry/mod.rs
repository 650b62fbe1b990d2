//! Request telemetry.
//!
//! The tile server reports every completed request to two injected sinks:
//!
//! - [`RequestMetrics`]: duration sample plus success/error counter,
//!   implemented by the lock-free [`ServerMetrics`]
//! - [`PerfLogSink`]: per-request timing record, implemented by the
//!   in-memory ring buffer [`PerfLog`]

mod metrics;
mod perflog;

pub use metrics::{
    MetricsSnapshot, NoopMetrics, RequestMetrics, ServerMetrics, DURATION_BUCKETS_MS,
};
pub use perflog::{NoopPerfLog, PerfLog, PerfLogEntry, PerfLogSink, DEFAULT_PERFLOG_CAPACITY};
