//! Per-request performance log.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Serialize, Serializer};

use crate::tile::TileCoord;

/// Default number of entries kept by [`PerfLog`].
pub const DEFAULT_PERFLOG_CAPACITY: usize = 10_000;

/// Timing record of one completed tile request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerfLogEntry {
    #[serde(rename = "timestamp_ms", serialize_with = "serialize_epoch_millis")]
    pub timestamp: SystemTime,
    pub coord: TileCoord,
    #[serde(rename = "render_ms", serialize_with = "serialize_millis")]
    pub render_time: Duration,
    #[serde(rename = "save_ms", serialize_with = "serialize_millis")]
    pub save_time: Duration,
}

fn serialize_epoch_millis<S: Serializer>(ts: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
    let millis = ts
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    s.serialize_u64(millis)
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

/// Sink for per-request timing records.
pub trait PerfLogSink: Send + Sync + 'static {
    fn save(&self, entry: PerfLogEntry);
}

/// Perf log sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPerfLog;

impl PerfLogSink for NoopPerfLog {
    fn save(&self, _entry: PerfLogEntry) {}
}

/// Bounded in-memory perf log. Oldest entries are dropped first.
pub struct PerfLog {
    entries: Mutex<VecDeque<PerfLogEntry>>,
    capacity: usize,
}

impl PerfLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PERFLOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PerfLogEntry>> {
        // Entries stay consistent even if a holder panicked
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The newest `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<PerfLogEntry> {
        let entries = self.lock();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    /// All entries recorded at or after `since`, oldest first.
    pub fn since(&self, since: SystemTime) -> Vec<PerfLogEntry> {
        self.lock()
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect()
    }
}

impl Default for PerfLog {
    fn default() -> Self {
        Self::new()
    }
}

impl PerfLogSink for PerfLog {
    fn save(&self, entry: PerfLogEntry) {
        let mut entries = self.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }
}
