//! Per-unit ingest timings (extraction plus the write transaction, retries
//! included), split by content kind. Failed units are counted, not timed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

use crate::types::SourceKind;

/// Longest ingest worth distinguishing: one minute, in microseconds.
const MAX_TRACKED_US: u64 = 60_000_000;

/// Latency distribution for one content kind, in microseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub failures: u64,
    pub p50_us: Option<u64>,
    pub p95_us: Option<u64>,
    pub p99_us: Option<u64>,
    pub max_us: Option<u64>,
}

struct KindStats {
    timings: Mutex<Histogram<u64>>,
    failures: AtomicU64,
}

impl KindStats {
    fn new() -> Self {
        let timings =
            Histogram::new_with_max(MAX_TRACKED_US, 3).expect("valid histogram bounds");
        Self {
            timings: Mutex::new(timings),
            failures: AtomicU64::new(0),
        }
    }

    fn summary(&self) -> LatencySummary {
        let failures = self.failures.load(Ordering::Relaxed);
        let empty = LatencySummary {
            samples: 0,
            failures,
            p50_us: None,
            p95_us: None,
            p99_us: None,
            max_us: None,
        };
        let Ok(h) = self.timings.lock() else {
            return empty;
        };
        if h.is_empty() {
            return empty;
        }
        LatencySummary {
            samples: h.len(),
            failures,
            p50_us: Some(h.value_at_quantile(0.50)),
            p95_us: Some(h.value_at_quantile(0.95)),
            p99_us: Some(h.value_at_quantile(0.99)),
            max_us: Some(h.max()),
        }
    }
}

/// Shared between the cycle runner (writes) and the API (reads).
pub struct IngestLatency {
    posts: KindStats,
    comments: KindStats,
}

impl IngestLatency {
    pub fn new() -> Self {
        Self {
            posts: KindStats::new(),
            comments: KindStats::new(),
        }
    }

    fn kind(&self, kind: SourceKind) -> &KindStats {
        match kind {
            SourceKind::Post => &self.posts,
            SourceKind::Comment => &self.comments,
        }
    }

    /// Times a committed unit. Ingests slower than a minute saturate.
    pub fn record(&self, kind: SourceKind, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros())
            .unwrap_or(MAX_TRACKED_US)
            .clamp(1, MAX_TRACKED_US);
        if let Ok(mut h) = self.kind(kind).timings.lock() {
            h.saturating_record(us);
        }
    }

    /// Counts a unit whose ingest gave up after retries.
    pub fn record_failure(&self, kind: SourceKind) {
        self.kind(kind).failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self, kind: SourceKind) -> LatencySummary {
        self.kind(kind).summary()
    }
}

impl Default for IngestLatency {
    fn default() -> Self {
        Self::new()
    }
}
