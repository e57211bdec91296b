//! Atomic proxy statistics counters.
//!
//! Lock-free counters for request volume, cache effectiveness and strategy
//! mix. All atomics use `Relaxed` ordering: these are monotonic display
//! counters with no synchronization requirements.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::strategy::StrategyKind;

#[derive(Default)]
struct StatsInner {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    rendered: AtomicU64,
    structured: AtomicU64,
    streamed: AtomicU64,
    failures: AtomicU64,
}

/// Thread-safe atomic proxy statistics. Cheap to clone (Arc).
#[derive(Clone, Default)]
pub struct ProxyStats {
    inner: Arc<StatsInner>,
}

/// Snapshot of current stats values, serializable to JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub rendered: u64,
    pub structured: u64,
    pub streamed: u64,
    pub failures: u64,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_requests(&self) {
        self.inner.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_hits(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a dispatch to `strategy`, whether or not it succeeds.
    pub fn inc_strategy(&self, strategy: StrategyKind) {
        let counter = match strategy {
            StrategyKind::Render => &self.inner.rendered,
            StrategyKind::Structured => &self.inner.structured,
            StrategyKind::Stream => &self.inner.streamed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failures(&self) {
        self.inner.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.inner.total_requests.load(Ordering::Relaxed),
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
            rendered: self.inner.rendered.load(Ordering::Relaxed),
            structured: self.inner.structured.load(Ordering::Relaxed),
            streamed: self.inner.streamed.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
        }
    }
}
