//! Time-bounded result cache for rendered documents and API payloads.
//!
//! Streams are never stored here. Every entry shares one TTL; `put` on an
//! existing key overwrites it and restarts the clock. Concurrent misses for
//! the same key are not coalesced: each caller does its own upstream work
//! and the last `put` wins.

use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

/// What a cached payload holds, which decides the content type on a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Html,
    Json,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub kind: CacheKind,
    pub payload: String,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

/// Cache interface used by the pipeline. Implementations must make `get`
/// and `put` atomic per key; no cross-key guarantees are needed.
pub trait ResultCache: Send + Sync {
    /// Returns `None` for missing or expired keys.
    fn get(&self, key: &str) -> Option<CacheEntry>;

    fn put(&self, key: &str, kind: CacheKind, payload: String);

    /// Live keys, in no particular order.
    fn list_keys(&self) -> Vec<String>;

    /// Number of live entries.
    fn len(&self) -> usize {
        self.list_keys().len()
    }

    /// Drop expired entries. Returns how many were removed.
    fn purge_expired(&self) -> usize;
}

/// In-process cache backed by a `DashMap`.
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }
}

impl ResultCache for MemoryCache {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = Instant::now();
        let entry = self.entries.get(key).map(|e| e.value().clone())?;
        if entry.is_expired(now) {
            self.entries.remove_if(key, |_, e| e.is_expired(now));
            return None;
        }
        Some(entry)
    }

    fn put(&self, key: &str, kind: CacheKind, payload: String) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                kind,
                payload,
                inserted_at: Instant::now(),
                ttl: self.ttl,
            },
        );
    }

    fn list_keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect()
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}
