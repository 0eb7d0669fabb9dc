//! Hit/miss accounting — process-lifetime counters for the cache gate.
//!
//! [`CacheMetrics`] is an explicitly constructed object shared via `Arc`
//! between the gate and whatever exposes the numbers, rather than a
//! process-global. It tracks total hits, total misses, and a per-key access
//! log from which [`snapshot`](CacheMetrics::snapshot) derives the most
//! frequently accessed keys.
//!
//! The snapshot deliberately does not include a live-key count: that belongs
//! to the store, and the administrative surface joins the two at call time
//! (see [`crate::admin::metrics_report`]).

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// How many top keys a snapshot reports.
const TOP_KEYS: usize = 5;

// Per-key access count plus the order the key was first seen in, so top-key
// ties resolve deterministically.
struct KeyStats {
    count: u64,
    first_seen: u64,
}

/// Hit/miss counters and a per-key access-frequency log.
///
/// Counters live for the lifetime of the object (in practice, the process)
/// and are never persisted. All methods take `&self`; recording is safe from
/// any number of concurrent tasks.
#[derive(Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    access_log: Mutex<HashMap<String, KeyStats>>,
    next_seen: AtomicU64,
}

/// A point-in-time, serializable view of the counters.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    /// The up-to-five most accessed keys with their counts, highest first.
    pub top_keys: Vec<(String, u64)>,
}

impl CacheMetrics {
    /// Creates a zeroed metrics object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a cache hit for `key`.
    pub fn record_hit(&self, key: &str) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.record_access(key);
    }

    /// Records a cache miss for `key`.
    pub fn record_miss(&self, key: &str) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.record_access(key);
    }

    // Hits and misses both count as an access for frequency purposes.
    fn record_access(&self, key: &str) {
        let mut log = self.access_log.lock().expect("access log poisoned");
        if let Some(stats) = log.get_mut(key) {
            stats.count += 1;
        } else {
            let first_seen = self.next_seen.fetch_add(1, Ordering::Relaxed);
            log.insert(key.to_owned(), KeyStats { count: 1, first_seen });
        }
    }

    /// Takes a consistent snapshot: totals plus the top accessed keys, sorted
    /// by descending count with ties broken first-seen-first.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let log = self.access_log.lock().expect("access log poisoned");
        let mut ranked: Vec<(&String, &KeyStats)> = log.iter().collect();
        ranked.sort_by(|(_, a), (_, b)| {
            b.count.cmp(&a.count).then(a.first_seen.cmp(&b.first_seen))
        });
        let top_keys = ranked
            .into_iter()
            .take(TOP_KEYS)
            .map(|(key, stats)| (key.clone(), stats.count))
            .collect();

        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            top_keys,
        }
    }
}
