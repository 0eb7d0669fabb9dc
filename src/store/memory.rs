//! In-process store backed by a `HashMap` under an async `RwLock`.
//!
//! Entries expire lazily: a read past the deadline removes the entry and
//! reports a miss. For workloads where keys stop being read before they
//! expire, [`MemoryStore::spawn_sweeper`] reclaims them on an interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::{BoxFuture, Store, StoreError, key_matches};

// One cached value with its absolute expiry deadline. Overwrites replace the
// whole entry, never individual fields.
struct Entry {
    value: Bytes,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Concurrent in-memory [`Store`] with per-entry TTL and lazy eviction.
///
/// Uses `tokio::time::Instant` for deadlines, so tests running under a paused
/// runtime can advance the clock virtually.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use bytes::Bytes;
/// use readthru::{MemoryStore, Store};
///
/// # #[tokio::main(flavor = "current_thread")] async fn main() {
/// let store = MemoryStore::new();
/// store.set("k", Bytes::from_static(b"v"), Duration::from_secs(60)).await.unwrap();
/// assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));
/// # }
/// ```
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every expired entry right now, returning how many were purged.
    ///
    /// Lazy eviction only reclaims entries that are read again; this is the
    /// active counterpart for entries that never are.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    /// Spawns a background task that calls [`sweep`](Self::sweep) on the given
    /// interval, returning its [`JoinHandle`] so the owner controls teardown.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                let purged = store.sweep().await;
                if purged > 0 {
                    debug!(purged, "sweeper reclaimed expired entries");
                }
            }
        })
    }

    async fn get_entry(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        // Write lock up front: an expired hit is removed in the same critical
        // section that observed it.
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                debug!(key, "expired entry evicted on read");
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    async fn set_entry(&self, key: &str, value: Bytes, ttl: Duration) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.to_owned(), entry);
    }

    async fn delete_entry(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.remove(key) {
            // Deleting an already-expired entry reports the same as a missing
            // key: nothing live was removed.
            Some(entry) => !entry.is_expired(now),
            None => false,
        }
    }

    async fn count_matching(&self, pattern: &str) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| !e.is_expired(now));
        entries.keys().filter(|k| key_matches(pattern, k)).count()
    }

    async fn delete_matching_keys(&self, pattern: &str) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| !e.is_expired(now));
        let before = entries.len();
        entries.retain(|k, _| !key_matches(pattern, k));
        before - entries.len()
    }
}

impl Store for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Bytes>, StoreError>> {
        Box::pin(async move { Ok(self.get_entry(key).await) })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Bytes,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.set_entry(key, value, ttl).await;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move { Ok(self.delete_entry(key).await) })
    }

    fn count_keys<'a>(&'a self, pattern: &'a str) -> BoxFuture<'a, Result<usize, StoreError>> {
        Box::pin(async move { Ok(self.count_matching(pattern).await) })
    }

    fn delete_matching<'a>(
        &'a self,
        pattern: &'a str,
    ) -> BoxFuture<'a, Result<usize, StoreError>> {
        Box::pin(async move { Ok(self.delete_matching_keys(pattern).await) })
    }
}
