//! Administrative surface — explicit invalidation and metrics reporting.
//!
//! The operations here back the admin endpoints of a service embedding the
//! cache (`DELETE /invalidate/{key}`, `GET /metrics/cache`); the structs they
//! return serialize to the exact bodies those endpoints expose. Routing stays
//! with the embedding service.
//!
//! ## Core types
//!
//! - [`Invalidator`] — evicts one key, flushes by pattern, or cascades over a
//!   dependency tag.
//! - [`TagIndex`] — declarable cache-dependency groups shared between the
//!   gate (which registers keys) and the invalidator (which cascades). This
//!   replaces the convention of hardcoding related key names at every write
//!   site.
//! - [`metrics_report`] — joins a metrics snapshot with the store's live key
//!   count at call time.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::info;

use crate::metrics::CacheMetrics;
use crate::store::{Store, StoreError};

/// Dependency groups over cache keys.
///
/// A key may carry any number of tags; invalidating a tag evicts every key
/// registered under it. Registration is in-memory and rebuilt naturally as
/// keys are re-cached after a cascade.
#[derive(Default)]
pub struct TagIndex {
    groups: Mutex<HashMap<String, HashSet<String>>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `key` under each of `tags`.
    pub fn tag(&self, key: &str, tags: &[&str]) {
        if tags.is_empty() {
            return;
        }
        let mut groups = self.groups.lock().expect("tag index poisoned");
        for tag in tags {
            groups
                .entry((*tag).to_owned())
                .or_default()
                .insert(key.to_owned());
        }
    }

    /// Removes and returns every key registered under `tag`.
    pub fn take(&self, tag: &str) -> Vec<String> {
        let mut groups = self.groups.lock().expect("tag index poisoned");
        groups
            .remove(tag)
            .map(|keys| keys.into_iter().collect())
            .unwrap_or_default()
    }
}

/// Response body of a single-key invalidation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InvalidationReport {
    pub key: String,
    pub deleted: bool,
}

/// Cache metrics joined with the store's live key count,
/// the `GET /metrics/cache` body.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheMetricsReport {
    pub hits: u64,
    pub misses: u64,
    pub top_keys: Vec<(String, u64)>,
    pub total_cached_keys: usize,
}

/// Evicts cache entries on demand.
///
/// Invalidation is not cascading by itself: evicting one key says nothing
/// about related keys. Callers that need grouped eviction register tags at
/// write time (via [`crate::CacheGate::get_or_compute_tagged`]) and call
/// [`invalidate_tag`](Invalidator::invalidate_tag).
pub struct Invalidator {
    store: Arc<dyn Store>,
    tags: Arc<TagIndex>,
}

impl Invalidator {
    /// Creates an invalidator with its own (empty) tag index.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_tags(store, Arc::default())
    }

    /// Creates an invalidator sharing a tag index with a gate.
    pub fn with_tags(store: Arc<dyn Store>, tags: Arc<TagIndex>) -> Self {
        Self { store, tags }
    }

    /// Evicts `key`, reporting whether a live entry was deleted. Evicting an
    /// absent key is not an error and has no side effects.
    ///
    /// # Errors
    ///
    /// [`StoreError`] — unlike the gate's read path there is no producible
    /// fallback here, so backend failures surface.
    pub async fn invalidate(&self, key: &str) -> Result<InvalidationReport, StoreError> {
        let deleted = self.store.delete(key).await?;
        info!(key, deleted, "cache entry invalidated");
        Ok(InvalidationReport {
            key: key.to_owned(),
            deleted,
        })
    }

    /// Evicts every live key matching `pattern` (see
    /// [`crate::store::key_matches`]), returning how many were deleted.
    pub async fn flush_matching(&self, pattern: &str) -> Result<usize, StoreError> {
        let flushed = self.store.delete_matching(pattern).await?;
        info!(pattern, flushed, "cache entries flushed");
        Ok(flushed)
    }

    /// Evicts every key registered under `tag`, returning how many live
    /// entries were deleted.
    pub async fn invalidate_tag(&self, tag: &str) -> Result<usize, StoreError> {
        let mut deleted = 0;
        for key in self.tags.take(tag) {
            if self.store.delete(&key).await? {
                deleted += 1;
            }
        }
        info!(tag, deleted, "tagged cache entries invalidated");
        Ok(deleted)
    }
}

/// Builds a [`CacheMetricsReport`]: the metrics snapshot plus the store's
/// current live key count.
///
/// The key count is read from the store at call time — metrics do not track
/// it — so the report reflects store state as of this call, not of the last
/// recording.
pub async fn metrics_report(
    metrics: &CacheMetrics,
    store: &dyn Store,
) -> Result<CacheMetricsReport, StoreError> {
    let snapshot = metrics.snapshot();
    let total_cached_keys = store.count_keys("*").await?;
    Ok(CacheMetricsReport {
        hits: snapshot.hits,
        misses: snapshot.misses,
        top_keys: snapshot.top_keys,
        total_cached_keys,
    })
}
