//! The cache gate — a read-through cache in front of an expensive producer.
//!
//! [`CacheGate`] makes "expensive operation behind a cache" a single reusable
//! contract: look the key up, return the cached value on a hit, otherwise run
//! the producer, cache its result with a TTL, and return it. Hit/miss
//! accounting, skip-cache bypass, store-outage degradation, and optional
//! per-key single-flight deduplication all live here so callers don't
//! re-implement them per endpoint.
//!
//! ## Core types
//!
//! - [`CacheGate`] — holds the store, the metrics, and the tag index; built
//!   with [`CacheGate::new`] or [`CacheGate::builder`].
//! - [`GateError`] — producer failure or a value that cannot cross the JSON
//!   boundary.
//!
//! ## Semantics
//!
//! - Cached values cross the store as JSON bytes; producers may return any
//!   `Serialize + DeserializeOwned` type.
//! - `skip_cache` bypasses **both** read and write: a bypassing caller
//!   neither observes nor publishes cache state.
//! - Producer failures propagate and are never cached.
//! - A store outage degrades to a miss: the producer runs and its value is
//!   returned uncached. A cache outage never becomes a caller-visible outage.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::admin::TagIndex;
use crate::metrics::CacheMetrics;
use crate::store::Store;

/// TTL applied by [`CacheGate::cached`] when the caller doesn't pick one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Failure surfaced by [`CacheGate::get_or_compute`].
///
/// Store failures never appear here — they degrade to a miss on the read path
/// and to an uncached return on the write path.
#[derive(Debug, Error)]
pub enum GateError<E> {
    /// The wrapped producer failed. Never cached, never retried by the gate.
    #[error("producer failed: {0}")]
    Producer(#[source] E),

    /// The produced value could not be encoded as JSON — a contract violation
    /// at the interface boundary (e.g. a map with non-string keys), not a
    /// cache condition.
    #[error("produced value is not JSON-encodable: {0}")]
    Encode(#[from] serde_json::Error),
}

// Per-key async locks for single-flight mode. Entries are dropped when the
// last holder releases, so the table tracks in-flight keys only.
#[derive(Default)]
struct FlightTable {
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

struct FlightGuard {
    table: Arc<FlightTable>,
    key: String,
    _permit: OwnedMutexGuard<()>,
}

impl FlightTable {
    async fn acquire(self: Arc<Self>, key: &str) -> FlightGuard {
        let slot = {
            let mut locks = self.locks.lock().expect("flight table poisoned");
            Arc::clone(
                locks
                    .entry(key.to_owned())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        let permit = slot.lock_owned().await;
        FlightGuard {
            table: self,
            key: key.to_owned(),
            _permit: permit,
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut locks = self.table.locks.lock().expect("flight table poisoned");
        if let Some(slot) = locks.get(self.key.as_str()) {
            // Two strong refs mean the table and this guard's permit are the
            // only holders left; no waiter needs the slot anymore.
            if Arc::strong_count(slot) <= 2 {
                locks.remove(self.key.as_str());
            }
        }
    }
}

/// A read-through cache gate over a [`Store`], with hit/miss metrics.
///
/// Explicitly constructed and shared by reference (or `Arc`) into request
/// handlers — there is no process-global gate.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use readthru::{CacheGate, MemoryStore};
///
/// # #[tokio::main(flavor = "current_thread")] async fn main() {
/// let gate = CacheGate::new(Arc::new(MemoryStore::new()));
///
/// let posts: Vec<String> = gate
///     .get_or_compute("GET:/posts/", Duration::from_secs(90), false, || async {
///         Ok::<_, std::io::Error>(vec!["post a".into(), "post b".into()])
///     })
///     .await
///     .unwrap();
/// # assert_eq!(posts.len(), 2);
/// # }
/// ```
pub struct CacheGate {
    store: Arc<dyn Store>,
    metrics: Arc<CacheMetrics>,
    tags: Arc<TagIndex>,
    default_ttl: Duration,
    flights: Option<Arc<FlightTable>>,
}

/// Configures and builds a [`CacheGate`].
pub struct CacheGateBuilder {
    store: Arc<dyn Store>,
    metrics: Option<Arc<CacheMetrics>>,
    tags: Option<Arc<TagIndex>>,
    default_ttl: Duration,
    single_flight: bool,
}

impl CacheGateBuilder {
    /// Shares an existing metrics object instead of creating a fresh one.
    pub fn metrics(mut self, metrics: Arc<CacheMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Shares a tag index with an [`crate::admin::Invalidator`].
    pub fn tags(mut self, tags: Arc<TagIndex>) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Sets the TTL used by [`CacheGate::cached`].
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Enables per-key single-flight deduplication: concurrent invocations
    /// for the same key serialize, so a thundering herd of misses collapses
    /// into one producer run plus hits. Off by default.
    pub fn single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    pub fn build(self) -> CacheGate {
        CacheGate {
            store: self.store,
            metrics: self.metrics.unwrap_or_default(),
            tags: self.tags.unwrap_or_default(),
            default_ttl: self.default_ttl,
            flights: self.single_flight.then(Arc::default),
        }
    }
}

impl CacheGate {
    /// Creates a gate over `store` with default settings: fresh metrics,
    /// [`DEFAULT_TTL`], no single-flight.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::builder(store).build()
    }

    /// Starts building a gate over `store`.
    pub fn builder(store: Arc<dyn Store>) -> CacheGateBuilder {
        CacheGateBuilder {
            store,
            metrics: None,
            tags: None,
            default_ttl: DEFAULT_TTL,
            single_flight: false,
        }
    }

    /// The store behind this gate.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The metrics this gate records into.
    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// The tag index this gate registers tagged keys into.
    pub fn tags(&self) -> &Arc<TagIndex> {
        &self.tags
    }

    /// Returns the cached value for `key`, or runs `producer` and caches its
    /// result for `ttl`.
    ///
    /// On a miss the miss is recorded **before** the producer runs, so the
    /// count stays accurate even if production dies midway. The store write
    /// happens only after producer success.
    ///
    /// With `skip_cache` a fresh value is always produced and returned, and
    /// the cache is neither read nor written; the invocation is recorded as a
    /// miss (every gate invocation counts as an access).
    ///
    /// # Errors
    ///
    /// - [`GateError::Producer`] — the producer failed; nothing was cached.
    /// - [`GateError::Encode`] — the produced value is not JSON-encodable.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        skip_cache: bool,
        producer: F,
    ) -> Result<T, GateError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _flight = match &self.flights {
            Some(table) => Some(Arc::clone(table).acquire(key).await),
            None => None,
        };

        if skip_cache {
            debug!(key, "cache bypass requested");
            self.metrics.record_miss(key);
            return producer().await.map_err(GateError::Producer);
        }

        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_slice::<T>(&raw) {
                Ok(value) => {
                    self.metrics.record_hit(key);
                    debug!(key, "cache hit");
                    return Ok(value);
                }
                Err(err) => {
                    // Stale schema or corrupt bytes: discard and fall through
                    // to the miss path so the entry self-heals.
                    warn!(key, error = %err, "undecodable cache entry discarded");
                    if let Err(err) = self.store.delete(key).await {
                        warn!(key, error = %err, "failed to discard cache entry");
                    }
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!(key, error = %err, "store unreachable on read, treating as miss");
            }
        }

        self.metrics.record_miss(key);
        debug!(key, "cache miss");

        let value = producer().await.map_err(GateError::Producer)?;
        let encoded = serde_json::to_vec(&value)?;
        if let Err(err) = self.store.set(key, Bytes::from(encoded), ttl).await {
            warn!(key, error = %err, "store unreachable on write, returning uncached value");
        }
        Ok(value)
    }

    /// [`get_or_compute`](Self::get_or_compute) with the key additionally
    /// registered under the given dependency tags, so an
    /// [`crate::admin::Invalidator`] can cascade-evict every key sharing a
    /// tag. Bypassing invocations register nothing.
    pub async fn get_or_compute_tagged<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        skip_cache: bool,
        tags: &[&str],
        producer: F,
    ) -> Result<T, GateError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let value = self.get_or_compute(key, ttl, skip_cache, producer).await?;
        if !skip_cache {
            self.tags.tag(key, tags);
        }
        Ok(value)
    }

    /// [`get_or_compute`](Self::get_or_compute) with this gate's default TTL
    /// and no bypass.
    pub async fn cached<T, E, F, Fut>(&self, key: &str, producer: F) -> Result<T, GateError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_or_compute(key, self.default_ttl, false, producer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BoxFuture, MemoryStore, StoreError};
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Weather {
        temp: f64,
    }

    #[derive(Debug, Error)]
    #[error("upstream failed")]
    struct UpstreamError;

    fn gate() -> CacheGate {
        CacheGate::new(Arc::new(MemoryStore::new()))
    }

    // Producer that reports {temp: 30.5} and counts its invocations.
    fn counting_producer(
        calls: Arc<AtomicUsize>,
    ) -> impl Fn() -> std::future::Ready<Result<Weather, UpstreamError>> {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(Weather { temp: 30.5 }))
        }
    }

    // ── read-through ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn second_call_is_a_hit_and_skips_the_producer() {
        let gate = gate();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(600);

        let first: Weather = gate
            .get_or_compute("city:manila", ttl, false, counting_producer(Arc::clone(&calls)))
            .await
            .unwrap();
        let second: Weather = gate
            .get_or_compute("city:manila", ttl, false, counting_producer(Arc::clone(&calls)))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first, Weather { temp: 30.5 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let snap = gate.metrics().snapshot();
        assert_eq!(snap.hits, 1);
        assert_eq!(snap.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_reproduces() {
        let gate = gate();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(600);

        let _: Weather = gate
            .get_or_compute("city:manila", ttl, false, counting_producer(Arc::clone(&calls)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(601)).await;
        let _: Weather = gate
            .get_or_compute("city:manila", ttl, false, counting_producer(Arc::clone(&calls)))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(gate.metrics().snapshot().misses, 2);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_share_entries() {
        let gate = gate();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(60);

        let _: Weather = gate
            .get_or_compute("city:manila", ttl, false, counting_producer(Arc::clone(&calls)))
            .await
            .unwrap();
        let _: Weather = gate
            .get_or_compute("city:oslo", ttl, false, counting_producer(Arc::clone(&calls)))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    // ── skip-cache ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn skip_cache_always_produces_fresh() {
        let gate = gate();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(60);

        let _: Weather = gate
            .get_or_compute("k", ttl, false, counting_producer(Arc::clone(&calls)))
            .await
            .unwrap();
        let _: Weather = gate
            .get_or_compute("k", ttl, true, counting_producer(Arc::clone(&calls)))
            .await
            .unwrap();

        // Bypassed even though a live entry existed.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn skip_cache_does_not_write() {
        let gate = gate();
        let ttl = Duration::from_secs(60);

        let _: Weather = gate
            .get_or_compute("k", ttl, true, || async {
                Ok::<_, UpstreamError>(Weather { temp: 10.0 })
            })
            .await
            .unwrap();

        assert_eq!(gate.store().count_keys("*").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn skip_cache_leaves_existing_entries_for_other_readers() {
        let gate = gate();
        let ttl = Duration::from_secs(60);

        let _: Weather = gate
            .get_or_compute("k", ttl, false, || async {
                Ok::<_, UpstreamError>(Weather { temp: 30.5 })
            })
            .await
            .unwrap();
        let fresh: Weather = gate
            .get_or_compute("k", ttl, true, || async {
                Ok::<_, UpstreamError>(Weather { temp: -5.0 })
            })
            .await
            .unwrap();
        let cached: Weather = gate
            .get_or_compute("k", ttl, false, || async {
                Ok::<_, UpstreamError>(Weather { temp: 99.9 })
            })
            .await
            .unwrap();

        assert_eq!(fresh, Weather { temp: -5.0 });
        // Other readers still see the original entry.
        assert_eq!(cached, Weather { temp: 30.5 });
    }

    // ── failures ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn producer_failure_propagates_and_is_not_cached() {
        let gate = gate();
        let ttl = Duration::from_secs(60);

        let result: Result<Weather, _> = gate
            .get_or_compute("k", ttl, false, || async { Err(UpstreamError) })
            .await;
        assert!(matches!(result, Err(GateError::Producer(_))));
        assert_eq!(gate.store().count_keys("*").await.unwrap(), 0);

        // Recovery on the next call is a miss, not a cached failure.
        let calls = Arc::new(AtomicUsize::new(0));
        let recovered: Weather = gate
            .get_or_compute("k", ttl, false, counting_producer(Arc::clone(&calls)))
            .await
            .unwrap();
        assert_eq!(recovered, Weather { temp: 30.5 });
        assert_eq!(gate.metrics().snapshot().misses, 2);
    }

    #[tokio::test]
    async fn miss_is_recorded_before_the_producer_runs() {
        let gate = gate();
        let ttl = Duration::from_secs(60);

        let result: Result<Weather, _> = gate
            .get_or_compute("k", ttl, false, || async { Err(UpstreamError) })
            .await;
        assert!(result.is_err());
        assert_eq!(gate.metrics().snapshot().misses, 1);
    }

    #[tokio::test]
    async fn non_json_value_is_rejected_at_the_boundary() {
        use std::collections::HashMap;

        let gate = gate();
        // Non-string map keys cannot be encoded as JSON objects.
        let result: Result<HashMap<Vec<u8>, u32>, GateError<UpstreamError>> = gate
            .get_or_compute("k", Duration::from_secs(60), false, || async {
                Ok(HashMap::from([(vec![1u8], 1u32)]))
            })
            .await;
        assert!(matches!(result, Err(GateError::Encode(_))));
    }

    #[tokio::test]
    async fn undecodable_entry_is_discarded_and_reproduced() {
        let gate = gate();
        let ttl = Duration::from_secs(60);

        gate.store()
            .set("k", Bytes::from_static(b"not json"), ttl)
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let value: Weather = gate
            .get_or_compute("k", ttl, false, counting_producer(Arc::clone(&calls)))
            .await
            .unwrap();
        assert_eq!(value, Weather { temp: 30.5 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(gate.metrics().snapshot().misses, 1);
    }

    // ── store degradation ─────────────────────────────────────────────────────

    struct DownStore;

    impl Store for DownStore {
        fn get<'a>(&'a self, _: &'a str) -> BoxFuture<'a, Result<Option<Bytes>, StoreError>> {
            Box::pin(async { Err(StoreError("connection refused".into())) })
        }
        fn set<'a>(
            &'a self,
            _: &'a str,
            _: Bytes,
            _: Duration,
        ) -> BoxFuture<'a, Result<(), StoreError>> {
            Box::pin(async { Err(StoreError("connection refused".into())) })
        }
        fn delete<'a>(&'a self, _: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
            Box::pin(async { Err(StoreError("connection refused".into())) })
        }
        fn count_keys<'a>(&'a self, _: &'a str) -> BoxFuture<'a, Result<usize, StoreError>> {
            Box::pin(async { Err(StoreError("connection refused".into())) })
        }
        fn delete_matching<'a>(&'a self, _: &'a str) -> BoxFuture<'a, Result<usize, StoreError>> {
            Box::pin(async { Err(StoreError("connection refused".into())) })
        }
    }

    #[tokio::test]
    async fn store_outage_degrades_to_uncached_production() {
        let gate = CacheGate::new(Arc::new(DownStore));
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(60);

        for _ in 0..2 {
            let value: Weather = gate
                .get_or_compute("k", ttl, false, counting_producer(Arc::clone(&calls)))
                .await
                .unwrap();
            assert_eq!(value, Weather { temp: 30.5 });
        }

        // Every call produced; every call counted as a miss.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let snap = gate.metrics().snapshot();
        assert_eq!(snap.hits, 0);
        assert_eq!(snap.misses, 2);
    }

    // ── single-flight ─────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn single_flight_collapses_concurrent_misses() {
        let gate = Arc::new(
            CacheGate::builder(Arc::new(MemoryStore::new()))
                .single_flight(true)
                .build(),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(60);

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let gate = Arc::clone(&gate);
            let calls = Arc::clone(&calls);
            tasks.push(tokio::spawn(async move {
                let value: Weather = gate
                    .get_or_compute("k", ttl, false, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok::<_, UpstreamError>(Weather { temp: 30.5 })
                    })
                    .await
                    .unwrap();
                value
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), Weather { temp: 30.5 });
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let snap = gate.metrics().snapshot();
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.hits, 3);
    }

    #[tokio::test]
    async fn without_single_flight_concurrent_misses_each_produce() {
        let gate = Arc::new(CacheGate::new(Arc::new(MemoryStore::new())));
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(60);

        // Both producers park on a shared gate so neither finishes before the
        // other has already missed.
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let mut tasks = Vec::new();
        for _ in 0..2 {
            let gate = Arc::clone(&gate);
            let calls = Arc::clone(&calls);
            let barrier = Arc::clone(&barrier);
            tasks.push(tokio::spawn(async move {
                let _: Weather = gate
                    .get_or_compute("k", ttl, false, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        barrier.wait().await;
                        Ok::<_, UpstreamError>(Weather { temp: 30.5 })
                    })
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Accepted baseline: redundant production, last write wins.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(gate.store().count_keys("*").await.unwrap(), 1);
    }

    // ── defaults ──────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn cached_uses_the_builder_default_ttl() {
        let gate = CacheGate::builder(Arc::new(MemoryStore::new()))
            .default_ttl(Duration::from_secs(5))
            .build();
        let calls = Arc::new(AtomicUsize::new(0));

        let _: Weather = gate.cached("k", counting_producer(Arc::clone(&calls))).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        let _: Weather = gate.cached("k", counting_producer(Arc::clone(&calls))).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
