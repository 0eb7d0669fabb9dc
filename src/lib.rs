//! # readthru
//!
//! A read-through response cache for async Rust services: a cache gate in
//! front of an expensive producer, with TTL expiry, deterministic key
//! derivation, hit/miss metrics, administrative invalidation, and a
//! background-producer status tracker.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use readthru::{CacheGate, MemoryStore, locale_key};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gate = CacheGate::new(Arc::new(MemoryStore::new()));
//!
//!     let key = locale_key(Some("Manila"), None, None)?;
//!     let weather: serde_json::Value = gate
//!         .get_or_compute(&key, Duration::from_secs(600), false, || async {
//!             // e.g. call the upstream weather API here
//!             Ok::<_, std::io::Error>(serde_json::json!({"temp": 30.5}))
//!         })
//!         .await?;
//!     println!("{weather}");
//!     Ok(())
//! }
//! ```
//!
//! The first call misses and caches the producer's result for ten minutes;
//! every call inside that window is a hit that never re-invokes the producer.

// ── Modules ───────────────────────────────────────────────────────────────────
pub mod admin;
pub mod gate;
pub mod keys;
pub mod metrics;
pub mod status;
pub mod store;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use admin::{CacheMetricsReport, InvalidationReport, Invalidator, TagIndex, metrics_report};
pub use gate::{CacheGate, CacheGateBuilder, GateError};
pub use keys::{KeyError, locale_key, nocache_requested, request_key};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use status::{SourceStatus, StatusTracker};
pub use store::{MemoryStore, Store, StoreError};
