//! Key-value store abstraction — the expiring backend behind the cache gate.
//!
//! This module defines [`Store`], the trait every cache backend implements, and
//! [`MemoryStore`], the in-process implementation used by default. The gate is
//! agnostic about what sits behind the trait: an in-process map here, a
//! networked key-value service elsewhere.
//!
//! ## Core types
//!
//! - [`Store`] — object-safe async trait: `get` / `set` / `delete` /
//!   `count_keys` / `delete_matching`, all with per-entry TTL semantics.
//! - [`MemoryStore`] — concurrent in-memory store with lazy eviction and an
//!   optional periodic sweeper.
//! - [`StoreError`] — backend failure; the gate treats it as a miss, the
//!   administrative surface propagates it.
//!
//! Expiry is lazy: an entry past its deadline is removed the next time any
//! operation touches it, and behaves exactly like a key that was never written.

mod memory;

pub use memory::MemoryStore;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

/// A pinned, heap-allocated future — the object-safe return type for [`Store`]
/// methods, mirroring how type-erased async handlers are stored elsewhere in
/// the crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The backing store failed or is unreachable.
///
/// Carries a human-readable reason. Callers on the read path degrade to a miss
/// instead of surfacing this; administrative callers propagate it.
#[derive(Debug, Error)]
#[error("store unavailable: {0}")]
pub struct StoreError(pub String);

/// An expiring key-value backend for cached response bytes.
///
/// Values are opaque [`Bytes`]; the gate handles (de)serialization. Every
/// entry carries an absolute expiry deadline derived from the `ttl` passed to
/// [`set`](Store::set), and a read past that deadline must behave identically
/// to a key that was never written.
///
/// # Contract
///
/// - Implementations **must** be safe under concurrent reads and writes to the
///   same key: overwrites are atomic replaces, never partial mutation.
/// - `get` on an expired entry **must** return `None` and purge the stale
///   entry (lazy eviction).
/// - `count_keys` and `delete_matching` **must not** count or retain entries
///   that have already expired.
pub trait Store: Send + Sync {
    /// Look up the live value for `key`, or `None` on a miss (including a key
    /// whose entry has expired).
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Bytes>, StoreError>>;

    /// Write `value` under `key` with absolute expiry `now + ttl`, replacing
    /// any previous entry.
    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Bytes,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Remove the entry for `key`, reporting whether a live entry was deleted.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, StoreError>>;

    /// Count live keys matching `pattern` (see [`key_matches`] for the
    /// supported grammar).
    fn count_keys<'a>(&'a self, pattern: &'a str) -> BoxFuture<'a, Result<usize, StoreError>>;

    /// Remove every live key matching `pattern`, returning how many were
    /// deleted.
    fn delete_matching<'a>(&'a self, pattern: &'a str)
    -> BoxFuture<'a, Result<usize, StoreError>>;
}

/// Matches a key against the store pattern grammar.
///
/// Deliberately narrow — it covers what the administrative surface needs and
/// nothing more:
///
/// | Pattern    | Matches                          |
/// |------------|----------------------------------|
/// | `*`        | every key                        |
/// | `prefix*`  | keys starting with `prefix`      |
/// | anything else | that exact key                |
pub fn key_matches(pattern: &str, key: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}
