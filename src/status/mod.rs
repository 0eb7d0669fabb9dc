//! Background-producer status tracking.
//!
//! [`StatusTracker`] records the last observed state of asynchronous
//! producers (a scraper per news source, a report generator) under short-TTL
//! `status:{source}` keys, for observability only: reading a status never
//! gates production, and a stale status simply reads as unknown.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::keys::status_key;
use crate::store::{Store, StoreError};

/// How long a recorded status stays observable unless refreshed.
pub const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(300);

/// Last-known state of a background producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Pending,
    Started,
    Success,
    Failed,
}

impl SourceStatus {
    /// The wire form stored under the status key.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    fn parse(raw: &[u8]) -> Option<Self> {
        match raw {
            b"pending" => Some(Self::Pending),
            b"started" => Some(Self::Started),
            b"success" => Some(Self::Success),
            b"failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Records and reads per-source producer status with expiring entries.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use readthru::{MemoryStore, SourceStatus, StatusTracker};
///
/// # #[tokio::main(flavor = "current_thread")] async fn main() {
/// let tracker = StatusTracker::new(Arc::new(MemoryStore::new()));
/// tracker.set_status("bbc", SourceStatus::Started).await.unwrap();
/// assert_eq!(tracker.get_status("bbc").await, Some(SourceStatus::Started));
/// assert_eq!(tracker.get_status("cnn").await, None);
/// # }
/// ```
pub struct StatusTracker {
    store: Arc<dyn Store>,
    ttl: Duration,
}

impl StatusTracker {
    /// Creates a tracker with [`DEFAULT_STATUS_TTL`].
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_ttl(store, DEFAULT_STATUS_TTL)
    }

    /// Creates a tracker with a custom default TTL.
    pub fn with_ttl(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Records `status` for `source` with the tracker's default TTL.
    pub async fn set_status(&self, source: &str, status: SourceStatus) -> Result<(), StoreError> {
        self.set_status_with_ttl(source, status, self.ttl).await
    }

    /// Records `status` for `source` with an explicit TTL.
    pub async fn set_status_with_ttl(
        &self,
        source: &str,
        status: SourceStatus,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let key = status_key(source);
        let value = Bytes::from_static(status.as_str().as_bytes());
        self.store.set(&key, value, ttl).await
    }

    /// Reads the last known status for `source`, or `None` when it was never
    /// recorded, has expired, or the store is unreachable. Observability must
    /// not fail its callers, so store errors degrade to unknown with a log
    /// line.
    pub async fn get_status(&self, source: &str) -> Option<SourceStatus> {
        let key = status_key(source);
        let raw = match self.store.get(&key).await {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(source, error = %err, "store unreachable reading status");
                return None;
            }
        };
        let status = SourceStatus::parse(&raw);
        if status.is_none() {
            warn!(source, "unrecognized status bytes ignored");
        }
        status
    }
}
