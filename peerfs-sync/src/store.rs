//! Overlay key-value store abstraction.
//!
//! The DHT itself (routing, replication, discovery) is external. The core
//! only needs versioned get, conditional put and remove. Reads are
//! eventually consistent: a get may return an older record, and staleness
//! is resolved by comparing versions, never timestamps.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;

/// A stored value and the version it was written at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    /// The stored bytes.
    pub value: Vec<u8>,
    /// Monotonic record version, starting at 1 for the first write.
    pub version: u64,
}

/// Version reported for a key that has never been written.
pub const ABSENT_VERSION: u64 = 0;

/// The overlay key-value store.
#[async_trait]
pub trait OverlayStore: Send + Sync {
    /// Reads the record under `key`, if any.
    async fn get(&self, key: &str) -> SyncResult<Option<VersionedValue>>;

    /// Writes `value` only if the stored version equals `expected_version`
    /// ([`ABSENT_VERSION`] for a key that must not exist yet). Returns the
    /// new version, or [`SyncError::Conflict`] if the record moved on.
    async fn put(&self, key: &str, value: Vec<u8>, expected_version: u64) -> SyncResult<u64>;

    /// Removes the record under `key`. Missing keys yield
    /// [`SyncError::NotFound`].
    async fn remove(&self, key: &str) -> SyncResult<()>;
}

/// An in-memory overlay for testing and single-process use.
pub mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Records {
        current: HashMap<String, VersionedValue>,
        previous: HashMap<String, VersionedValue>,
        lagging: HashSet<String>,
    }

    /// In-memory overlay with an operation counter, optional latency and
    /// injectable stale reads.
    #[derive(Debug, Default)]
    pub struct MemoryOverlay {
        records: Mutex<Records>,
        operations: AtomicUsize,
        latency: Option<Duration>,
    }

    impl MemoryOverlay {
        /// Creates an empty overlay.
        pub fn new() -> Self {
            Self::default()
        }

        /// Creates an overlay that delays every operation.
        pub fn with_latency(latency: Duration) -> Self {
            Self {
                latency: Some(latency),
                ..Self::default()
            }
        }

        /// Number of get/put/remove calls received so far.
        pub fn operation_count(&self) -> usize {
            self.operations.load(Ordering::SeqCst)
        }

        /// Makes the next get of `key` return the record it replaced, as a
        /// lagging replica would.
        pub fn lag_next_get(&self, key: &str) {
            self.lock().lagging.insert(key.to_string());
        }

        /// Returns the current version of `key` without counting an operation.
        pub fn version_of(&self, key: &str) -> u64 {
            self.lock()
                .current
                .get(key)
                .map_or(ABSENT_VERSION, |r| r.version)
        }

        /// Whether a record exists under `key`, without counting an operation.
        pub fn contains(&self, key: &str) -> bool {
            self.lock().current.contains_key(key)
        }

        fn lock(&self) -> MutexGuard<'_, Records> {
            self.records.lock().unwrap_or_else(PoisonError::into_inner)
        }

        async fn begin(&self) {
            self.operations.fetch_add(1, Ordering::SeqCst);
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
        }
    }

    #[async_trait]
    impl OverlayStore for MemoryOverlay {
        async fn get(&self, key: &str) -> SyncResult<Option<VersionedValue>> {
            self.begin().await;
            let mut records = self.lock();
            if records.lagging.remove(key) {
                if let Some(previous) = records.previous.get(key) {
                    return Ok(Some(previous.clone()));
                }
            }
            Ok(records.current.get(key).cloned())
        }

        async fn put(&self, key: &str, value: Vec<u8>, expected_version: u64) -> SyncResult<u64> {
            self.begin().await;
            let mut records = self.lock();
            let current = records
                .current
                .get(key)
                .map_or(ABSENT_VERSION, |r| r.version);
            if current != expected_version {
                return Err(SyncError::Conflict {
                    expected: expected_version,
                    current,
                });
            }
            let version = current + 1;
            let replaced = records
                .current
                .insert(key.to_string(), VersionedValue { value, version });
            if let Some(replaced) = replaced {
                records.previous.insert(key.to_string(), replaced);
            }
            Ok(version)
        }

        async fn remove(&self, key: &str) -> SyncResult<()> {
            self.begin().await;
            let mut records = self.lock();
            records.previous.remove(key);
            match records.current.remove(key) {
                Some(_) => Ok(()),
                None => Err(SyncError::NotFound(key.to_string())),
            }
        }
    }
}
