//! Sync configuration.

use crate::error::SyncResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by the profile controller, the process tree and
/// the peer messenger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Device name for identification.
    pub device_name: String,
    /// Maximum number of tree operations running at once.
    pub worker_pool_size: usize,
    /// Attempts after a lost compare-and-swap before giving up.
    pub conflict_retries: usize,
    /// Attempts after a timed-out round trip before giving up.
    pub network_retries: usize,
    /// First backoff delay (ms).
    pub backoff_min_ms: u64,
    /// Backoff ceiling (ms).
    pub backoff_max_ms: u64,
    /// Bounded wait for a single store or peer round trip (ms).
    pub request_timeout_ms: u64,
    /// Workers executing verified peer messages.
    pub message_workers: usize,
    /// Verified messages that may wait for a worker.
    pub message_queue_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_name: "peerfs device".to_string(),
            worker_pool_size: 8,
            conflict_retries: 5,
            network_retries: 3,
            backoff_min_ms: 10,
            backoff_max_ms: 500,
            request_timeout_ms: 30_000,
            message_workers: 4,
            message_queue_capacity: 64,
        }
    }
}

impl SyncConfig {
    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Bounded wait for one round trip.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// First backoff delay.
    pub fn backoff_min(&self) -> Duration {
        Duration::from_millis(self.backoff_min_ms)
    }

    /// Backoff ceiling.
    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}
