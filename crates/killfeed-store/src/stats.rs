//! Connection statistics published for out-of-process readers.
//!
//! Readers must treat a missing key as "stats unavailable", never as zero
//! connections: the key expires when the gateway stops refreshing it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dragonfly::DragonflyPool;
use crate::error::StoreError;

/// Default key holding the stats blob.
pub const DEFAULT_STATS_KEY: &str = "killfeed:ws:stats";

/// Point-in-time connection counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    /// Number of open WebSocket connections.
    pub connected_clients: usize,
    /// Number of distinct client identifiers among them.
    pub unique_clients: usize,
    /// When the counts were taken.
    pub timestamp: DateTime<Utc>,
}

impl ConnectionStats {
    /// Build a stats record stamped with the current time.
    pub fn now(connected_clients: usize, unique_clients: usize) -> Self {
        Self {
            connected_clients,
            unique_clients,
            timestamp: Utc::now(),
        }
    }
}

impl DragonflyPool {
    /// Write `stats` to `key`, expiring after `ttl_secs`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if serialization or the write fails.
    pub async fn publish_stats(
        &self,
        key: &str,
        stats: &ConnectionStats,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        self.set_json_with_ttl(key, stats, ttl_secs).await
    }

    /// Read the stats at `key`, `None` when expired or never written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read or deserialization fails.
    pub async fn read_stats(&self, key: &str) -> Result<Option<ConnectionStats>, StoreError> {
        self.get_json(key).await
    }
}
