//! Periodic connection stats publishing.
//!
//! Every interval the reporter counts open connections and distinct client
//! ids and hands the result to a [`StatsSink`]. A failed publish is logged
//! and the next tick simply tries again; the stored key carries a TTL so
//! readers see "unavailable" rather than stale numbers if the gateway dies.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use killfeed_store::{ConnectionStats, DragonflyPool, StoreError};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::ConnectionRegistry;

/// Destination for connection stats.
pub trait StatsSink: Send + Sync {
    /// Publish one stats record.
    fn publish(
        &self,
        stats: &ConnectionStats,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Writes stats to a `Dragonfly` key with an expiry.
#[derive(Debug, Clone)]
pub struct DragonflyStatsSink {
    pool: DragonflyPool,
    key: String,
    ttl_secs: u64,
}

impl DragonflyStatsSink {
    /// Create a sink writing to `key` with a `ttl_secs` expiry.
    pub const fn new(pool: DragonflyPool, key: String, ttl_secs: u64) -> Self {
        Self {
            pool,
            key,
            ttl_secs,
        }
    }
}

impl StatsSink for DragonflyStatsSink {
    async fn publish(&self, stats: &ConnectionStats) -> Result<(), StoreError> {
        self.pool
            .publish_stats(&self.key, stats, self.ttl_secs)
            .await
    }
}

/// Samples the registry and publishes the counts on a fixed interval.
#[derive(Debug)]
pub struct StatsReporter<S> {
    registry: Arc<ConnectionRegistry>,
    sink: S,
    interval: Duration,
}

impl<S: StatsSink> StatsReporter<S> {
    /// Create a reporter publishing to `sink` every `interval`.
    pub const fn new(registry: Arc<ConnectionRegistry>, sink: S, interval: Duration) -> Self {
        Self {
            registry,
            sink,
            interval,
        }
    }

    /// Sample and publish once.
    ///
    /// # Errors
    ///
    /// Returns the sink's [`StoreError`] if the publish fails.
    pub async fn report_once(&self) -> Result<ConnectionStats, StoreError> {
        let (connected, unique) = self.registry.counts().await;
        let stats = ConnectionStats::now(connected, unique);
        self.sink.publish(&stats).await?;
        debug!(
            connected_clients = stats.connected_clients,
            unique_clients = stats.unique_clients,
            "connection stats published"
        );
        Ok(stats)
    }

    /// Publish on every interval until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.reset();
        info!(interval_ms = self.interval.as_millis(), "stats reporter started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.report_once().await {
                        warn!(error = %e, "failed to publish connection stats");
                    }
                }
            }
        }

        info!("stats reporter stopped");
    }
}
