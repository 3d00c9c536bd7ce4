//! Application-level keep-alive.
//!
//! Two independent timers drive this module:
//!
//! - every `ping_interval` the monitor sends `{"type":"ping","timestamp":..}`
//!   to every open connection and records the send time, and
//! - every `sweep_interval` it evicts connections whose outstanding ping
//!   has gone unanswered for longer than `pong_timeout`.
//!
//! An unanswered ping is never refreshed by a later tick, so a silent peer
//! is evicted no earlier than `pong_timeout` and no later than
//! `pong_timeout + sweep_interval` after the ping that went unanswered.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use killfeed_types::ServerMessage;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::DeliveryReport;
use crate::connection::Frame;
use crate::error::GatewayError;
use crate::registry::{ConnectionRegistry, Eviction};

/// Close code sent to an evicted connection (normal closure).
pub const EVICTION_CLOSE_CODE: u16 = 1000;

/// Close reason sent to an evicted connection.
pub const EVICTION_REASON: &str = "Ping timeout";

/// Timer settings for the liveness monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessSettings {
    /// How often pings are sent.
    pub ping_interval: Duration,
    /// How often stale connections are swept.
    pub sweep_interval: Duration,
    /// How long a ping may stay unanswered.
    pub pong_timeout: Duration,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

/// Sends pings and evicts connections that stop answering.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    registry: Arc<ConnectionRegistry>,
    settings: LivenessSettings,
}

impl LivenessMonitor {
    /// Create a monitor over `registry`.
    pub const fn new(registry: Arc<ConnectionRegistry>, settings: LivenessSettings) -> Self {
        Self { registry, settings }
    }

    /// Ping every open connection once.
    ///
    /// The ping time is recorded even when the enqueue fails, so a peer
    /// whose queue stays full is eventually evicted like a silent one.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Serialization`] if the ping frame cannot be
    /// encoded.
    pub async fn tick(&self) -> Result<DeliveryReport, GatewayError> {
        let frame = Frame::message(&ServerMessage::Ping {
            timestamp: Utc::now().timestamp_millis(),
        })?;
        let sent_at = Instant::now();

        let mut report = DeliveryReport::default();
        let mut pinged = Vec::new();
        for conn in self.registry.snapshot().await {
            if !conn.is_open() {
                continue;
            }
            report.matched = report.matched.saturating_add(1);
            pinged.push(conn.id);
            match conn.send(frame.clone()) {
                Ok(()) => report.delivered = report.delivered.saturating_add(1),
                Err(e) => {
                    report.failed = report.failed.saturating_add(1);
                    debug!(conn_id = %conn.id, error = %e, "ping not queued");
                }
            }
        }
        self.registry.record_pings(&pinged, sent_at).await;

        debug!(
            pinged = report.matched,
            failed = report.failed,
            "ping round sent"
        );
        Ok(report)
    }

    /// Evict every connection whose ping went unanswered past the timeout.
    pub async fn sweep(&self) -> Vec<Eviction> {
        let evicted = self
            .registry
            .evict_expired(
                Instant::now(),
                self.settings.pong_timeout,
                EVICTION_CLOSE_CODE,
                EVICTION_REASON,
            )
            .await;
        for eviction in &evicted {
            info!(
                conn_id = %eviction.id,
                client_id = ?eviction.client_id.as_ref().map(killfeed_types::ClientId::as_str),
                elapsed_ms = eviction.unanswered_for.as_millis(),
                "connection evicted: ping timeout"
            );
        }
        evicted
    }

    /// Run both timers until `shutdown` is cancelled.
    ///
    /// The first ping and the first sweep happen one full interval after
    /// start.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ping = interval(self.settings.ping_interval);
        let mut sweep = interval(self.settings.sweep_interval);
        for timer in [&mut ping, &mut sweep] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer.reset();
        }

        info!(
            ping_interval_ms = self.settings.ping_interval.as_millis(),
            sweep_interval_ms = self.settings.sweep_interval.as_millis(),
            pong_timeout_ms = self.settings.pong_timeout.as_millis(),
            "liveness monitor started"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ping.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "failed to send ping round");
                    }
                }
                _ = sweep.tick() => {
                    self.sweep().await;
                }
            }
        }

        info!("liveness monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use killfeed_types::{ClientId, ConnectionId};
    use tokio::sync::mpsc;

    use crate::connection::FrameReceiver;

    async fn connect(registry: &ConnectionRegistry) -> (ConnectionId, FrameReceiver) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(8);
        assert!(registry.register(id, ClientId::parse("abc"), tx).await.is_ok());
        (id, rx)
    }

    fn monitor(registry: &Arc<ConnectionRegistry>) -> LivenessMonitor {
        LivenessMonitor::new(Arc::clone(registry), LivenessSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn tick_sends_ping_frames() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_, mut rx) = connect(&registry).await;
        let report = monitor(&registry).tick().await.ok();
        assert_eq!(report.map(|r| r.delivered), Some(1));

        let frame = rx.recv().await;
        let value: serde_json::Value = frame
            .as_ref()
            .and_then(Frame::as_text)
            .and_then(|t| serde_json::from_str(t).ok())
            .unwrap_or_default();
        assert_eq!(value.get("type"), Some(&serde_json::json!("ping")));
        assert!(value.get("timestamp").is_some_and(serde_json::Value::is_i64));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_ping_is_evicted_after_timeout() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (id, mut rx) = connect(&registry).await;
        let monitor = monitor(&registry);
        let _ = monitor.tick().await;
        let _ = rx.recv().await;

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(monitor.sweep().await.is_empty());
        assert!(registry.contains(id).await);

        tokio::time::advance(Duration::from_secs(1)).await;
        let evicted = monitor.sweep().await;
        assert_eq!(evicted.iter().map(|e| e.id).collect::<Vec<_>>(), vec![id]);
        assert!(!registry.contains(id).await);
        match rx.recv().await {
            Some(Frame::Close { code, reason }) => {
                assert_eq!(code, EVICTION_CLOSE_CODE);
                assert_eq!(reason, EVICTION_REASON);
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn answered_ping_keeps_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (id, _rx) = connect(&registry).await;
        let monitor = monitor(&registry);
        let _ = monitor.tick().await;

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(registry.record_pong(id, Instant::now()).await);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(monitor.sweep().await.is_empty());
        assert!(registry.contains(id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_lands_within_timeout_plus_one_sweep() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (id, _rx) = connect(&registry).await;
        let settings = LivenessSettings::default();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(
            LivenessMonitor::new(Arc::clone(&registry), settings).run(shutdown.clone()),
        );

        // First ping goes out at t=30s.
        let ping_at = settings.ping_interval;
        tokio::time::sleep(ping_at + settings.pong_timeout - Duration::from_millis(100)).await;
        assert!(registry.contains(id).await, "evicted before the timeout");

        tokio::time::sleep(settings.sweep_interval + Duration::from_millis(200)).await;
        assert!(!registry.contains(id).await, "still present after timeout + sweep");

        shutdown.cancel();
        assert!(task.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(monitor(&registry).run(shutdown.clone()));
        shutdown.cancel();
        assert!(task.await.is_ok());
    }
}
