//! Topic-filtered fan-out and targeted direct delivery.
//!
//! Both paths work on a registry snapshot and enqueue frames with
//! `try_send`. A failed enqueue is recorded for that recipient and the loop
//! moves on; delivery never evicts. Eviction belongs to the liveness sweep.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use killfeed_routing::classify;
use killfeed_types::{BroadcastMeta, ClientId, CorrelationId, Killmail, ServerMessage, Topic};
use serde_json::Value;
use tracing::{debug, info};

use crate::connection::{ConnectionView, Frame};
use crate::error::GatewayError;
use crate::registry::ConnectionRegistry;

/// Per-delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Open connections selected as recipients.
    pub matched: usize,
    /// Recipients whose queue accepted the frame.
    pub delivered: usize,
    /// Recipients whose enqueue failed (full queue or closed writer).
    pub failed: usize,
}

/// Result of broadcasting one killmail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Shared by every recipient's `_meta.correlationId`.
    pub correlation_id: CorrelationId,
    /// Topics the killmail was routed to.
    pub routing_keys: BTreeSet<Topic>,
    /// Delivery counters.
    pub report: DeliveryReport,
}

/// Recipients of a direct message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectTarget {
    /// Every open connection, regardless of subscriptions.
    Everyone,
    /// Every connection registered under any of these client ids.
    Clients(Vec<ClientId>),
}

/// Delivers killmails and direct messages to registered connections.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    /// Create a broadcaster over `registry`.
    pub const fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Send a killmail to every open connection subscribed to at least one
    /// of its routing keys.
    ///
    /// The killmail is classified once and serialized once; all recipients
    /// share the same frame and correlation id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Serialization`] if the frame cannot be
    /// encoded. Nothing is sent in that case.
    pub async fn broadcast(&self, killmail: &Killmail) -> Result<BroadcastOutcome, GatewayError> {
        let routing_keys = classify(killmail);
        let correlation_id = CorrelationId::new();
        let frame = Frame::message(&ServerMessage::Killmail {
            data: killmail.raw.clone(),
            meta: BroadcastMeta { correlation_id },
        })?;

        let snapshot = self.registry.snapshot().await;
        let recipients = snapshot
            .iter()
            .filter(|conn| conn.is_open() && conn.matches(&routing_keys));
        let report = deliver(recipients, &frame);

        info!(
            correlation_id = %correlation_id,
            killmail_id = ?killmail.killmail_id,
            keys = routing_keys.len(),
            matched = report.matched,
            delivered = report.delivered,
            failed = report.failed,
            "killmail broadcast"
        );

        Ok(BroadcastOutcome {
            correlation_id,
            routing_keys,
            report,
        })
    }

    /// Send a `direct` frame carrying `payload`, bypassing topic filtering.
    ///
    /// Unknown client ids resolve to zero recipients; that is not an error.
    /// A connection is sent at most one copy even if the target list names
    /// its client id twice.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Serialization`] if the frame cannot be
    /// encoded.
    pub async fn send_direct(
        &self,
        target: &DirectTarget,
        payload: &Value,
    ) -> Result<DeliveryReport, GatewayError> {
        let frame = Frame::message(&ServerMessage::Direct {
            data: payload.clone(),
        })?;

        let recipients = match target {
            DirectTarget::Everyone => self.registry.snapshot().await,
            DirectTarget::Clients(client_ids) => {
                let mut seen = HashSet::new();
                let mut found = Vec::new();
                for client_id in client_ids {
                    for conn in self.registry.connections_for_client(client_id).await {
                        if seen.insert(conn.id) {
                            found.push(conn);
                        }
                    }
                }
                found
            }
        };
        let report = deliver(recipients.iter().filter(|conn| conn.is_open()), &frame);

        info!(
            recipients = ?target,
            matched = report.matched,
            delivered = report.delivered,
            failed = report.failed,
            "direct message sent"
        );
        Ok(report)
    }
}

fn deliver<'a>(recipients: impl Iterator<Item = &'a ConnectionView>, frame: &Frame) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for conn in recipients {
        report.matched = report.matched.saturating_add(1);
        match conn.send(frame.clone()) {
            Ok(()) => report.delivered = report.delivered.saturating_add(1),
            Err(e) => {
                report.failed = report.failed.saturating_add(1);
                debug!(conn_id = %conn.id, error = %e, "delivery failed");
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use killfeed_types::ConnectionId;
    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::connection::FrameReceiver;

    async fn connect(
        registry: &ConnectionRegistry,
        client: Option<&str>,
        capacity: usize,
    ) -> (ConnectionId, FrameReceiver) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(capacity);
        let client_id = client.and_then(ClientId::parse);
        assert!(registry.register(id, client_id, tx).await.is_ok());
        (id, rx)
    }

    fn victim_kill(character_id: u64) -> Killmail {
        Killmail::from_value(json!({
            "killmailId": 1,
            "victim": { "characterId": character_id }
        }))
    }

    fn parse(frame: Option<Frame>) -> Value {
        frame
            .as_ref()
            .and_then(Frame::as_text)
            .and_then(|text| serde_json::from_str(text).ok())
            .unwrap_or(Value::Null)
    }

    #[tokio::test]
    async fn victim_subscription_filters_by_id() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (id, mut rx) = connect(&registry, None, 8).await;
        let _ = registry
            .update_subscriptions(id, &["victim.500001".to_owned()], &[])
            .await;
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let hit = broadcaster.broadcast(&victim_kill(500_001)).await;
        assert_eq!(hit.map(|o| o.report.delivered).ok(), Some(1));
        let miss = broadcaster.broadcast(&victim_kill(500_002)).await;
        assert_eq!(miss.map(|o| o.report.matched).ok(), Some(0));

        let frame = parse(rx.recv().await);
        assert_eq!(frame["type"], "killmail");
        assert_eq!(frame["data"]["victim"]["characterId"], 500_001);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn recipients_share_one_correlation_id() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_, mut rx_a) = connect(&registry, None, 8).await;
        let (_, mut rx_b) = connect(&registry, None, 8).await;
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let outcome = broadcaster.broadcast(&victim_kill(1)).await.ok();
        let expected = outcome.map(|o| json!(o.correlation_id));
        let a = parse(rx_a.recv().await);
        let b = parse(rx_b.recv().await);
        assert_eq!(Some(a["_meta"]["correlationId"].clone()), expected);
        assert_eq!(a["_meta"], b["_meta"]);
    }

    #[tokio::test]
    async fn full_queue_is_counted_and_does_not_evict() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (slow, _rx_slow) = connect(&registry, None, 1).await;
        let (_, mut rx_fast) = connect(&registry, None, 8).await;
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let first = broadcaster.broadcast(&victim_kill(1)).await.ok();
        assert_eq!(first.map(|o| o.report.delivered), Some(2));
        let second = broadcaster.broadcast(&victim_kill(2)).await.ok();
        let report = second.map(|o| o.report).unwrap_or_default();
        assert_eq!((report.matched, report.delivered, report.failed), (2, 1, 1));

        assert!(registry.contains(slow).await);
        assert!(rx_fast.recv().await.is_some());
        assert!(rx_fast.recv().await.is_some());
    }

    #[tokio::test]
    async fn closed_connections_are_skipped() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_, rx) = connect(&registry, None, 8).await;
        drop(rx);
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let outcome = broadcaster.broadcast(&victim_kill(1)).await.ok();
        assert_eq!(outcome.map(|o| o.report), Some(DeliveryReport::default()));
    }

    #[tokio::test]
    async fn direct_reaches_every_session_of_a_client() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (first, mut rx_a) = connect(&registry, Some("abc"), 8).await;
        let (_, mut rx_b) = connect(&registry, Some("abc"), 8).await;
        let (_, mut rx_other) = connect(&registry, Some("xyz"), 8).await;
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let abc = ClientId::parse("abc").into_iter().collect::<Vec<_>>();
        let target = DirectTarget::Clients(abc);

        let report = broadcaster.send_direct(&target, &json!({"n": 1})).await.ok();
        assert_eq!(report.map(|r| r.delivered), Some(2));
        assert_eq!(parse(rx_a.recv().await), json!({"type": "direct", "data": {"n": 1}}));
        assert!(rx_b.recv().await.is_some());
        assert!(rx_other.try_recv().is_err());

        registry.deregister(first).await;
        let report = broadcaster.send_direct(&target, &json!({"n": 2})).await.ok();
        assert_eq!(report.map(|r| r.delivered), Some(1));
        assert_eq!(parse(rx_b.recv().await)["data"]["n"], 2);
    }

    #[tokio::test]
    async fn direct_to_unknown_client_delivers_nothing() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_, mut rx) = connect(&registry, Some("abc"), 8).await;
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let target = DirectTarget::Clients(ClientId::parse("nobody").into_iter().collect());

        let report = broadcaster.send_direct(&target, &json!("hi")).await;
        assert_eq!(report.ok(), Some(DeliveryReport::default()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn direct_to_everyone_ignores_topics() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (id, mut rx) = connect(&registry, None, 8).await;
        let _ = registry
            .update_subscriptions(id, &["titans".to_owned()], &[])
            .await;
        let (_, mut rx_anon) = connect(&registry, None, 8).await;
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let report = broadcaster.send_direct(&DirectTarget::Everyone, &json!("maintenance")).await;
        assert_eq!(report.map(|r| r.delivered).ok(), Some(2));
        assert_eq!(parse(rx.recv().await)["data"], "maintenance");
        assert!(rx_anon.recv().await.is_some());
    }

    #[tokio::test]
    async fn duplicate_client_ids_deliver_once() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_, mut rx) = connect(&registry, Some("abc"), 8).await;
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let abc: Vec<ClientId> = ["abc", "abc"].iter().filter_map(|s| ClientId::parse(s)).collect();

        let report = broadcaster.send_direct(&DirectTarget::Clients(abc), &json!(1)).await;
        assert_eq!(report.map(|r| r.delivered).ok(), Some(1));
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }
}
