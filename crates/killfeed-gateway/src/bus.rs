//! NATS intake for killmail events and direct messages.
//!
//! Two subjects are consumed:
//!
//! - the event subject (default `killfeed.killmails`) carries killmails,
//!   which are classified and broadcast by topic, and
//! - the direct subject (default `killfeed.direct`) carries targeted pushes
//!   that bypass topic filtering.
//!
//! Both subscriptions are driven from one task. A malformed message is
//! logged at warn and dropped; it never stops the loop.

use futures::StreamExt;
use killfeed_types::{ClientId, Killmail};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastOutcome, Broadcaster, DeliveryReport, DirectTarget};
use crate::config::BusConfig;

/// Errors from the bus layer.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Could not connect to the NATS server.
    #[error("NATS connection error: {0}")]
    Connect(String),

    /// Could not subscribe to a subject.
    #[error("NATS subscribe error: {0}")]
    Subscribe(String),

    /// The message body is not valid JSON.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    /// The message has no usable payload.
    #[error("message has no payload")]
    MissingPayload,
}

/// A parsed direct-channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectEnvelope {
    /// Who receives it.
    pub target: DirectTarget,
    /// Opaque payload forwarded as `data`.
    pub payload: Value,
}

/// NATS client bound to the gateway's two subjects.
pub struct BusSubscriber {
    client: async_nats::Client,
    event_subject: String,
    direct_subject: String,
}

impl BusSubscriber {
    /// Connect to the NATS server in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Connect`] if the connection cannot be established.
    pub async fn connect(config: &BusConfig) -> Result<Self, BusError> {
        let url = config.nats_url.as_str();
        info!(url, "connecting to NATS server");
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::Connect(format!("failed to connect to {url}: {e}")))?;
        info!("NATS connection established");
        Ok(Self {
            client,
            event_subject: config.event_subject.clone(),
            direct_subject: config.direct_subject.clone(),
        })
    }

    /// Subscribe to the event and direct subjects.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Subscribe`] if either subscription fails.
    pub async fn subscribe(&self) -> Result<BusSubscriptions, BusError> {
        let events = self.subscribe_to(&self.event_subject).await?;
        let direct = self.subscribe_to(&self.direct_subject).await?;
        Ok(BusSubscriptions { events, direct })
    }

    async fn subscribe_to(&self, subject: &str) -> Result<async_nats::Subscriber, BusError> {
        let subscriber = self
            .client
            .subscribe(subject.to_owned())
            .await
            .map_err(|e| BusError::Subscribe(format!("failed to subscribe to {subject}: {e}")))?;
        info!(subject, "subscribed");
        Ok(subscriber)
    }
}

impl std::fmt::Debug for BusSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusSubscriber")
            .field("event_subject", &self.event_subject)
            .field("direct_subject", &self.direct_subject)
            .finish_non_exhaustive()
    }
}

/// Active subscriptions on both subjects.
#[derive(Debug)]
pub struct BusSubscriptions {
    events: async_nats::Subscriber,
    direct: async_nats::Subscriber,
}

impl BusSubscriptions {
    /// Dispatch messages until `shutdown` is cancelled or a subscription
    /// ends. Both subscriptions are unsubscribed before returning.
    pub async fn run(mut self, broadcaster: Broadcaster, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                msg = self.events.next() => {
                    let Some(msg) = msg else {
                        warn!("event subscription ended");
                        break;
                    };
                    handle_event_message(&broadcaster, &msg.payload).await;
                }
                msg = self.direct.next() => {
                    let Some(msg) = msg else {
                        warn!("direct subscription ended");
                        break;
                    };
                    handle_direct_message(&broadcaster, &msg.payload).await;
                }
            }
        }

        for (name, subscriber) in [("event", &mut self.events), ("direct", &mut self.direct)] {
            if let Err(e) = subscriber.unsubscribe().await {
                warn!(subscription = name, error = %e, "failed to unsubscribe");
            }
        }
        info!("bus subscriptions closed");
    }
}

/// Parse and broadcast one event-channel message.
///
/// Returns `None` when the message was dropped.
pub async fn handle_event_message(
    broadcaster: &Broadcaster,
    payload: &[u8],
) -> Option<BroadcastOutcome> {
    let killmail = match parse_event_envelope(payload) {
        Ok(killmail) => killmail,
        Err(e) => {
            warn!(error = %e, bytes = payload.len(), "dropping event message");
            return None;
        }
    };
    match broadcaster.broadcast(&killmail).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            warn!(error = %e, "failed to broadcast killmail");
            None
        }
    }
}

/// Parse and deliver one direct-channel message.
///
/// Returns `None` when the message was dropped.
pub async fn handle_direct_message(
    broadcaster: &Broadcaster,
    payload: &[u8],
) -> Option<DeliveryReport> {
    let envelope = match parse_direct_envelope(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, bytes = payload.len(), "dropping direct message");
            return None;
        }
    };
    debug!(target_clients = ?envelope.target, "direct message received");
    match broadcaster
        .send_direct(&envelope.target, &envelope.payload)
        .await
    {
        Ok(report) => Some(report),
        Err(e) => {
            warn!(error = %e, "failed to deliver direct message");
            None
        }
    }
}

/// Extract the killmail from an event-channel message.
///
/// Accepted shapes, checked in order:
/// `{"type":"killmail","data":{..}}`, `{"killmail":{..}}`, `{"data":{..}}`,
/// or the killmail object itself.
///
/// # Errors
///
/// Returns [`BusError::Json`] for invalid JSON and
/// [`BusError::MissingPayload`] when no killmail object can be found.
pub fn parse_event_envelope(bytes: &[u8]) -> Result<Killmail, BusError> {
    let Value::Object(mut envelope) = serde_json::from_slice(bytes)? else {
        return Err(BusError::MissingPayload);
    };
    let payload = if envelope.get("type").and_then(Value::as_str) == Some("killmail") {
        take(&mut envelope, &["data"])
    } else if let Some(killmail) = take(&mut envelope, &["killmail", "data"]) {
        Some(killmail)
    } else if envelope.is_empty() {
        None
    } else {
        Some(Value::Object(envelope))
    };
    match payload {
        Some(killmail @ Value::Object(_)) => Ok(Killmail::from_value(killmail)),
        _ => Err(BusError::MissingPayload),
    }
}

/// Extract target and payload from a direct-channel message.
///
/// Targets are read from `clientIds`, `client_ids` or `targets`, as an array
/// of strings or a single string. A missing or empty list targets everyone.
/// A non-empty list whose entries are all blank targets nobody. The payload
/// is read from `data`, `message` or `payload`.
///
/// # Errors
///
/// Returns [`BusError::Json`] for invalid JSON and
/// [`BusError::MissingPayload`] when no payload field is present.
pub fn parse_direct_envelope(bytes: &[u8]) -> Result<DirectEnvelope, BusError> {
    let Value::Object(mut envelope) = serde_json::from_slice(bytes)? else {
        return Err(BusError::MissingPayload);
    };
    let payload =
        take(&mut envelope, &["data", "message", "payload"]).ok_or(BusError::MissingPayload)?;

    let target = match take(&mut envelope, &["clientIds", "client_ids", "targets"]) {
        Some(Value::Array(ids)) if !ids.is_empty() => DirectTarget::Clients(
            ids.iter()
                .filter_map(Value::as_str)
                .filter_map(ClientId::parse)
                .collect(),
        ),
        Some(Value::String(id)) => ClientId::parse(&id)
            .map_or(DirectTarget::Everyone, |id| DirectTarget::Clients(vec![id])),
        _ => DirectTarget::Everyone,
    };

    Ok(DirectEnvelope { target, payload })
}

/// Remove and return the first non-null value under any of `keys`.
fn take(map: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
    keys.iter()
        .find_map(|key| map.remove(*key).filter(|value| !value.is_null()))
}
