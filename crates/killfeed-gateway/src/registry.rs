//! The connection registry.
//!
//! [`ConnectionRegistry`] is the only mutable shared state in the gateway.
//! It holds two maps behind a single [`RwLock`]:
//!
//! - the primary map, connection id -> subscription and liveness state
//!   (the entry owns the connection's outbound queue sender), and
//! - the client index, client id -> set of connection ids, a non-owning
//!   secondary index used for targeted delivery.
//!
//! Both maps are only ever changed together under the write lock, so every
//! id in the client index is present in the primary map with the same client
//! id, and vice versa. Readers get [`ConnectionView`] copies via
//! [`ConnectionRegistry::snapshot`]; the live maps never leave this module.
//!
//! Removing an entry drops the registry's sender and cancels the
//! connection's close token. The writer task then gets a short grace period
//! to flush what is already queued before it drops the socket, so a removed
//! connection is closed even when its queue is full and its peer has stopped
//! reading.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use killfeed_types::{ClientId, ConnectionId, KnownTopic, Topic, TopicError};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::{ConnectionView, Frame, FrameSender, Liveness, try_send};
use crate::error::RegistryError;

/// A topic string that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedTopic {
    /// The string as the client sent it.
    pub topic: String,
    /// Why it was rejected.
    pub reason: TopicError,
}

/// Result of [`ConnectionRegistry::update_subscriptions`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    /// Valid topics applied from the `add` list.
    pub added: Vec<Topic>,
    /// Valid topics applied from the `remove` list.
    pub removed: Vec<Topic>,
    /// Invalid topics from either list; none of them touched the set.
    pub rejected: Vec<RejectedTopic>,
}

impl SubscriptionUpdate {
    /// The rejected topic strings, in request order.
    pub fn rejected_names(&self) -> Vec<String> {
        self.rejected.iter().map(|r| r.topic.clone()).collect()
    }
}

/// A connection removed by the liveness sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    /// The evicted connection.
    pub id: ConnectionId,
    /// Its client identifier, if any.
    pub client_id: Option<ClientId>,
    /// How long its last ping went unanswered.
    pub unanswered_for: Duration,
}

#[derive(Debug)]
struct Entry {
    client_id: Option<ClientId>,
    topics: Arc<BTreeSet<Topic>>,
    /// Still on the implicit `{all}` default; the first applied `add`
    /// replaces it instead of extending it.
    default_topics: bool,
    connected_at: DateTime<Utc>,
    last_ping_sent_at: Option<Instant>,
    last_pong_received_at: Option<Instant>,
    sender: FrameSender,
    closed: CancellationToken,
}

impl Entry {
    fn view(&self, id: ConnectionId) -> ConnectionView {
        ConnectionView {
            id,
            client_id: self.client_id.clone(),
            topics: Arc::clone(&self.topics),
            connected_at: self.connected_at,
            last_ping_sent_at: self.last_ping_sent_at,
            last_pong_received_at: self.last_pong_received_at,
            sender: self.sender.clone(),
        }
    }

    fn ping_outstanding(&self) -> bool {
        match self.last_ping_sent_at {
            Some(ping) => !self.last_pong_received_at.is_some_and(|pong| pong >= ping),
            None => false,
        }
    }

    /// Queue a close frame and cancel the close token.
    ///
    /// The token fires even when the frame cannot be queued, so a jammed
    /// writer still gives up on the socket.
    fn close(&self, code: u16, reason: &str) {
        let _ = try_send(
            &self.sender,
            Frame::Close {
                code,
                reason: reason.to_owned(),
            },
        );
        self.closed.cancel();
    }
}

#[derive(Debug, Default)]
struct Inner {
    connections: HashMap<ConnectionId, Entry>,
    clients: HashMap<ClientId, HashSet<ConnectionId>>,
}

impl Inner {
    /// Remove `id` from both maps.
    fn remove(&mut self, id: ConnectionId) -> Option<Entry> {
        let entry = self.connections.remove(&id)?;
        if let Some(client_id) = &entry.client_id {
            if let Some(ids) = self.clients.get_mut(client_id) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.clients.remove(client_id);
                }
            }
        }
        Some(entry)
    }
}

/// In-memory registry of open connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open connection with the default `{all}` subscription.
    ///
    /// Returns the connection's close token. It is cancelled when the entry
    /// is removed, whether by [`deregister`](Self::deregister), an eviction
    /// or [`close_all`](Self::close_all); the writer task watches it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyRegistered`] if `id` is present.
    pub async fn register(
        &self,
        id: ConnectionId,
        client_id: Option<ClientId>,
        sender: FrameSender,
    ) -> Result<CancellationToken, RegistryError> {
        let mut inner = self.inner.write().await;
        if inner.connections.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        if let Some(client) = &client_id {
            inner.clients.entry(client.clone()).or_default().insert(id);
        }
        let closed = CancellationToken::new();
        inner.connections.insert(
            id,
            Entry {
                client_id,
                topics: Arc::new(BTreeSet::from([Topic::from(KnownTopic::All)])),
                default_topics: true,
                connected_at: Utc::now(),
                last_ping_sent_at: None,
                last_pong_received_at: None,
                sender,
                closed: closed.clone(),
            },
        );
        debug!(conn_id = %id, total = inner.connections.len(), "connection registered");
        Ok(closed)
    }

    /// Validate and apply topic changes for one connection.
    ///
    /// Each string is validated on its own: invalid ones are reported in
    /// [`SubscriptionUpdate::rejected`] and never applied, valid ones are
    /// applied even when others in the same batch are invalid. Adds are
    /// applied before removes.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if `id` is not registered; the
    /// registry is unchanged in that case.
    pub async fn update_subscriptions(
        &self,
        id: ConnectionId,
        add: &[String],
        remove: &[String],
    ) -> Result<SubscriptionUpdate, RegistryError> {
        let mut rejected = Vec::new();
        let mut validate = |raw: &[String]| -> BTreeSet<Topic> {
            raw.iter()
                .filter_map(|topic| match Topic::parse(topic) {
                    Ok(valid) => Some(valid),
                    Err(reason) => {
                        rejected.push(RejectedTopic {
                            topic: topic.clone(),
                            reason,
                        });
                        None
                    }
                })
                .collect()
        };
        let to_add = validate(add);
        let to_remove = validate(remove);

        let mut inner = self.inner.write().await;
        let entry = inner
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;

        if !to_add.is_empty() || !to_remove.is_empty() {
            let topics = Arc::make_mut(&mut entry.topics);
            if entry.default_topics && !to_add.is_empty() {
                topics.clear();
            }
            topics.extend(to_add.iter().cloned());
            for topic in &to_remove {
                topics.remove(topic);
            }
            entry.default_topics = false;
        }

        Ok(SubscriptionUpdate {
            added: to_add.into_iter().collect(),
            removed: to_remove.into_iter().collect(),
            rejected,
        })
    }

    /// Remove a connection from both maps.
    ///
    /// Idempotent: returns `false` when `id` was not registered.
    pub async fn deregister(&self, id: ConnectionId) -> bool {
        let mut inner = self.inner.write().await;
        let removed = inner.remove(id).inspect(|entry| entry.closed.cancel()).is_some();
        if removed {
            debug!(conn_id = %id, total = inner.connections.len(), "connection deregistered");
        }
        removed
    }

    /// Point-in-time copy of every registered connection.
    pub async fn snapshot(&self) -> Vec<ConnectionView> {
        let inner = self.inner.read().await;
        inner
            .connections
            .iter()
            .map(|(id, entry)| entry.view(*id))
            .collect()
    }

    /// Point-in-time copy of the connections registered under `client_id`.
    pub async fn connections_for_client(&self, client_id: &ClientId) -> Vec<ConnectionView> {
        let inner = self.inner.read().await;
        inner
            .clients
            .get(client_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.connections.get(id).map(|entry| entry.view(*id)))
            .collect()
    }

    /// Current subscription set of one connection.
    pub async fn subscriptions(&self, id: ConnectionId) -> Option<Arc<BTreeSet<Topic>>> {
        let inner = self.inner.read().await;
        inner.connections.get(&id).map(|entry| Arc::clone(&entry.topics))
    }

    /// Record that a ping was sent to each of `ids` at `at`.
    ///
    /// A connection that still has an unanswered ping keeps the original
    /// ping time, so repeated pings never postpone its eviction.
    pub async fn record_pings(&self, ids: &[ConnectionId], at: Instant) {
        let mut inner = self.inner.write().await;
        for id in ids {
            if let Some(entry) = inner.connections.get_mut(id) {
                if !entry.ping_outstanding() {
                    entry.last_ping_sent_at = Some(at);
                }
            }
        }
    }

    /// Record a pong from `id` received at `at`.
    ///
    /// Returns `false` if the connection is not registered.
    pub async fn record_pong(&self, id: ConnectionId, at: Instant) -> bool {
        let mut inner = self.inner.write().await;
        inner.connections.get_mut(&id).is_some_and(|entry| {
            entry.last_pong_received_at = Some(at);
            true
        })
    }

    /// Close and deregister every connection whose ping went unanswered for
    /// longer than `timeout`.
    ///
    /// The close frame is queued and the entry removed under the same write
    /// lock, so no broadcast snapshot taken afterwards includes it. The
    /// close token is cancelled whether or not the frame fit in the queue.
    pub async fn evict_expired(
        &self,
        now: Instant,
        timeout: Duration,
        code: u16,
        reason: &str,
    ) -> Vec<Eviction> {
        let mut inner = self.inner.write().await;
        let expired: Vec<(ConnectionId, Instant)> = inner
            .connections
            .iter()
            .filter_map(|(id, entry)| {
                match Liveness::derive(
                    entry.last_ping_sent_at,
                    entry.last_pong_received_at,
                    now,
                    timeout,
                ) {
                    Liveness::Evicted { since } => Some((*id, since)),
                    Liveness::Alive | Liveness::AwaitingPong { .. } => None,
                }
            })
            .collect();

        expired
            .into_iter()
            .filter_map(|(id, since)| {
                let entry = inner.remove(id)?;
                entry.close(code, reason);
                Some(Eviction {
                    id,
                    client_id: entry.client_id,
                    unanswered_for: now.saturating_duration_since(since),
                })
            })
            .collect()
    }

    /// Close and deregister every connection. Used on shutdown.
    ///
    /// Returns the number of connections closed.
    pub async fn close_all(&self, code: u16, reason: &str) -> usize {
        let mut inner = self.inner.write().await;
        let count = inner.connections.len();
        for entry in inner.connections.values() {
            entry.close(code, reason);
        }
        inner.connections.clear();
        inner.clients.clear();
        count
    }

    /// Whether `id` is registered.
    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.inner.read().await.connections.contains_key(&id)
    }

    /// Number of registered connections.
    pub async fn len(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Whether no connections are registered.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.connections.is_empty()
    }

    /// Number of distinct client identifiers with at least one connection.
    pub async fn client_count(&self) -> usize {
        self.inner.read().await.clients.len()
    }

    /// Connection count and distinct client count, read under one lock.
    pub async fn counts(&self) -> (usize, usize) {
        let inner = self.inner.read().await;
        (inner.connections.len(), inner.clients.len())
    }
}
