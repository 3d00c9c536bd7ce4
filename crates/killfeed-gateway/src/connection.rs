//! Per-connection primitives shared by the registry, broadcast and liveness
//! code.
//!
//! A connection is represented on the server side by the sending half of a
//! bounded [`mpsc`] queue. A dedicated writer task owns the socket sink and
//! drains the queue, so nothing that holds the registry lock ever waits on
//! a socket. Enqueueing uses `try_send`: a full queue means the peer is not
//! keeping up and the frame is dropped for that peer only.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use chrono::{DateTime, Utc};
use killfeed_types::{ClientId, ConnectionId, ServerMessage, Topic};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;

use crate::error::SendError;

/// Sending half of a connection's outbound queue.
pub type FrameSender = mpsc::Sender<Frame>;

/// Receiving half of a connection's outbound queue, owned by the writer task.
pub type FrameReceiver = mpsc::Receiver<Frame>;

/// A unit of work for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Frame {
    /// A serialized JSON text frame. Cloning is cheap, so one serialized
    /// broadcast is shared by every recipient.
    Text(Utf8Bytes),
    /// Send a close frame and stop writing.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Diagnostic reason shown to the peer.
        reason: String,
    },
}

impl Frame {
    /// Serialize a server message into a text frame.
    ///
    /// # Errors
    ///
    /// Returns the serialization error if the message cannot be encoded.
    pub fn message(msg: &ServerMessage) -> Result<Self, serde_json::Error> {
        Ok(Self::Text(serde_json::to_string(msg)?.into()))
    }

    /// Text content of a [`Frame::Text`], `None` for close frames.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            Self::Close { .. } => None,
        }
    }
}

/// Liveness of one connection, derived from its ping and pong timestamps.
///
/// - `Alive`: no ping outstanding, or the last ping has been answered.
/// - `AwaitingPong`: a ping is outstanding and still within the timeout.
/// - `Evicted`: a ping has been outstanding for longer than the timeout;
///   the next sweep closes and deregisters the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Healthy.
    Alive,
    /// Ping sent, answer pending.
    AwaitingPong {
        /// When the outstanding ping was sent.
        since: Instant,
    },
    /// Ping unanswered past the timeout.
    Evicted {
        /// When the unanswered ping was sent.
        since: Instant,
    },
}

impl Liveness {
    /// Apply the timestamp rule: a ping is answered when the last pong is at
    /// or after it, and expires once `timeout` has fully elapsed.
    pub fn derive(
        last_ping: Option<Instant>,
        last_pong: Option<Instant>,
        now: Instant,
        timeout: Duration,
    ) -> Self {
        let Some(since) = last_ping else {
            return Self::Alive;
        };
        if last_pong.is_some_and(|pong| pong >= since) {
            return Self::Alive;
        }
        if now.saturating_duration_since(since) > timeout {
            Self::Evicted { since }
        } else {
            Self::AwaitingPong { since }
        }
    }
}

/// Point-in-time copy of one registry entry.
///
/// Snapshots are handed to the broadcast and liveness loops so they never
/// iterate the live map. The topic set is shared behind an [`Arc`] and
/// only copied when the connection changes its subscriptions.
#[derive(Debug, Clone)]
pub struct ConnectionView {
    /// Runtime handle.
    pub id: ConnectionId,
    /// Peer-supplied client identifier, if any.
    pub client_id: Option<ClientId>,
    /// Subscribed topics.
    pub topics: Arc<BTreeSet<Topic>>,
    /// When the connection was registered.
    pub connected_at: DateTime<Utc>,
    /// When the outstanding (or last answered) ping was sent.
    pub last_ping_sent_at: Option<Instant>,
    /// When the last pong arrived.
    pub last_pong_received_at: Option<Instant>,
    pub(crate) sender: FrameSender,
}

impl ConnectionView {
    /// Whether the connection's writer is still running.
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Whether any of `keys` is in this connection's topic set.
    pub fn matches(&self, keys: &BTreeSet<Topic>) -> bool {
        keys.iter().any(|key| self.topics.contains(key))
    }

    /// Liveness as of `now`.
    pub fn liveness(&self, now: Instant, timeout: Duration) -> Liveness {
        Liveness::derive(
            self.last_ping_sent_at,
            self.last_pong_received_at,
            now,
            timeout,
        )
    }

    /// Enqueue a frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::QueueFull`] for a slow peer and
    /// [`SendError::Closed`] when the writer has stopped.
    pub fn send(&self, frame: Frame) -> Result<(), SendError> {
        try_send(&self.sender, frame)
    }
}

/// Enqueue `frame` on `sender`, mapping the channel error.
pub(crate) fn try_send(sender: &FrameSender, frame: Frame) -> Result<(), SendError> {
    sender.try_send(frame).map_err(|e| match e {
        TrySendError::Full(_) => SendError::QueueFull,
        TrySendError::Closed(_) => SendError::Closed,
    })
}
