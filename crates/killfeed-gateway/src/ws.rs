//! `WebSocket` endpoint.
//!
//! Clients connect to `GET /ws`. Each connection is split into two halves:
//!
//! - a writer task that owns the socket sink and drains the connection's
//!   outbound queue, and
//! - the reader loop below, which handles client frames.
//!
//! The registry holds the only strong sender for the queue. The reader keeps
//! a weak handle for replies, so once the connection is deregistered (by the
//! peer closing, an eviction or shutdown) the writer drains and stops.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::http::header::COOKIE;
use axum::response::IntoResponse;
use futures::stream::SplitStream;
use futures::{Sink, SinkExt, StreamExt};
use killfeed_types::{ClientId, ClientMessage, ConnectionId, ServerMessage};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{Frame, FrameReceiver, try_send};
use crate::registry::ConnectionRegistry;
use crate::state::AppState;

/// Cookie and query parameter carrying the client identifier.
pub const CLIENT_ID_PARAM: &str = "clientId";

/// Greeting sent in the `connected` frame.
pub const GREETING: &str = "Connected to killfeed";

/// How long a removed connection's writer may keep flushing its queue.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Client identifier, used when no `clientId` cookie is present.
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
}

/// Upgrade an HTTP request to a `WebSocket` connection.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ConnectParams>,
) -> impl IntoResponse {
    let client_id = resolve_client_id(&headers, params.client_id.as_deref());
    let connections = state.connections.clone();
    ws.on_upgrade(move |socket| {
        connections.track_future(handle_socket(socket, state, client_id))
    })
}

/// Pick the client id: `clientId` cookie, then query parameter, then a
/// freshly generated id.
pub fn resolve_client_id(headers: &HeaderMap, query: Option<&str>) -> ClientId {
    client_id_from_cookies(headers)
        .or_else(|| query.and_then(ClientId::parse))
        .unwrap_or_else(ClientId::generate)
}

fn client_id_from_cookies(headers: &HeaderMap) -> Option<ClientId> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == CLIENT_ID_PARAM)
        .and_then(|(_, value)| ClientId::parse(value))
}

/// Drive one connection from registration to deregistration.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, client_id: ClientId) {
    let conn_id = ConnectionId::new();
    let (sink, stream) = socket.split();
    let (tx, rx) = mpsc::channel(state.outbound_capacity);

    let greeting = ServerMessage::Connected {
        message: String::from(GREETING),
        client_id: client_id.clone(),
    };
    match Frame::message(&greeting) {
        Ok(frame) => {
            let _ = try_send(&tx, frame);
        }
        Err(e) => warn!(conn_id = %conn_id, error = %e, "failed to serialize greeting"),
    }

    let closed = match state
        .registry
        .register(conn_id, Some(client_id.clone()), tx.clone())
        .await
    {
        Ok(closed) => closed,
        Err(e) => {
            warn!(conn_id = %conn_id, error = %e, "failed to register connection");
            return;
        }
    };
    let replies = tx.downgrade();
    drop(tx);

    let mut writer = tokio::spawn(write_frames(sink, rx, closed));
    info!(conn_id = %conn_id, client_id = %client_id, "client connected");

    let writer_finished = read_frames(stream, &state.registry, conn_id, &replies, &mut writer).await;

    state.registry.deregister(conn_id).await;
    if !writer_finished {
        let _ = writer.await;
    }
    info!(conn_id = %conn_id, client_id = %client_id, "client disconnected");
}

/// Handle client frames until the peer leaves or the writer stops.
///
/// Returns `true` if the loop ended because the writer task finished.
async fn read_frames(
    mut stream: SplitStream<WebSocket>,
    registry: &ConnectionRegistry,
    conn_id: ConnectionId,
    replies: &mpsc::WeakSender<Frame>,
    writer: &mut JoinHandle<()>,
) -> bool {
    loop {
        tokio::select! {
            _ = &mut *writer => return true,
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let out = respond(registry, conn_id, text.as_str()).await;
                        reply(replies, conn_id, &out);
                    }
                    Some(Ok(Message::Binary(_))) => {
                        reply(replies, conn_id, &[ServerMessage::invalid_format()]);
                    }
                    Some(Ok(Message::Pong(_))) => {
                        registry.record_pong(conn_id, Instant::now()).await;
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // Answered by the protocol layer.
                    }
                    Some(Ok(Message::Close(_))) | None => return false,
                    Some(Err(e)) => {
                        debug!(conn_id = %conn_id, error = %e, "WebSocket read error");
                        return false;
                    }
                }
            }
        }
    }
}

/// Apply one client text frame and return the replies to send.
///
/// Unparseable frames get an `error` reply; the connection stays open.
pub async fn respond(
    registry: &ConnectionRegistry,
    conn_id: ConnectionId,
    text: &str,
) -> Vec<ServerMessage> {
    let Ok(msg) = serde_json::from_str::<ClientMessage>(text) else {
        debug!(conn_id = %conn_id, bytes = text.len(), "unparseable client frame");
        return vec![ServerMessage::invalid_format()];
    };

    match msg {
        ClientMessage::Ping { .. } => vec![ServerMessage::Pong],
        ClientMessage::Pong { .. } => {
            registry.record_pong(conn_id, Instant::now()).await;
            Vec::new()
        }
        ClientMessage::Subscribe { topics } => {
            match registry.update_subscriptions(conn_id, &topics, &[]).await {
                Ok(update) => {
                    debug!(
                        conn_id = %conn_id,
                        added = update.added.len(),
                        rejected = update.rejected.len(),
                        "subscriptions added"
                    );
                    let rejected = update.rejected_names();
                    let mut out = vec![ServerMessage::Subscribed {
                        topics: update.added,
                    }];
                    if !rejected.is_empty() {
                        out.push(ServerMessage::invalid_topics(&rejected));
                    }
                    out
                }
                Err(e) => {
                    debug!(conn_id = %conn_id, error = %e, "subscribe on unregistered connection");
                    Vec::new()
                }
            }
        }
        ClientMessage::Unsubscribe { topics } => {
            match registry.update_subscriptions(conn_id, &[], &topics).await {
                Ok(update) => {
                    let rejected = update.rejected_names();
                    let mut out = vec![ServerMessage::Unsubscribed {
                        topics: update.removed,
                    }];
                    if !rejected.is_empty() {
                        out.push(ServerMessage::invalid_topics(&rejected));
                    }
                    out
                }
                Err(e) => {
                    debug!(conn_id = %conn_id, error = %e, "unsubscribe on unregistered connection");
                    Vec::new()
                }
            }
        }
    }
}

fn reply(replies: &mpsc::WeakSender<Frame>, conn_id: ConnectionId, messages: &[ServerMessage]) {
    let Some(sender) = replies.upgrade() else {
        return;
    };
    for msg in messages {
        match Frame::message(msg) {
            Ok(frame) => {
                if let Err(e) = try_send(&sender, frame) {
                    debug!(conn_id = %conn_id, error = %e, "reply dropped");
                }
            }
            Err(e) => warn!(conn_id = %conn_id, error = %e, "failed to serialize reply"),
        }
    }
}

/// Drain the outbound queue into the socket until the close token fires.
///
/// Once the connection has been removed from the registry the writer gets
/// [`CLOSE_GRACE`] to flush what is already queued (normally ending in the
/// close frame). A peer that stopped reading cannot hold it past that; the
/// sink is dropped and the reader loop sees the writer finish.
async fn write_frames<S>(mut sink: S, mut rx: FrameReceiver, closed: CancellationToken)
where
    S: Sink<Message> + Unpin,
{
    tokio::select! {
        () = drain(&mut sink, &mut rx) => return,
        () = closed.cancelled() => {}
    }
    if timeout(CLOSE_GRACE, drain(&mut sink, &mut rx)).await.is_err() {
        debug!("outbound queue not flushed within close grace, dropping socket");
    }
}

/// Write queued frames until a close frame, a write error or the end of the
/// queue.
async fn drain<S>(sink: &mut S, rx: &mut FrameReceiver)
where
    S: Sink<Message> + Unpin,
{
    while let Some(frame) = rx.recv().await {
        match frame {
            Frame::Text(text) => {
                if sink.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
            Frame::Close { code, reason } => {
                let close = CloseFrame {
                    code,
                    reason: reason.into(),
                };
                let _ = sink.send(Message::Close(Some(close))).await;
                return;
            }
        }
    }
    let _ = sink.close().await;
}
