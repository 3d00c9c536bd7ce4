//! End-to-end `WebSocket` tests against a real listener.
//!
//! Each test starts the router on `127.0.0.1:0`, connects with
//! `tokio-tungstenite`, and drives deliveries through the same registry the
//! server uses, so no NATS server is needed.

#![allow(clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use killfeed_gateway::{
    AppState, Broadcaster, ConnectionRegistry, DirectTarget, LivenessMonitor, LivenessSettings,
    bind_listener, close_connections, serve,
};
use killfeed_types::{ClientId, Killmail};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    state: Arc<AppState>,
    shutdown: CancellationToken,
}

impl TestServer {
    async fn start(liveness: Option<LivenessSettings>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = CancellationToken::new();
        let listener = bind_listener("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(AppState::new(Arc::clone(&registry), 64));
        tokio::spawn(serve(listener, Arc::clone(&state), shutdown.clone()));
        if let Some(settings) = liveness {
            let monitor = LivenessMonitor::new(Arc::clone(&registry), settings);
            tokio::spawn(monitor.run(shutdown.clone()));
        }
        Self {
            addr,
            registry,
            state,
            shutdown,
        }
    }

    fn broadcaster(&self) -> Broadcaster {
        Broadcaster::new(Arc::clone(&self.registry))
    }

    async fn connect(&self, query: &str) -> Client {
        let url = format!("ws://{}/ws{query}", self.addr);
        let (ws, _) = connect_async(url).await.unwrap();
        ws
    }

    async fn connect_with_cookie(&self, cookie: &str) -> Client {
        let mut request = format!("ws://{}/ws", self.addr)
            .into_client_request()
            .unwrap();
        request
            .headers_mut()
            .insert("Cookie", cookie.parse().unwrap());
        let (ws, _) = connect_async(request).await.unwrap();
        ws
    }

    async fn wait_for_len(&self, expected: usize) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while self.registry.len().await != expected {
            assert!(
                tokio::time::Instant::now() < deadline,
                "registry never reached {expected} connections"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Next text frame as JSON, skipping control frames.
async fn recv_json(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Skip frames until a close frame arrives.
async fn recv_close(ws: &mut Client) -> Option<CloseFrame> {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next()).await.unwrap();
        match msg {
            Some(Ok(Message::Close(frame))) => return frame,
            Some(Ok(_)) => {}
            other => panic!("connection ended without close frame: {other:?}"),
        }
    }
}

async fn send_json(ws: &mut Client, value: &Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

fn victim_kill(character_id: u64) -> Killmail {
    Killmail::from_value(json!({ "killmailId": character_id, "victim": { "characterId": character_id } }))
}

#[tokio::test]
async fn greeting_carries_query_client_id() {
    let server = TestServer::start(None).await;
    let mut ws = server.connect("?clientId=abc").await;
    let hello = recv_json(&mut ws).await;
    assert_eq!(hello["type"], "connected");
    assert_eq!(hello["clientId"], "abc");
    assert!(hello["message"].is_string());
}

#[tokio::test]
async fn cookie_client_id_wins_over_generated() {
    let server = TestServer::start(None).await;
    let mut ws = server.connect_with_cookie("clientId=from-cookie").await;
    assert_eq!(recv_json(&mut ws).await["clientId"], "from-cookie");

    let mut anonymous = server.connect("").await;
    let generated = recv_json(&mut anonymous).await;
    assert!(generated["clientId"].as_str().is_some_and(|id| !id.is_empty()));
}

#[tokio::test]
async fn ping_pong_and_invalid_frames() {
    let server = TestServer::start(None).await;
    let mut ws = server.connect("").await;
    recv_json(&mut ws).await;

    send_json(&mut ws, &json!({ "type": "ping" })).await;
    assert_eq!(recv_json(&mut ws).await, json!({ "type": "pong" }));

    ws.send(Message::Text(String::from("not json").into())).await.unwrap();
    assert_eq!(
        recv_json(&mut ws).await,
        json!({ "type": "error", "message": "Invalid message format" })
    );

    // Still open after a protocol error.
    send_json(&mut ws, &json!({ "type": "ping" })).await;
    assert_eq!(recv_json(&mut ws).await["type"], "pong");
}

#[tokio::test]
async fn victim_subscription_delivers_only_matching_kills() {
    let server = TestServer::start(None).await;
    let mut ws = server.connect("").await;
    recv_json(&mut ws).await;

    send_json(&mut ws, &json!({ "type": "subscribe", "topics": ["victim.500001", "bogus"] })).await;
    assert_eq!(
        recv_json(&mut ws).await,
        json!({ "type": "subscribed", "topics": ["victim.500001"] })
    );
    assert_eq!(
        recv_json(&mut ws).await,
        json!({ "type": "error", "message": "Invalid topics: bogus" })
    );

    let broadcaster = server.broadcaster();
    let hit = broadcaster.broadcast(&victim_kill(500_001)).await.unwrap();
    assert_eq!(hit.report.delivered, 1);
    let frame = recv_json(&mut ws).await;
    assert_eq!(frame["type"], "killmail");
    assert_eq!(frame["data"]["victim"]["characterId"], 500_001);
    assert_eq!(frame["_meta"]["correlationId"], json!(hit.correlation_id));

    let miss = broadcaster.broadcast(&victim_kill(500_002)).await.unwrap();
    assert_eq!(miss.report.matched, 0);
    // The next frame is the pong, not a second killmail.
    send_json(&mut ws, &json!({ "type": "ping" })).await;
    assert_eq!(recv_json(&mut ws).await["type"], "pong");
}

#[tokio::test]
async fn direct_reaches_every_session_of_a_client() {
    let server = TestServer::start(None).await;
    let mut first = server.connect("?clientId=abc").await;
    let mut second = server.connect("?clientId=abc").await;
    recv_json(&mut first).await;
    recv_json(&mut second).await;

    let target = DirectTarget::Clients(ClientId::parse("abc").into_iter().collect());
    let broadcaster = server.broadcaster();
    let report = broadcaster.send_direct(&target, &json!({ "n": 1 })).await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(recv_json(&mut first).await, json!({ "type": "direct", "data": { "n": 1 } }));
    assert_eq!(recv_json(&mut second).await["data"]["n"], 1);

    first.close(None).await.unwrap();
    server.wait_for_len(1).await;

    let report = broadcaster.send_direct(&target, &json!({ "n": 2 })).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(recv_json(&mut second).await["data"]["n"], 2);
}

#[tokio::test]
async fn silent_client_is_evicted_and_responsive_client_kept() {
    let settings = LivenessSettings {
        ping_interval: Duration::from_millis(100),
        sweep_interval: Duration::from_millis(25),
        pong_timeout: Duration::from_millis(150),
    };
    let server = TestServer::start(Some(settings)).await;
    let mut silent = server.connect("?clientId=silent").await;
    let mut responsive = server.connect("?clientId=awake").await;
    recv_json(&mut silent).await;
    recv_json(&mut responsive).await;

    let answering = tokio::spawn(async move {
        // Answer pings for a while, then hand the socket back.
        let deadline = tokio::time::Instant::now() + Duration::from_millis(600);
        while tokio::time::Instant::now() < deadline {
            let Ok(Some(Ok(Message::Text(text)))) =
                tokio::time::timeout(Duration::from_millis(50), responsive.next()).await
            else {
                continue;
            };
            let frame: Value = serde_json::from_str(text.as_str()).unwrap();
            if frame["type"] == "ping" {
                let pong = json!({ "type": "pong", "timestamp": frame["timestamp"] });
                responsive.send(Message::Text(pong.to_string().into())).await.unwrap();
            }
        }
        responsive
    });

    let close = recv_close(&mut silent).await.unwrap();
    assert_eq!(u16::from(close.code), 1000);
    assert_eq!(close.reason.as_str(), "Ping timeout");

    let _responsive = answering.await.unwrap();
    assert_eq!(server.registry.len().await, 1);
}

#[tokio::test]
async fn shutdown_closes_every_connection_with_going_away() {
    let server = TestServer::start(None).await;
    let mut ws = server.connect("").await;
    recv_json(&mut ws).await;
    server.wait_for_len(1).await;
    assert_eq!(server.state.connections.len(), 1);

    let closed = close_connections(
        &server.state,
        1001,
        "server shutting down",
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(closed, 1);
    // Every socket task has finished, so the close frame is already written.
    assert!(server.state.connections.is_empty());
    assert_eq!(server.registry.len().await, 0);

    let close = recv_close(&mut ws).await.unwrap();
    assert_eq!(u16::from(close.code), 1001);
    assert_eq!(close.reason.as_str(), "server shutting down");
}

#[tokio::test]
async fn shutdown_completes_when_client_never_reads() {
    let server = TestServer::start(None).await;
    // Connected, greeting left unread.
    let _idle = server.connect("?clientId=idle").await;
    server.wait_for_len(1).await;

    let closed = close_connections(
        &server.state,
        1001,
        "server shutting down",
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(closed, 1);
    assert!(server.state.connections.is_empty());
}
