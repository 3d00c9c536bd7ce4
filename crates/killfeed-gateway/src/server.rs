//! HTTP server lifecycle.
//!
//! Binding is split from serving so a port conflict is reported before any
//! background task starts.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::router::build_router;
use crate::state::AppState;

/// Errors that can occur when starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server encountered a fatal error while serving.
    #[error("serve error: {0}")]
    Serve(String),
}

/// Bind a TCP listener on `host:port`.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address is invalid or already in use.
pub async fn bind_listener(host: &str, port: u16) -> Result<TcpListener, ServerError> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| ServerError::Bind(format!("invalid address: {e}")))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))?;
    info!(%addr, "gateway listening");
    Ok(listener)
}

/// Serve requests on `listener` until `shutdown` is cancelled.
///
/// In-flight requests are allowed to complete after cancellation. Upgraded
/// sockets are not covered by this; see [`close_connections`].
///
/// # Errors
///
/// Returns [`ServerError::Serve`] if the server hits a fatal I/O error.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let router = build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| ServerError::Serve(format!("serve error: {e}")))?;
    info!("gateway server stopped");
    Ok(())
}

/// Close every connection with `code` and wait up to `grace` for the socket
/// tasks to write their close frames and finish.
///
/// Returns the number of connections that were registered.
pub async fn close_connections(
    state: &AppState,
    code: u16,
    reason: &str,
    grace: Duration,
) -> usize {
    let closed = state.registry.close_all(code, reason).await;
    state.connections.close();
    if tokio::time::timeout(grace, state.connections.wait())
        .await
        .is_err()
    {
        warn!(
            remaining = state.connections.len(),
            "connections still open after close grace"
        );
    }
    closed
}
