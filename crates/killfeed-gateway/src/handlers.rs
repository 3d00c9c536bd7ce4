//! HTTP handlers for the gateway's REST surface.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Liveness probe with connection count and uptime |
//! | any | anything else | 404 JSON error |

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::Uri;
use serde::Serialize;

use crate::error::GatewayError;
use crate::state::AppState;

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process is serving.
    pub status: &'static str,
    /// Open `WebSocket` connections.
    pub clients: usize,
    /// Seconds since startup.
    pub uptime: u64,
}

/// Report process health.
///
/// # Route
///
/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        clients: state.registry.len().await,
        uptime: state.uptime().as_secs(),
    })
}

/// Fallback for unknown routes.
pub async fn not_found(uri: Uri) -> GatewayError {
    GatewayError::NotFound(format!("no route for {}", uri.path()))
}
