//! Error types for the gateway.
//!
//! [`GatewayError`] covers the HTTP surface and converts into an Axum
//! response. [`RegistryError`] and [`SendError`] are per-connection
//! failures; they are logged and contained, never propagated far enough to
//! stop a broadcast or liveness loop.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use killfeed_types::ConnectionId;

/// Errors that can occur in the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::Serialization(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("JSON error: {e}"))
            }
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Errors returned by [`ConnectionRegistry`](crate::registry::ConnectionRegistry)
/// mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The connection id is already registered.
    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),

    /// The connection id is not (or no longer) registered.
    #[error("connection {0} is not registered")]
    NotFound(ConnectionId),
}

/// Failure to enqueue a frame for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The connection's outbound queue is full (slow reader).
    #[error("outbound queue full")]
    QueueFull,

    /// The connection's writer has stopped.
    #[error("connection closed")]
    Closed,
}
