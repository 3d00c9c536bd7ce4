//! `WebSocket` delivery gateway for live killmails.
//!
//! This crate provides an Axum server that:
//!
//! - accepts browser `WebSocket` connections on `/ws` and tracks their topic
//!   subscriptions in a [`ConnectionRegistry`],
//! - consumes killmails and direct messages from NATS ([`bus`]) and fans
//!   them out by routing topic ([`broadcast`]),
//! - pings every connection and evicts the ones that stop answering
//!   ([`liveness`]), and
//! - publishes connection counts to `Dragonfly` ([`stats`]).
//!
//! # Architecture
//!
//! ```text
//! NATS --> bus --> Broadcaster --> per-connection queue --> writer task --> socket
//!                       ^
//!                       | snapshot
//!              ConnectionRegistry <-- ws reader (subscribe / pong)
//!                       ^
//!           liveness (ping / sweep), stats (counts)
//! ```
//!
//! [`ConnectionRegistry`]: registry::ConnectionRegistry

pub mod broadcast;
pub mod bus;
pub mod config;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod liveness;
pub mod registry;
pub mod router;
pub mod server;
pub mod state;
pub mod stats;
pub mod ws;

// Re-export primary types for convenience.
pub use broadcast::{BroadcastOutcome, Broadcaster, DeliveryReport, DirectTarget};
pub use config::{ConfigError, GatewayConfig};
pub use error::{GatewayError, RegistryError, SendError};
pub use liveness::{LivenessMonitor, LivenessSettings};
pub use registry::ConnectionRegistry;
pub use router::build_router;
pub use server::{ServerError, bind_listener, close_connections, serve};
pub use state::AppState;
