//! Data layer for the Killfeed gateway.
//!
//! The gateway keeps all connection state in memory. The only thing it
//! writes to shared storage is a short-lived stats key in `Dragonfly` so
//! other processes (the status page) can read near-real-time connection
//! counts without talking to the gateway directly.
//!
//! # Key Patterns
//!
//! | Pattern | Type | TTL | Description |
//! |---------|------|-----|-------------|
//! | `killfeed:ws:stats` (configurable) | JSON | seconds | [`ConnectionStats`] |
//!
//! # Modules
//!
//! - [`dragonfly`] -- `Dragonfly` (Redis-compatible) connection and JSON keys
//! - [`stats`] -- The stats record and its publish/read helpers
//! - [`error`] -- Shared error types

pub mod dragonfly;
pub mod error;
pub mod stats;

// Re-export primary types for convenience.
pub use dragonfly::DragonflyPool;
pub use error::StoreError;
pub use stats::{ConnectionStats, DEFAULT_STATS_KEY};
