//! Shared type definitions for the Killfeed gateway.
//!
//! This crate is the single source of truth for the vocabulary shared by the
//! routing, storage and gateway crates. Wire protocol types flow downstream
//! to `TypeScript` via `ts-rs` for the website's live feed.
//!
//! # Modules
//!
//! - [`ids`] -- Connection, correlation and client identifiers
//! - [`topic`] -- Subscription topics and their validation rules
//! - [`killmail`] -- The killmail record with explicit classification fields
//! - [`protocol`] -- Client and server WebSocket frames

pub mod ids;
pub mod killmail;
pub mod protocol;
pub mod topic;

// Re-export all public types at crate root for convenience.
pub use ids::{ClientId, ConnectionId, CorrelationId};
pub use killmail::{Killmail, Participant};
pub use protocol::{BroadcastMeta, ClientMessage, ServerMessage};
pub use topic::{KnownTopic, MAX_TOPIC_LEN, Topic, TopicError, TopicPrefix};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation for frontend-facing types.

    #[test]
    fn export_bindings() {
        // Files are written to the `bindings/` directory relative to the
        // crate root.
        use ts_rs::TS;

        let _ = crate::ids::ConnectionId::export_all();
        let _ = crate::ids::CorrelationId::export_all();
        let _ = crate::ids::ClientId::export_all();
        let _ = crate::topic::Topic::export_all();
        let _ = crate::protocol::BroadcastMeta::export_all();
        let _ = crate::protocol::ClientMessage::export_all();
        let _ = crate::protocol::ServerMessage::export_all();
    }
}
