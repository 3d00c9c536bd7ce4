//! WebSocket wire protocol.
//!
//! Every frame is a JSON text frame with a `type` discriminator.
//!
//! | Direction | `type` | Body |
//! |-----------|--------|------|
//! | client -> server | `ping` | none |
//! | client -> server | `pong` | optional `timestamp` |
//! | client -> server | `subscribe` | `topics: string[]` |
//! | client -> server | `unsubscribe` | `topics: string[]` |
//! | server -> client | `connected` | `message`, `clientId` |
//! | server -> client | `killmail` | `data`, `_meta.correlationId` |
//! | server -> client | `direct` | `data` |
//! | server -> client | `ping` | `timestamp` (ms since epoch) |
//! | server -> client | `pong` | none |
//! | server -> client | `subscribed` / `unsubscribed` | `topics` |
//! | server -> client | `error` | `message` |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::ids::{ClientId, CorrelationId};
use crate::topic::Topic;

/// A frame sent by a client.
///
/// Subscription topics are kept as raw strings here; validation happens in
/// the registry so invalid entries can be reported individually.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum ClientMessage {
    /// Application-level ping; answered with [`ServerMessage::Pong`].
    Ping {
        /// Optional client timestamp, ignored by the server.
        #[serde(default)]
        timestamp: Option<i64>,
    },
    /// Answer to a server [`ServerMessage::Ping`].
    Pong {
        /// Optional echo of the ping timestamp.
        #[serde(default)]
        timestamp: Option<i64>,
    },
    /// Add topics to the subscription set.
    Subscribe {
        /// Topics to add.
        #[serde(default)]
        topics: Vec<String>,
    },
    /// Remove topics from the subscription set.
    Unsubscribe {
        /// Topics to remove.
        #[serde(default)]
        topics: Vec<String>,
    },
}

/// Metadata attached to every broadcast killmail frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct BroadcastMeta {
    /// Shared by every recipient of the same broadcast.
    pub correlation_id: CorrelationId,
}

/// A frame sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum ServerMessage {
    /// Sent once, immediately after the upgrade completes.
    Connected {
        /// Human-readable greeting.
        message: String,
        /// The identifier this connection was registered under.
        #[serde(rename = "clientId")]
        client_id: ClientId,
    },
    /// A killmail matching at least one subscribed topic.
    Killmail {
        /// The killmail payload exactly as received from the bus.
        data: Value,
        /// Broadcast metadata.
        #[serde(rename = "_meta")]
        meta: BroadcastMeta,
    },
    /// A targeted or operational push that bypasses topic filtering.
    Direct {
        /// Opaque payload from the direct channel.
        data: Value,
    },
    /// Keep-alive probe; the client must answer with `pong`.
    Ping {
        /// Server time in milliseconds since the Unix epoch.
        timestamp: i64,
    },
    /// Answer to a client `ping`.
    Pong,
    /// Topics applied by a `subscribe` request.
    Subscribed {
        /// Topics that were valid and applied.
        topics: Vec<Topic>,
    },
    /// Topics removed by an `unsubscribe` request.
    Unsubscribed {
        /// Topics that were valid and removed.
        topics: Vec<Topic>,
    },
    /// A protocol error. The connection stays open.
    Error {
        /// Description of the problem.
        message: String,
    },
}

impl ServerMessage {
    /// Error reply for a frame that could not be parsed.
    pub fn invalid_format() -> Self {
        Self::Error {
            message: String::from("Invalid message format"),
        }
    }

    /// Error reply listing rejected topics.
    pub fn invalid_topics(rejected: &[String]) -> Self {
        Self::Error {
            message: format!("Invalid topics: {}", rejected.join(", ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_client_frames() {
        let ping: Result<ClientMessage, _> = serde_json::from_str(r#"{"type":"ping"}"#);
        assert!(matches!(ping, Ok(ClientMessage::Ping { timestamp: None })));

        let sub: Result<ClientMessage, _> =
            serde_json::from_str(r#"{"type":"subscribe","topics":["big","victim.1"]}"#);
        assert!(matches!(
            sub,
            Ok(ClientMessage::Subscribe { ref topics }) if topics.len() == 2
        ));

        let pong: Result<ClientMessage, _> =
            serde_json::from_str(r#"{"type":"pong","timestamp":1700000000000}"#);
        assert!(matches!(
            pong,
            Ok(ClientMessage::Pong { timestamp: Some(1_700_000_000_000) })
        ));
    }

    #[test]
    fn reject_unknown_client_frames() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"shout"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"topics":[]}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn killmail_frame_shape() {
        let correlation_id = CorrelationId::new();
        let msg = ServerMessage::Killmail {
            data: json!({ "killmail_id": 1 }),
            meta: BroadcastMeta { correlation_id },
        };
        let value = serde_json::to_value(&msg).unwrap_or_default();
        assert_eq!(value["type"], "killmail");
        assert_eq!(value["data"]["killmail_id"], 1);
        assert_eq!(
            value["_meta"]["correlationId"],
            json!(correlation_id.to_string())
        );
    }

    #[test]
    fn connected_and_pong_frame_shape() {
        let connected = ServerMessage::Connected {
            message: String::from("hi"),
            client_id: ClientId::generate(),
        };
        let value = serde_json::to_value(&connected).unwrap_or_default();
        assert_eq!(value["type"], "connected");
        assert!(value["clientId"].is_string());

        let pong = serde_json::to_string(&ServerMessage::Pong).unwrap_or_default();
        assert_eq!(pong, r#"{"type":"pong"}"#);
    }

    #[test]
    fn invalid_topics_message_lists_rejections() {
        let msg = ServerMessage::invalid_topics(&["nope".to_owned(), "victim.".to_owned()]);
        assert_eq!(
            msg,
            ServerMessage::Error {
                message: String::from("Invalid topics: nope, victim.")
            }
        );
    }
}
