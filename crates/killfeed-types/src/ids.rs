//! Identifier types used by the gateway.
//!
//! Server-generated identifiers ([`ConnectionId`], [`CorrelationId`]) are
//! UUID v7 wrappers so they sort by creation time in logs. [`ClientId`] is
//! different: it is supplied by the peer (cookie or query parameter), is
//! not guaranteed unique across reconnects, and is treated as an opaque
//! string.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

define_id! {
    /// Runtime handle for one live WebSocket connection.
    ConnectionId
}

define_id! {
    /// Identifier shared by every recipient of a single broadcast, used to
    /// cross-reference log lines across the fan-out loop.
    CorrelationId
}

/// Externally supplied identifier grouping connections that belong to the
/// same logical peer (several tabs or devices).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ClientId(String);

impl ClientId {
    /// Wrap a peer-supplied identifier.
    ///
    /// Returns `None` for empty or whitespace-only input so callers can
    /// fall through to the next identifier source.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_owned()))
        }
    }

    /// Generate a fresh random identifier for a peer that supplied none.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ClientId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
