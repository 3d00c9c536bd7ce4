//! Subscription topics.
//!
//! A [`Topic`] is a plain string token. There are two kinds:
//!
//! - **Enumerable** topics drawn from the closed set in [`KnownTopic`]
//!   (`all`, `big`, `nullsec`, `titans`, ...).
//! - **Parametric** topics formed by a [`TopicPrefix`] plus a dynamic
//!   identifier (`victim.90000001`, `system.30000142`, `region.The Forge`).
//!
//! Clients subscribe with raw strings; [`Topic::parse`] is the only way a
//! client-supplied string becomes a [`Topic`].

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Maximum accepted length of a topic string, in bytes.
pub const MAX_TOPIC_LEN: usize = 128;

/// Errors produced when validating a client-supplied topic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    /// The topic string was empty.
    #[error("topic is empty")]
    Empty,

    /// The topic exceeded [`MAX_TOPIC_LEN`].
    #[error("topic is {len} bytes, limit is {MAX_TOPIC_LEN}")]
    TooLong {
        /// Actual length in bytes.
        len: usize,
    },

    /// The topic contained a control character.
    #[error("topic contains control characters")]
    ControlCharacter,

    /// A parametric prefix was given without an identifier.
    #[error("topic prefix {0:?} has no identifier")]
    MissingIdentifier(String),

    /// The topic is neither enumerable nor parametric.
    #[error("unknown topic {0:?}")]
    Unknown(String),
}

/// The closed set of enumerable topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KnownTopic {
    /// Catch-all: every event.
    All,
    /// Catch-all alias used by the live feed page.
    Latest,
    /// Value at or above 10 billion ISK.
    TenBillion,
    /// Value at or above 5 billion ISK (below 10 billion).
    FiveBillion,
    /// Value at or above 5 billion ISK.
    Big,
    /// Value at or above 1 billion ISK.
    BigKills,
    /// Abyssal deadspace.
    Abyssal,
    /// Wormhole space (hyphenated spelling).
    WSpaceHyphen,
    /// Wormhole space.
    WSpace,
    /// Security status at or above 0.45.
    Highsec,
    /// Security status above 0.0 and below 0.45.
    Lowsec,
    /// Security status at or below 0.0.
    Nullsec,
    /// The Pochven region.
    Pochven,
    /// Single attacker.
    Solo,
    /// NPC-only attackers.
    Npc,
    /// Attacker in the victim's own corporation or alliance.
    Awox,
    /// Frigate-class hulls.
    Frigates,
    /// Destroyer-class hulls.
    Destroyers,
    /// Cruiser-class hulls.
    Cruisers,
    /// Battlecruiser-class hulls.
    Battlecruisers,
    /// Battleship-class hulls.
    Battleships,
    /// Capital hulls (carriers, dreadnoughts, force auxiliaries).
    Capitals,
    /// Freighters and jump freighters.
    Freighters,
    /// Supercarriers.
    Supercarriers,
    /// Titans.
    Titans,
    /// Upwell structures and control towers.
    Citadels,
    /// Tech 1 hulls.
    T1,
    /// Tech 2 hulls.
    T2,
    /// Tech 3 hulls.
    T3,
}

impl KnownTopic {
    /// Every enumerable topic, in declaration order.
    pub const ALL: [Self; 29] = [
        Self::All,
        Self::Latest,
        Self::TenBillion,
        Self::FiveBillion,
        Self::Big,
        Self::BigKills,
        Self::Abyssal,
        Self::WSpaceHyphen,
        Self::WSpace,
        Self::Highsec,
        Self::Lowsec,
        Self::Nullsec,
        Self::Pochven,
        Self::Solo,
        Self::Npc,
        Self::Awox,
        Self::Frigates,
        Self::Destroyers,
        Self::Cruisers,
        Self::Battlecruisers,
        Self::Battleships,
        Self::Capitals,
        Self::Freighters,
        Self::Supercarriers,
        Self::Titans,
        Self::Citadels,
        Self::T1,
        Self::T2,
        Self::T3,
    ];

    /// The wire spelling of this topic.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Latest => "latest",
            Self::TenBillion => "10b",
            Self::FiveBillion => "5b",
            Self::Big => "big",
            Self::BigKills => "bigkills",
            Self::Abyssal => "abyssal",
            Self::WSpaceHyphen => "w-space",
            Self::WSpace => "wspace",
            Self::Highsec => "highsec",
            Self::Lowsec => "lowsec",
            Self::Nullsec => "nullsec",
            Self::Pochven => "pochven",
            Self::Solo => "solo",
            Self::Npc => "npc",
            Self::Awox => "awox",
            Self::Frigates => "frigates",
            Self::Destroyers => "destroyers",
            Self::Cruisers => "cruisers",
            Self::Battlecruisers => "battlecruisers",
            Self::Battleships => "battleships",
            Self::Capitals => "capitals",
            Self::Freighters => "freighters",
            Self::Supercarriers => "supercarriers",
            Self::Titans => "titans",
            Self::Citadels => "citadels",
            Self::T1 => "t1",
            Self::T2 => "t2",
            Self::T3 => "t3",
        }
    }

    /// Look up an enumerable topic by its wire spelling.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

/// Recognized prefixes for parametric topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TopicPrefix {
    /// `victim.<character|corporation|alliance id>`
    Victim,
    /// `attacker.<character|corporation|alliance id>`
    Attacker,
    /// `system.<solar system id>`
    System,
    /// `region.<region name or id>`
    Region,
}

impl TopicPrefix {
    /// Every parametric prefix.
    pub const ALL: [Self; 4] = [Self::Victim, Self::Attacker, Self::System, Self::Region];

    /// The prefix including its trailing dot.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Victim => "victim.",
            Self::Attacker => "attacker.",
            Self::System => "system.",
            Self::Region => "region.",
        }
    }
}

/// A validated subscription topic or routing key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Topic(String);

impl Topic {
    /// Validate a client-supplied topic string.
    ///
    /// # Errors
    ///
    /// Returns a [`TopicError`] describing why the string is not a topic.
    pub fn parse(raw: &str) -> Result<Self, TopicError> {
        if raw.is_empty() {
            return Err(TopicError::Empty);
        }
        if raw.len() > MAX_TOPIC_LEN {
            return Err(TopicError::TooLong { len: raw.len() });
        }
        if raw.chars().any(char::is_control) {
            return Err(TopicError::ControlCharacter);
        }
        if KnownTopic::from_name(raw).is_some() {
            return Ok(Self(raw.to_owned()));
        }
        for prefix in TopicPrefix::ALL {
            if let Some(suffix) = raw.strip_prefix(prefix.as_str()) {
                if suffix.trim().is_empty() {
                    return Err(TopicError::MissingIdentifier(prefix.as_str().to_owned()));
                }
                return Ok(Self(raw.to_owned()));
            }
        }
        Err(TopicError::Unknown(raw.to_owned()))
    }

    /// Build a parametric topic from a prefix and identifier.
    ///
    /// Returns `None` when the identifier renders empty or the result would
    /// not pass [`Topic::parse`].
    pub fn with_prefix(prefix: TopicPrefix, ident: impl core::fmt::Display) -> Option<Self> {
        let raw = format!("{}{ident}", prefix.as_str());
        Self::parse(&raw).ok()
    }

    /// Borrow the topic as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<KnownTopic> for Topic {
    fn from(topic: KnownTopic) -> Self {
        Self(topic.as_str().to_owned())
    }
}

impl core::fmt::Display for Topic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
