//! Killmail topic classification.
//!
//! [`classify`] maps one [`Killmail`](killfeed_types::Killmail) to the set of
//! routing keys (topics) it matches. It is a pure function: no state, no
//! I/O, and it never fails. Every killmail yields at least the catch-all
//! topics `all` and `latest`; each other dimension (value tier, security,
//! region, hull, flags, participants) adds topics independently.
//!
//! # Modules
//!
//! - [`classify`] -- The classifier and its value/security/region rules
//! - [`hulls`] -- Fixed hull group membership tables

pub mod classify;
pub mod hulls;

pub use classify::classify;
