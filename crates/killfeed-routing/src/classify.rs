//! Routing key generation.
//!
//! Rules are independent and additive; a killmail missing the field a rule
//! needs simply contributes nothing for that dimension.
//!
//! | Dimension | Rule |
//! |-----------|------|
//! | catch-all | always `all`, `latest` |
//! | value | >= 10B: `10b` `big` `bigkills`; >= 5B: `5b` `big` `bigkills`; >= 1B: `bigkills` |
//! | security | >= 0.45 `highsec`; > 0.0 `lowsec`; otherwise `nullsec` |
//! | region | wormhole range `w-space` `wspace`; abyssal range `abyssal`; 10000070 `pochven` |
//! | hull | see [`crate::hulls`] |
//! | flags | `solo`, `npc`, `awox` |
//! | parametric | `system.<id>`, `region.<name>`, `region.<id>`, `victim.<id>` per victim id, `attacker.<id>` for the first attacker only |

use std::collections::BTreeSet;
use std::ops::RangeInclusive;

use killfeed_types::{Killmail, KnownTopic, Topic, TopicPrefix};

use crate::hulls::hull_topics;

/// 10 billion ISK.
pub const TEN_BILLION: f64 = 10_000_000_000.0;

/// 5 billion ISK.
pub const FIVE_BILLION: f64 = 5_000_000_000.0;

/// 1 billion ISK.
pub const ONE_BILLION: f64 = 1_000_000_000.0;

/// Lowest security status that counts as high-security space.
pub const HIGHSEC_THRESHOLD: f64 = 0.45;

/// Region ids of wormhole (Anoikis) space.
pub const WORMHOLE_REGIONS: RangeInclusive<u64> = 11_000_001..=11_000_033;

/// Region ids of abyssal deadspace.
pub const ABYSSAL_REGIONS: RangeInclusive<u64> = 12_000_000..=12_000_005;

/// Region id of Pochven.
pub const POCHVEN_REGION: u64 = 10_000_070;

/// Compute the set of topics `killmail` is routed to.
pub fn classify(killmail: &Killmail) -> BTreeSet<Topic> {
    let mut keys = BTreeSet::new();
    add(&mut keys, &[KnownTopic::All, KnownTopic::Latest]);

    if let Some(value) = killmail.total_value {
        add(&mut keys, value_tier(value));
    }
    if let Some(security) = killmail.security_status {
        add(&mut keys, &[security_class(security)]);
    }
    if let Some(region_id) = killmail.region_id {
        add(&mut keys, region_class(region_id));
    }
    if let Some(group_id) = killmail.ship_group_id {
        keys.extend(hull_topics(group_id).map(Topic::from));
    }

    if killmail.is_solo {
        add(&mut keys, &[KnownTopic::Solo]);
    }
    if killmail.is_npc {
        add(&mut keys, &[KnownTopic::Npc]);
    }
    if killmail.is_awox {
        add(&mut keys, &[KnownTopic::Awox]);
    }

    if let Some(system_id) = killmail.system_id {
        keys.extend(Topic::with_prefix(TopicPrefix::System, system_id));
    }
    if let Some(name) = &killmail.region_name {
        keys.extend(Topic::with_prefix(TopicPrefix::Region, name));
    }
    if let Some(region_id) = killmail.region_id {
        keys.extend(Topic::with_prefix(TopicPrefix::Region, region_id));
    }
    keys.extend(
        killmail
            .victim
            .ids()
            .filter_map(|id| Topic::with_prefix(TopicPrefix::Victim, id)),
    );
    if let Some(attacker) = &killmail.first_attacker {
        keys.extend(
            attacker
                .ids()
                .filter_map(|id| Topic::with_prefix(TopicPrefix::Attacker, id)),
        );
    }

    keys
}

fn add(keys: &mut BTreeSet<Topic>, topics: &[KnownTopic]) {
    keys.extend(topics.iter().copied().map(Topic::from));
}

/// Tags of the highest value bracket `value` reaches.
fn value_tier(value: f64) -> &'static [KnownTopic] {
    if value >= TEN_BILLION {
        &[KnownTopic::TenBillion, KnownTopic::Big, KnownTopic::BigKills]
    } else if value >= FIVE_BILLION {
        &[KnownTopic::FiveBillion, KnownTopic::Big, KnownTopic::BigKills]
    } else if value >= ONE_BILLION {
        &[KnownTopic::BigKills]
    } else {
        &[]
    }
}

fn security_class(security: f64) -> KnownTopic {
    if security >= HIGHSEC_THRESHOLD {
        KnownTopic::Highsec
    } else if security > 0.0 {
        KnownTopic::Lowsec
    } else {
        KnownTopic::Nullsec
    }
}

fn region_class(region_id: u64) -> &'static [KnownTopic] {
    if WORMHOLE_REGIONS.contains(&region_id) {
        &[KnownTopic::WSpaceHyphen, KnownTopic::WSpace]
    } else if ABYSSAL_REGIONS.contains(&region_id) {
        &[KnownTopic::Abyssal]
    } else if region_id == POCHVEN_REGION {
        &[KnownTopic::Pochven]
    } else {
        &[]
    }
}
