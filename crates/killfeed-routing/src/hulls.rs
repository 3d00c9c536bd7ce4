//! Hull group membership tables.
//!
//! Each [`HullClass`] pairs a topic with the inventory group ids of the hulls
//! it covers. A group may appear in several classes (an Assault Frigate is
//! both `frigates` and `t2`), and every matching class contributes its topic.

use killfeed_types::KnownTopic;

/// One hull category and the inventory groups that belong to it.
#[derive(Debug, Clone, Copy)]
pub struct HullClass {
    /// Topic added when the victim's hull is in [`HullClass::groups`].
    pub topic: KnownTopic,
    /// Inventory group ids in this category.
    pub groups: &'static [u64],
}

/// Frigate, Assault Frigate, Covert Ops, Interceptor, Stealth Bomber,
/// Electronic Attack Ship, Expedition Frigate, Logistics Frigate.
const FRIGATES: &[u64] = &[25, 324, 830, 831, 834, 893, 1283, 1527];

/// Destroyer, Interdictor, Tactical Destroyer, Command Destroyer.
const DESTROYERS: &[u64] = &[420, 541, 1305, 1534];

/// Cruiser, Heavy Assault Cruiser, Logistics, Force Recon, Heavy
/// Interdiction Cruiser, Combat Recon, Strategic Cruiser, Flag Cruiser.
const CRUISERS: &[u64] = &[26, 358, 832, 833, 894, 906, 963, 1972];

/// Combat Battlecruiser, Command Ship, Attack Battlecruiser.
const BATTLECRUISERS: &[u64] = &[419, 540, 1201];

/// Battleship, Black Ops, Marauder.
const BATTLESHIPS: &[u64] = &[27, 898, 900];

/// Dreadnought, Carrier, Capital Industrial Ship, Force Auxiliary, Lancer
/// Dreadnought.
const CAPITALS: &[u64] = &[485, 547, 883, 1538, 4594];

/// Freighter, Jump Freighter.
const FREIGHTERS: &[u64] = &[513, 902];

const SUPERCARRIERS: &[u64] = &[659];

const TITANS: &[u64] = &[30];

/// Control Tower, Citadel, Engineering Complex, Refinery, Jump Bridge,
/// Cyno Beacon, Cyno Jammer.
const CITADELS: &[u64] = &[365, 1404, 1406, 1408, 1657, 2016, 2017];

/// Rookie Ship, Frigate, Cruiser, Battleship, Industrial, Shuttle,
/// Combat Battlecruiser, Destroyer, Mining Barge, Freighter, Attack
/// Battlecruiser.
const TECH1: &[u64] = &[237, 25, 26, 27, 28, 31, 419, 420, 463, 513, 1201];

/// Assault Frigate, Heavy Assault Cruiser, Transport Ship, Command Ship,
/// Interdictor, Exhumer, Covert Ops, Interceptor, Logistics, Force Recon,
/// Stealth Bomber, Electronic Attack Ship, Heavy Interdiction Cruiser,
/// Black Ops, Marauder, Jump Freighter, Combat Recon, Expedition Frigate,
/// Logistics Frigate, Command Destroyer.
const TECH2: &[u64] = &[
    324, 358, 380, 540, 541, 543, 830, 831, 832, 833, 834, 893, 894, 898, 900, 902, 906, 1283,
    1527, 1534,
];

/// Strategic Cruiser, Tactical Destroyer.
const TECH3: &[u64] = &[963, 1305];

/// Every hull category checked by the classifier.
pub const HULL_CLASSES: &[HullClass] = &[
    HullClass { topic: KnownTopic::Frigates, groups: FRIGATES },
    HullClass { topic: KnownTopic::Destroyers, groups: DESTROYERS },
    HullClass { topic: KnownTopic::Cruisers, groups: CRUISERS },
    HullClass { topic: KnownTopic::Battlecruisers, groups: BATTLECRUISERS },
    HullClass { topic: KnownTopic::Battleships, groups: BATTLESHIPS },
    HullClass { topic: KnownTopic::Capitals, groups: CAPITALS },
    HullClass { topic: KnownTopic::Freighters, groups: FREIGHTERS },
    HullClass { topic: KnownTopic::Supercarriers, groups: SUPERCARRIERS },
    HullClass { topic: KnownTopic::Titans, groups: TITANS },
    HullClass { topic: KnownTopic::Citadels, groups: CITADELS },
    HullClass { topic: KnownTopic::T1, groups: TECH1 },
    HullClass { topic: KnownTopic::T2, groups: TECH2 },
    HullClass { topic: KnownTopic::T3, groups: TECH3 },
];

/// Topics for every hull category containing `group_id`.
pub fn hull_topics(group_id: u64) -> impl Iterator<Item = KnownTopic> {
    HULL_CLASSES
        .iter()
        .filter(move |class| class.groups.contains(&group_id))
        .map(|class| class.topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assault_frigate_is_frigate_and_t2() {
        let topics: Vec<_> = hull_topics(324).collect();
        assert_eq!(topics, vec![KnownTopic::Frigates, KnownTopic::T2]);
    }

    #[test]
    fn strategic_cruiser_is_cruiser_and_t3() {
        let topics: Vec<_> = hull_topics(963).collect();
        assert_eq!(topics, vec![KnownTopic::Cruisers, KnownTopic::T3]);
    }

    #[test]
    fn titan_matches_only_titans() {
        let topics: Vec<_> = hull_topics(30).collect();
        assert_eq!(topics, vec![KnownTopic::Titans]);
    }

    #[test]
    fn unknown_group_matches_nothing() {
        assert_eq!(hull_topics(999_999).count(), 0);
    }

    #[test]
    fn tech_levels_are_disjoint() {
        for group in TECH1 {
            assert!(!TECH2.contains(group) && !TECH3.contains(group), "group {group}");
        }
        for group in TECH2 {
            assert!(!TECH3.contains(group), "group {group}");
        }
    }
}
