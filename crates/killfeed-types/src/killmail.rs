//! The killmail record consumed by the routing and broadcast layers.
//!
//! Killmails arrive from the bus as arbitrary JSON. [`Killmail::from_value`]
//! pulls out the handful of fields needed for topic classification and
//! keeps the original document untouched in [`Killmail::raw`] so it can be
//! forwarded to clients verbatim.
//!
//! Extraction is lenient. A field that is missing, null, zero, or of the
//! wrong type is treated as absent; it never makes the whole record
//! invalid. Both the snake_case ingestion shape and the camelCase API shape
//! are understood.

use serde_json::Value;

/// Character, corporation and alliance identifiers of one participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Participant {
    /// Character id, if the participant is a player character.
    pub character_id: Option<u64>,
    /// Corporation id.
    pub corporation_id: Option<u64>,
    /// Alliance id, if the corporation is in an alliance.
    pub alliance_id: Option<u64>,
}

impl Participant {
    /// Extract a participant from a victim or attacker object.
    fn from_value(value: &Value) -> Self {
        Self {
            character_id: lookup(value, &["character_id", "characterId", "character.id"])
                .and_then(as_id),
            corporation_id: lookup(value, &["corporation_id", "corporationId", "corporation.id"])
                .and_then(as_id),
            alliance_id: lookup(value, &["alliance_id", "allianceId", "alliance.id"])
                .and_then(as_id),
        }
    }

    /// All identifiers that are present, in character/corporation/alliance order.
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        [self.character_id, self.corporation_id, self.alliance_id]
            .into_iter()
            .flatten()
    }
}

/// An immutable killmail event with its classification fields made explicit.
#[derive(Debug, Clone, PartialEq)]
pub struct Killmail {
    /// Killmail id, used for log correlation only.
    pub killmail_id: Option<u64>,
    /// Estimated ISK value of the loss.
    pub total_value: Option<f64>,
    /// Security status of the solar system.
    pub security_status: Option<f64>,
    /// Solar system id.
    pub system_id: Option<u64>,
    /// Region id.
    pub region_id: Option<u64>,
    /// Region display name.
    pub region_name: Option<String>,
    /// The victim.
    pub victim: Participant,
    /// Inventory group id of the victim's hull.
    pub ship_group_id: Option<u64>,
    /// The first attacker in the attacker list, if any.
    pub first_attacker: Option<Participant>,
    /// Single attacker.
    pub is_solo: bool,
    /// NPC-only attackers.
    pub is_npc: bool,
    /// Friendly-fire kill.
    pub is_awox: bool,
    /// The original payload, forwarded to clients unchanged.
    pub raw: Value,
}

impl Killmail {
    /// Build a killmail from an arbitrary JSON document.
    ///
    /// Never fails. Non-object input yields a record with every field
    /// absent, which still classifies into the catch-all topics.
    pub fn from_value(raw: Value) -> Self {
        let victim_value = lookup(&raw, &["victim"]);
        let victim = victim_value.map(Participant::from_value).unwrap_or_default();
        let ship_group_id = victim_value
            .and_then(|v| lookup(v, &["ship_group_id", "shipGroupId", "ship.groupId"]))
            .or_else(|| lookup(&raw, &["ship_group_id", "shipGroupId"]))
            .and_then(as_id);
        let first_attacker = lookup(&raw, &["attackers"])
            .and_then(Value::as_array)
            .and_then(|list| list.first())
            .map(Participant::from_value);

        Self {
            killmail_id: lookup(&raw, &["killmail_id", "killmailId", "id"]).and_then(as_id),
            total_value: lookup(&raw, &["total_value", "totalValue", "zkb.totalValue"])
                .and_then(as_f64),
            security_status: lookup(
                &raw,
                &[
                    "system_security",
                    "systemSecurity",
                    "security_status",
                    "solarSystem.securityStatus",
                    "solar_system.security_status",
                ],
            )
            .and_then(as_f64),
            system_id: lookup(
                &raw,
                &[
                    "system_id",
                    "systemId",
                    "solar_system_id",
                    "solarSystemId",
                    "solarSystem.id",
                    "solar_system.id",
                ],
            )
            .and_then(as_id),
            region_id: lookup(
                &raw,
                &["region_id", "regionId", "solarSystem.regionId", "region.id"],
            )
            .and_then(as_id),
            region_name: lookup(&raw, &["region_name", "regionName", "region.name"])
                .and_then(as_name),
            victim,
            ship_group_id,
            first_attacker,
            is_solo: lookup(&raw, &["is_solo", "isSolo", "solo"]).is_some_and(as_flag),
            is_npc: lookup(&raw, &["is_npc", "isNpc", "npc"]).is_some_and(as_flag),
            is_awox: lookup(&raw, &["is_awox", "isAwox", "awox"]).is_some_and(as_flag),
            raw,
        }
    }
}

/// Return the first non-null value found at any of the dotted `paths`.
fn lookup<'a>(value: &'a Value, paths: &[&str]) -> Option<&'a Value> {
    paths.iter().find_map(|path| {
        path.split('.')
            .try_fold(value, |current, key| current.get(key))
            .filter(|v| !v.is_null())
    })
}

/// Read a positive integer id from a number or numeric string. Zero is absent.
fn as_id(value: &Value) -> Option<u64> {
    let id = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }?;
    (id != 0).then_some(id)
}

/// Read a finite float from a number or numeric string.
fn as_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

/// Read a display name from a string or a localized `{"en": "..."}` object.
fn as_name(value: &Value) -> Option<String> {
    let name = match value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("en").and_then(Value::as_str),
        _ => None,
    }?;
    let trimmed = name.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

/// Read a boolean flag from a bool, `0`/`1`, or `"true"`/`"false"`.
fn as_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_u64().is_some_and(|v| v != 0),
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snake_case_shape() {
        let km = Killmail::from_value(json!({
            "killmail_id": 123,
            "total_value": 1_500_000_000.0,
            "system_security": 0.5,
            "system_id": 30_000_142,
            "region_id": 10_000_002,
            "region_name": { "en": "The Forge" },
            "victim": {
                "character_id": 500_001,
                "corporation_id": 98_000_001,
                "alliance_id": null,
                "ship_group_id": 25
            },
            "attackers": [
                { "character_id": 600_001, "corporation_id": 98_000_002 },
                { "character_id": 600_002 }
            ],
            "is_solo": true,
            "is_npc": false
        }));

        assert_eq!(km.killmail_id, Some(123));
        assert_eq!(km.system_id, Some(30_000_142));
        assert_eq!(km.region_id, Some(10_000_002));
        assert_eq!(km.region_name.as_deref(), Some("The Forge"));
        assert_eq!(km.victim.character_id, Some(500_001));
        assert_eq!(km.victim.alliance_id, None);
        assert_eq!(km.ship_group_id, Some(25));
        assert_eq!(
            km.first_attacker.map(|a| a.ids().collect::<Vec<_>>()),
            Some(vec![600_001, 98_000_002])
        );
        assert!(km.is_solo);
        assert!(!km.is_npc);
        assert!(!km.is_awox);
    }

    #[test]
    fn camel_case_shape() {
        let km = Killmail::from_value(json!({
            "killmailId": "77",
            "totalValue": 11_000_000_000_u64,
            "solarSystem": { "id": 30_002_086, "securityStatus": -0.1 },
            "regionId": 10_000_070,
            "victim": { "characterId": 500_002, "shipGroupId": "30" },
            "isAwox": true
        }));

        assert_eq!(km.killmail_id, Some(77));
        assert!(km.total_value.is_some_and(|v| v >= 11e9));
        assert!(km.security_status.is_some_and(|s| s < 0.0));
        assert_eq!(km.system_id, Some(30_002_086));
        assert_eq!(km.region_id, Some(10_000_070));
        assert_eq!(km.victim.character_id, Some(500_002));
        assert_eq!(km.ship_group_id, Some(30));
        assert!(km.is_awox);
    }

    #[test]
    fn garbage_fields_are_absent() {
        let km = Killmail::from_value(json!({
            "total_value": "lots",
            "system_security": [1, 2],
            "victim": "nobody",
            "attackers": {},
            "region_name": "   ",
            "system_id": 0
        }));

        assert_eq!(km.total_value, None);
        assert_eq!(km.security_status, None);
        assert_eq!(km.victim, Participant::default());
        assert_eq!(km.first_attacker, None);
        assert_eq!(km.region_name, None);
        assert_eq!(km.system_id, None);
    }

    #[test]
    fn non_object_payload_is_kept_verbatim() {
        let km = Killmail::from_value(json!([1, 2, 3]));
        assert_eq!(km.raw, json!([1, 2, 3]));
        assert_eq!(km.killmail_id, None);
    }

    #[test]
    fn empty_attacker_list_has_no_representative() {
        let km = Killmail::from_value(json!({ "attackers": [] }));
        assert_eq!(km.first_attacker, None);
    }
}
