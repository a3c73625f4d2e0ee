use std::collections::HashMap;

use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One telemetry event as emitted by the game-side script.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    State(StatePayload),
    XpGain(XpPayload),
    LevelUp(XpPayload),
    ZombieKill(KillPayload),
    Attack(AttackPayload),
    Pickup(ItemPayload),
    Equip(ItemPayload),
    SpriteSheetUpdated(SpriteSheetPayload),
    Unknown { kind: String },
}

impl RawEvent {
    pub fn kind(&self) -> &str {
        match self {
            RawEvent::State(_) => "state",
            RawEvent::XpGain(_) => "xp_gain",
            RawEvent::LevelUp(_) => "level_up",
            RawEvent::ZombieKill(_) => "zombie_kill",
            RawEvent::Attack(_) => "attack",
            RawEvent::Pickup(_) => "pickup",
            RawEvent::Equip(_) => "equip",
            RawEvent::SpriteSheetUpdated(_) => "sprite_sheet_updated",
            RawEvent::Unknown { kind } => kind,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StatePayload {
    pub player: Option<PlayerPayload>,
    #[serde(deserialize_with = "lenient")]
    pub timestamp: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlayerPayload {
    #[serde(deserialize_with = "lenient")]
    pub health: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub body_part_health: Option<HashMap<String, Option<f64>>>,
    #[serde(deserialize_with = "lenient")]
    pub health_stats: Option<HashMap<String, Option<f64>>>,
    #[serde(deserialize_with = "lenient")]
    pub position: Option<Position>,
    #[serde(deserialize_with = "lenient")]
    pub state: Option<PlayerFlags>,
    #[serde(deserialize_with = "lenient")]
    pub stats: Option<PlayerStats>,
    #[serde(deserialize_with = "lenient")]
    pub equipment: Option<EquipmentPayload>,
}

/// World coordinates; any axis may be missing from a given report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Position {
    #[serde(deserialize_with = "lenient")]
    pub x: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub y: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub z: Option<f64>,
}

impl Position {
    /// Axes present in `newer` replace ours; non-finite readings are ignored.
    pub fn merged(self, newer: Position) -> Position {
        let pick = |new: Option<f64>, old: Option<f64>| new.filter(|v| v.is_finite()).or(old);
        Position {
            x: pick(newer.x, self.x),
            y: pick(newer.y, self.y),
            z: pick(newer.z, self.z),
        }
    }

    /// `x, y` plus the floor when known. `None` until both x and y are.
    pub fn label(&self) -> Option<String> {
        let (x, y) = (self.x?, self.y?);
        Some(match self.z {
            Some(z) => format!("{x:.0}, {y:.0} (z{z:.0})"),
            None => format!("{x:.0}, {y:.0}"),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlayerFlags {
    #[serde(deserialize_with = "lenient")]
    pub is_outside: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlayerStats {
    #[serde(deserialize_with = "lenient")]
    pub inventory_weight: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub max_weight: Option<f64>,
}

/// `None` leaves a hand untouched, `Some(None)` empties it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EquipmentPayload {
    #[serde(deserialize_with = "present_or_null")]
    pub primary_hand: Option<Option<HeldItem>>,
    #[serde(deserialize_with = "present_or_null")]
    pub secondary_hand: Option<Option<HeldItem>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeldItem {
    #[serde(alias = "itemName")]
    pub name: Option<String>,
    #[serde(alias = "texture", alias = "icon")]
    pub texture_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct XpPayload {
    pub perk: String,
    #[serde(deserialize_with = "lenient")]
    pub amount: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub level: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub player: Option<PlayerPayload>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KillPayload {
    pub weapon: Option<String>,
    pub weapon_texture: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub location: Option<Position>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AttackPayload {
    pub item_name: Option<String>,
    pub item_type: Option<String>,
    pub hit: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ItemPayload {
    #[serde(alias = "name")]
    pub item_name: Option<String>,
    #[serde(alias = "textureRef", alias = "icon")]
    pub texture: Option<String>,
    pub slot: Option<String>,
    pub equipment: Option<EquipmentPayload>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SpriteSheetPayload {
    pub path: Option<String>,
}

/// A value of the wrong shape reads as absent instead of failing the payload
/// around it.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<HeldItem>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<HeldItem>::deserialize(deserializer).map(Some)
}
