use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::events::{EquipmentPayload, HeldItem, PlayerPayload, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BodyPart {
    Head,
    Torso,
    LeftArm,
    RightArm,
    LeftLeg,
    RightLeg,
}

impl BodyPart {
    pub const ALL: [BodyPart; 6] = [
        BodyPart::Head,
        BodyPart::Torso,
        BodyPart::LeftArm,
        BodyPart::RightArm,
        BodyPart::LeftLeg,
        BodyPart::RightLeg,
    ];

    /// Accepts the producer's spellings (`LeftArm`, `left_arm`, `Torso_Upper`, ...).
    pub fn from_wire(key: &str) -> Option<Self> {
        let normalized: String = key
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "head" => Some(BodyPart::Head),
            "torso" | "torsoupper" | "chest" => Some(BodyPart::Torso),
            "leftarm" | "upperarmleft" | "upperarml" => Some(BodyPart::LeftArm),
            "rightarm" | "upperarmright" | "upperarmr" => Some(BodyPart::RightArm),
            "leftleg" | "upperlegleft" | "upperlegl" => Some(BodyPart::LeftLeg),
            "rightleg" | "upperlegright" | "upperlegr" => Some(BodyPart::RightLeg),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BodyPart::Head => "Head",
            BodyPart::Torso => "Torso",
            BodyPart::LeftArm => "Left Arm",
            BodyPart::RightArm => "Right Arm",
            BodyPart::LeftLeg => "Left Leg",
            BodyPart::RightLeg => "Right Leg",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Inside,
    Outside,
}

impl Location {
    pub fn from_outside(is_outside: bool) -> Self {
        if is_outside {
            Location::Outside
        } else {
            Location::Inside
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Location::Inside => "INSIDE",
            Location::Outside => "OUTSIDE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weight {
    pub current: f64,
    pub max: f64,
}

impl Weight {
    pub fn is_renderable(&self) -> bool {
        self.max > 0.0
    }

    pub fn fill_ratio(&self) -> f32 {
        if !self.is_renderable() {
            return 0.0;
        }
        (self.current / self.max).clamp(0.0, 1.0) as f32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub name: String,
    pub texture_ref: Option<String>,
}

impl Item {
    fn from_held(held: HeldItem) -> Option<Self> {
        let name = held
            .name
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())?;
        Some(Self {
            name,
            texture_ref: held.texture_ref.filter(|value| !value.trim().is_empty()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hand {
    Primary,
    Secondary,
}

impl Hand {
    pub fn from_slot(slot: Option<&str>) -> Self {
        match slot.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("secondary") | Some("secondaryhand") | Some("offhand") => Hand::Secondary,
            _ => Hand::Primary,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Equipment {
    pub primary: Option<Item>,
    pub secondary: Option<Item>,
}

impl Equipment {
    pub fn slot(&self, hand: Hand) -> Option<&Item> {
        match hand {
            Hand::Primary => self.primary.as_ref(),
            Hand::Secondary => self.secondary.as_ref(),
        }
    }

    pub fn set(&mut self, hand: Hand, item: Option<Item>) {
        match hand {
            Hand::Primary => self.primary = item,
            Hand::Secondary => self.secondary = item,
        }
    }
}

/// Interprets a health reading as a fraction when it is at most 1, otherwise as a
/// percentage. Producers disagree on units; a genuine 1% reading renders as 100%.
pub fn normalize_health(raw: f64) -> f64 {
    if !raw.is_finite() {
        return 0.0;
    }
    let percent = if raw <= 1.0 { raw * 100.0 } else { raw };
    percent.clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerSnapshot {
    pub health: Option<f64>,
    pub body_part_health: BTreeMap<BodyPart, f64>,
    pub health_stats: BTreeMap<String, f64>,
    pub weight: Option<Weight>,
    pub location: Option<Location>,
    pub equipment: Equipment,
    pub position: Option<Position>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl PlayerSnapshot {
    pub fn display_health(&self) -> Option<u32> {
        self.health.map(|value| value.round() as u32)
    }

    /// Merges the fields carried by `player`; everything absent stays as it was.
    pub fn merge_player(&mut self, player: &PlayerPayload, now: DateTime<Utc>) {
        if let Some(raw) = player.health {
            self.health = Some(normalize_health(raw));
        }

        if let Some(parts) = &player.body_part_health {
            for (key, value) in parts {
                let Some(part) = BodyPart::from_wire(key) else {
                    debug!(part = %key, "ignoring unknown body part");
                    continue;
                };
                match value.filter(|value| value.is_finite()) {
                    Some(value) => {
                        self.body_part_health.insert(part, value.clamp(0.0, 100.0));
                    }
                    None => debug!(part = %key, "skipping body part without a reading"),
                }
            }
        }

        if let Some(stats) = &player.health_stats {
            for (key, value) in stats {
                if let Some(value) = value.filter(|value| value.is_finite()) {
                    self.health_stats.insert(key.clone(), value);
                }
            }
        }

        if let Some(position) = player.position {
            self.position = Some(self.position.unwrap_or_default().merged(position));
        }

        if let Some(is_outside) = player.state.as_ref().and_then(|state| state.is_outside) {
            self.location = Some(Location::from_outside(is_outside));
        }

        if let Some(stats) = &player.stats {
            let previous = self.weight;
            let current = stats
                .inventory_weight
                .or(previous.map(|weight| weight.current));
            let max = stats.max_weight.or(previous.map(|weight| weight.max));
            if let (Some(current), Some(max)) = (current, max) {
                self.weight = Some(Weight { current, max });
            }
        }

        if let Some(equipment) = &player.equipment {
            self.merge_equipment(equipment);
        }

        self.last_updated = Some(now);
    }

    pub fn merge_equipment(&mut self, equipment: &EquipmentPayload) {
        if let Some(primary) = &equipment.primary_hand {
            self.equipment.primary = primary.clone().and_then(Item::from_held);
        }
        if let Some(secondary) = &equipment.secondary_hand {
            self.equipment.secondary = secondary.clone().and_then(Item::from_held);
        }
    }

    pub fn equip(&mut self, hand: Hand, name: &str, texture_ref: Option<&str>) {
        let item = Item::from_held(HeldItem {
            name: Some(name.to_owned()),
            texture_ref: texture_ref.map(str::to_owned),
        });
        self.equipment.set(hand, item);
    }
}
