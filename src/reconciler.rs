use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::{
    config::XpConfig,
    events::{AttackPayload, ItemPayload, KillPayload, PlayerPayload, RawEvent, XpPayload},
    snapshot::{Hand, PlayerSnapshot},
    sprites::{SpriteResolver, SpriteStyle},
};

pub const BARE_HANDS: &str = "bare hands";
const DEFAULT_PERK_ICON: &str = "⭐";
const FIST_ICON: &str = "👊";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToastCategory {
    Xp,
    LevelUp,
    Kill,
    Item,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToastIcon {
    Emoji(String),
    Sprite(SpriteStyle),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToastIntent {
    pub message: String,
    pub icon: ToastIcon,
    pub category: ToastCategory,
    pub spawn_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiIntent {
    RenderFull,
    Persist,
    Toast(ToastIntent),
    HitMarker,
    ReloadAvatar(String),
}

/// Owns the player snapshot and turns raw events into UI intents.
pub struct EventReconciler {
    snapshot: PlayerSnapshot,
    xp: XpConfig,
    frequent_perks: HashSet<String>,
    sprites: Arc<SpriteResolver>,
}

impl EventReconciler {
    pub fn new(xp: XpConfig, sprites: Arc<SpriteResolver>) -> Self {
        let frequent_perks = xp
            .frequent_perks
            .iter()
            .map(|perk| perk.trim().to_ascii_lowercase())
            .collect();
        Self {
            snapshot: PlayerSnapshot::default(),
            xp,
            frequent_perks,
            sprites,
        }
    }

    /// Seeds the snapshot from persisted state at cold start.
    pub fn seed(&mut self, snapshot: PlayerSnapshot) {
        self.snapshot = snapshot;
    }

    pub fn snapshot(&self) -> &PlayerSnapshot {
        &self.snapshot
    }

    pub fn invalidate(&mut self) {
        self.snapshot = PlayerSnapshot::default();
    }

    pub fn handle(&mut self, event: RawEvent, now: DateTime<Utc>) -> Vec<UiIntent> {
        match event {
            RawEvent::State(state) => match state.player {
                Some(player) => {
                    trace!(sent_at = ?state.timestamp, "state update");
                    self.merge(&player, now)
                }
                None => {
                    debug!("state event without player payload");
                    Vec::new()
                }
            },
            RawEvent::XpGain(xp) => self.handle_xp_gain(xp, now),
            RawEvent::LevelUp(xp) => self.handle_level_up(xp, now),
            RawEvent::ZombieKill(kill) => vec![UiIntent::Toast(self.kill_toast(kill, now))],
            RawEvent::Attack(attack) => self.handle_attack(attack),
            RawEvent::Pickup(item) => self.handle_pickup(item, now),
            RawEvent::Equip(item) => self.handle_equip(item, now),
            RawEvent::SpriteSheetUpdated(sheet) => match sheet.path {
                Some(path) if !path.trim().is_empty() => vec![UiIntent::ReloadAvatar(path)],
                _ => Vec::new(),
            },
            RawEvent::Unknown { kind } => {
                debug!(kind = %kind, "dropping event of unknown type");
                Vec::new()
            }
        }
    }

    fn merge(&mut self, player: &PlayerPayload, now: DateTime<Utc>) -> Vec<UiIntent> {
        self.snapshot.merge_player(player, now);
        vec![UiIntent::RenderFull, UiIntent::Persist]
    }

    fn handle_xp_gain(&mut self, xp: XpPayload, now: DateTime<Utc>) -> Vec<UiIntent> {
        let mut intents = match &xp.player {
            Some(player) => self.merge(player, now),
            None => Vec::new(),
        };
        let amount = xp.amount.unwrap_or(0.0);
        if self.should_toast_xp(&xp.perk, amount) {
            intents.push(UiIntent::Toast(ToastIntent {
                message: format!("+{} {} XP", format_amount(amount), perk_label(&xp.perk)),
                icon: ToastIcon::Emoji(perk_icon(&xp.perk).to_owned()),
                category: ToastCategory::Xp,
                spawn_time: now,
            }));
        } else {
            trace!(perk = %xp.perk, amount, "suppressed xp toast");
        }
        intents
    }

    pub fn should_toast_xp(&self, perk: &str, amount: f64) -> bool {
        if amount < self.xp.min_amount {
            return false;
        }
        let frequent = self
            .frequent_perks
            .contains(&perk.trim().to_ascii_lowercase());
        !frequent || amount >= self.xp.frequent_threshold
    }

    fn handle_level_up(&mut self, xp: XpPayload, now: DateTime<Utc>) -> Vec<UiIntent> {
        let mut intents = match &xp.player {
            Some(player) => self.merge(player, now),
            None => Vec::new(),
        };
        let message = match xp.level {
            Some(level) if level.is_finite() => {
                format!("{} reached level {level:.0}!", perk_label(&xp.perk))
            }
            _ => format!("{} leveled up!", perk_label(&xp.perk)),
        };
        intents.push(UiIntent::Toast(ToastIntent {
            message,
            icon: ToastIcon::Emoji(perk_icon(&xp.perk).to_owned()),
            category: ToastCategory::LevelUp,
            spawn_time: now,
        }));
        intents
    }

    fn kill_toast(&self, kill: KillPayload, now: DateTime<Utc>) -> ToastIntent {
        if let Some(label) = kill.location.and_then(|location| location.label()) {
            debug!(at = %label, "zombie killed");
        }
        let weapon = kill
            .weapon
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty() && !value.eq_ignore_ascii_case("none"));
        let (weapon_label, icon) = match weapon {
            Some(name) => {
                let texture = kill
                    .weapon_texture
                    .filter(|value| !value.trim().is_empty())
                    .unwrap_or_else(|| name.clone());
                let icon = ToastIcon::Sprite(self.sprites.resolve(&texture));
                (name, icon)
            }
            None => (
                BARE_HANDS.to_owned(),
                ToastIcon::Emoji(FIST_ICON.to_owned()),
            ),
        };
        ToastIntent {
            message: format!("Zombie killed with {weapon_label}"),
            icon,
            category: ToastCategory::Kill,
            spawn_time: now,
        }
    }

    fn handle_attack(&mut self, attack: AttackPayload) -> Vec<UiIntent> {
        if attack.hit {
            vec![UiIntent::HitMarker]
        } else {
            trace!(item = ?attack.item_name, kind = ?attack.item_type, "attack missed");
            Vec::new()
        }
    }

    fn handle_pickup(&mut self, item: ItemPayload, now: DateTime<Utc>) -> Vec<UiIntent> {
        let Some(name) = item
            .item_name
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
        else {
            debug!("pickup event without item name");
            return Vec::new();
        };
        let icon = item
            .texture
            .as_deref()
            .map(|texture| ToastIcon::Sprite(self.sprites.resolve(texture)))
            .unwrap_or_else(|| ToastIcon::Emoji("🎒".to_owned()));
        vec![UiIntent::Toast(ToastIntent {
            message: format!("Picked up {name}"),
            icon,
            category: ToastCategory::Item,
            spawn_time: now,
        })]
    }

    fn handle_equip(&mut self, item: ItemPayload, now: DateTime<Utc>) -> Vec<UiIntent> {
        if let Some(equipment) = &item.equipment {
            self.snapshot.merge_equipment(equipment);
        } else if let Some(name) = item.item_name.as_deref() {
            let hand = Hand::from_slot(item.slot.as_deref());
            self.snapshot.equip(hand, name, item.texture.as_deref());
        } else {
            debug!("equip event without equipment or item name");
            return Vec::new();
        }
        self.snapshot.last_updated = Some(now);
        vec![UiIntent::RenderFull, UiIntent::Persist]
    }
}

fn format_amount(amount: f64) -> String {
    if amount.fract().abs() < f64::EPSILON {
        format!("{amount:.0}")
    } else {
        format!("{amount:.1}")
    }
}

/// `SmallBlade` -> `Small Blade`.
pub fn perk_label(perk: &str) -> String {
    let perk = perk.trim();
    if perk.is_empty() {
        return "Skill".to_owned();
    }
    let mut out = String::with_capacity(perk.len() + 4);
    let mut prev_lower = false;
    for ch in perk.chars() {
        if ch == '_' {
            out.push(' ');
            prev_lower = false;
            continue;
        }
        if ch.is_ascii_uppercase() && prev_lower {
            out.push(' ');
        }
        prev_lower = ch.is_ascii_lowercase();
        out.push(ch);
    }
    out
}

pub fn perk_icon(perk: &str) -> &'static str {
    match perk.trim().to_ascii_lowercase().as_str() {
        "strength" => "💪",
        "fitness" => "🏃",
        "sprinting" => "👟",
        "lightfoot" => "🦶",
        "nimble" => "🤸",
        "sneak" => "🥷",
        "axe" => "🪓",
        "blunt" | "smallblunt" => "🔨",
        "longblade" => "🗡️",
        "smallblade" => "🔪",
        "spear" => "🔱",
        "maintenance" => "🔧",
        "woodwork" | "carpentry" => "🪚",
        "cooking" => "🍳",
        "farming" => "🌱",
        "doctor" | "firstaid" => "🩺",
        "electricity" => "⚡",
        "metalwelding" => "🔥",
        "mechanics" => "🚗",
        "tailoring" => "🧵",
        "aiming" => "🎯",
        "reloading" => "🔄",
        "fishing" => "🎣",
        "trapping" => "🪤",
        "plantscavenging" | "foraging" => "🌿",
        _ => DEFAULT_PERK_ICON,
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use chrono::Utc;

    use super::{
        perk_icon, perk_label, EventReconciler, ToastCategory, ToastIcon, UiIntent, BARE_HANDS,
    };
    use crate::{
        config::{SpriteConfig, XpConfig},
        protocol::parse_event,
        snapshot::{BodyPart, Hand, Location},
        sprites::{SpriteAtlas, SpriteFit, SpriteResolver},
    };

    fn reconciler() -> EventReconciler {
        let atlas = SpriteAtlas::from_json_str(
            r#"{ "Item_Crowbar": { "sheet": "items", "x": 32, "y": 0 } }"#,
        )
        .expect("atlas");
        let mut sheets = HashMap::new();
        sheets.insert("ui".to_owned(), "ui.png".to_owned());
        sheets.insert("items".to_owned(), "items.png".to_owned());
        let sprites = SpriteResolver::new(
            &SpriteConfig {
                atlas_path: None,
                sheets,
                default_sheet: "ui".to_owned(),
                texture_aliases: HashMap::new(),
            },
            atlas,
        );
        EventReconciler::new(XpConfig::default(), Arc::new(sprites))
    }

    fn feed(reconciler: &mut EventReconciler, raw: &str) -> Vec<UiIntent> {
        let event = parse_event(raw).expect("event should parse");
        reconciler.handle(event, Utc::now())
    }

    fn toasts(intents: &[UiIntent]) -> Vec<&super::ToastIntent> {
        intents
            .iter()
            .filter_map(|intent| match intent {
                UiIntent::Toast(toast) => Some(toast),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn state_event_merges_and_requests_render_then_persist() {
        let mut reconciler = reconciler();
        let intents = feed(
            &mut reconciler,
            r#"{"type":"state","player":{"health":0.42,"state":{"isOutside":true}}}"#,
        );
        assert_eq!(intents, vec![UiIntent::RenderFull, UiIntent::Persist]);
        assert_eq!(reconciler.snapshot().display_health(), Some(42));
        assert_eq!(reconciler.snapshot().location, Some(Location::Outside));
    }

    #[test]
    fn successive_states_never_revert_untouched_fields() {
        let mut reconciler = reconciler();
        feed(
            &mut reconciler,
            r#"{"type":"state","player":{"health":80,"bodyPartHealth":{"Head":90},"healthStats":{"pain":0.3}}}"#,
        );
        feed(
            &mut reconciler,
            r#"{"type":"state","player":{"bodyPartHealth":{"RightLeg":20}}}"#,
        );
        feed(&mut reconciler, r#"{"type":"state","player":{"health":60}}"#);

        let snapshot = reconciler.snapshot();
        assert_eq!(snapshot.health, Some(60.0));
        assert_eq!(snapshot.body_part_health.get(&BodyPart::Head), Some(&90.0));
        assert_eq!(
            snapshot.body_part_health.get(&BodyPart::RightLeg),
            Some(&20.0)
        );
        assert_eq!(snapshot.health_stats.get("pain"), Some(&0.3));
    }

    #[test]
    fn state_without_player_is_a_no_op() {
        let mut reconciler = reconciler();
        assert!(feed(&mut reconciler, r#"{"type":"state"}"#).is_empty());
        assert_eq!(reconciler.snapshot().health, None);
    }

    #[test]
    fn frequent_perk_xp_needs_the_higher_threshold() {
        let mut reconciler = reconciler();
        let intents = feed(
            &mut reconciler,
            r#"{"type":"xp_gain","perk":"Sprinting","amount":2,"level":3}"#,
        );
        assert!(toasts(&intents).is_empty());

        let intents = feed(
            &mut reconciler,
            r#"{"type":"xp_gain","perk":"Sprinting","amount":5,"level":3}"#,
        );
        let shown = toasts(&intents);
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].category, ToastCategory::Xp);
        assert_eq!(shown[0].message, "+5 Sprinting XP");
        assert_eq!(shown[0].icon, ToastIcon::Emoji("👟".to_owned()));
    }

    #[test]
    fn rare_perk_xp_only_needs_the_minimum() {
        let mut reconciler = reconciler();
        let intents = feed(
            &mut reconciler,
            r#"{"type":"xp_gain","perk":"Carpentry","amount":1.5,"level":1}"#,
        );
        assert_eq!(toasts(&intents).len(), 1);

        let intents = feed(
            &mut reconciler,
            r#"{"type":"xp_gain","perk":"Carpentry","amount":0.5,"level":1}"#,
        );
        assert!(toasts(&intents).is_empty());

        let intents = feed(&mut reconciler, r#"{"type":"xp_gain","perk":"Carpentry"}"#);
        assert!(toasts(&intents).is_empty());
    }

    #[test]
    fn xp_event_with_player_payload_also_merges() {
        let mut reconciler = reconciler();
        let intents = feed(
            &mut reconciler,
            r#"{"type":"xp_gain","perk":"Axe","amount":10,"level":2,"player":{"health":50}}"#,
        );
        assert_eq!(intents[0], UiIntent::RenderFull);
        assert_eq!(intents[1], UiIntent::Persist);
        assert_eq!(toasts(&intents).len(), 1);
        assert_eq!(reconciler.snapshot().health, Some(50.0));
    }

    #[test]
    fn level_up_always_toasts() {
        let mut reconciler = reconciler();
        let intents = feed(
            &mut reconciler,
            r#"{"type":"level_up","perk":"SmallBlade","level":4}"#,
        );
        let shown = toasts(&intents);
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].category, ToastCategory::LevelUp);
        assert_eq!(shown[0].message, "Small Blade reached level 4!");
    }

    #[test]
    fn float_level_still_toasts() {
        let mut reconciler = reconciler();
        let intents = feed(
            &mut reconciler,
            r#"{"type":"level_up","perk":"Axe","level":3.0,"player":{"health":70}}"#,
        );
        let shown = toasts(&intents);
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].message, "Axe reached level 3!");
        assert_eq!(reconciler.snapshot().health, Some(70.0));

        let intents = feed(
            &mut reconciler,
            r#"{"type":"level_up","perk":"Axe","level":null}"#,
        );
        assert_eq!(toasts(&intents)[0].message, "Axe leveled up!");
    }

    #[test]
    fn nulls_inside_state_leave_the_rest_of_the_merge_intact() {
        let mut reconciler = reconciler();
        let intents = feed(
            &mut reconciler,
            r#"{"type":"state","player":{"health":50,"bodyPartHealth":{"Head":100,"Groin":null},"healthStats":{"pain":null},"position":{"x":1,"y":null,"z":0}}}"#,
        );
        assert_eq!(intents, vec![UiIntent::RenderFull, UiIntent::Persist]);
        let snapshot = reconciler.snapshot();
        assert_eq!(snapshot.health, Some(50.0));
        assert_eq!(snapshot.body_part_health.get(&BodyPart::Head), Some(&100.0));
        assert!(snapshot.health_stats.is_empty());
        assert_eq!(snapshot.position.and_then(|position| position.x), Some(1.0));
    }

    #[test]
    fn unarmed_kill_reports_bare_hands() {
        let mut reconciler = reconciler();
        for raw in [
            r#"{"type":"zombie_kill","weapon":"none","location":{"x":1,"y":2,"z":0}}"#,
            r#"{"type":"zombie_kill"}"#,
            r#"{"type":"zombie_kill","weapon":"  "}"#,
        ] {
            let intents = feed(&mut reconciler, raw);
            let shown = toasts(&intents);
            assert_eq!(shown.len(), 1);
            assert_eq!(shown[0].category, ToastCategory::Kill);
            assert!(shown[0].message.ends_with(BARE_HANDS));
        }
    }

    #[test]
    fn armed_kill_resolves_weapon_sprite_through_fallbacks() {
        let mut reconciler = reconciler();
        let intents = feed(
            &mut reconciler,
            r#"{"type":"zombie_kill","weapon":"Crowbar","weaponTexture":"Crowbar"}"#,
        );
        match &toasts(&intents)[0].icon {
            ToastIcon::Sprite(style) => {
                assert_eq!(style.sheet, "items.png");
                assert_eq!(style.x, 32);
            }
            other => panic!("expected sprite icon, got {other:?}"),
        }

        let intents = feed(
            &mut reconciler,
            r#"{"type":"zombie_kill","weapon":"Mystery Stick"}"#,
        );
        match &toasts(&intents)[0].icon {
            ToastIcon::Sprite(style) => {
                assert_eq!(style.sheet, "ui.png");
                assert_eq!(style.fit, SpriteFit::Contain);
            }
            other => panic!("expected default sprite icon, got {other:?}"),
        }
    }

    #[test]
    fn landed_hits_emit_hit_marker() {
        let mut reconciler = reconciler();
        let intents = feed(
            &mut reconciler,
            r#"{"type":"attack","itemName":"Axe","itemType":"Weapon","hit":true}"#,
        );
        assert_eq!(intents, vec![UiIntent::HitMarker]);
        let intents = feed(
            &mut reconciler,
            r#"{"type":"attack","itemName":"Axe","itemType":"Weapon","hit":false}"#,
        );
        assert!(intents.is_empty());
    }

    #[test]
    fn equip_updates_named_slot() {
        let mut reconciler = reconciler();
        let intents = feed(
            &mut reconciler,
            r#"{"type":"equip","itemName":"Flashlight","texture":"Item_Torch","slot":"secondary"}"#,
        );
        assert_eq!(intents, vec![UiIntent::RenderFull, UiIntent::Persist]);
        let secondary = reconciler
            .snapshot()
            .equipment
            .slot(Hand::Secondary)
            .expect("secondary hand should be filled");
        assert_eq!(secondary.name, "Flashlight");
        assert!(reconciler.snapshot().equipment.primary.is_none());
    }

    #[test]
    fn pickup_toasts_item_name() {
        let mut reconciler = reconciler();
        let intents = feed(&mut reconciler, r#"{"type":"pickup","itemName":"Bandage"}"#);
        let shown = toasts(&intents);
        assert_eq!(shown[0].category, ToastCategory::Item);
        assert_eq!(shown[0].message, "Picked up Bandage");
    }

    #[test]
    fn unknown_events_are_dropped() {
        let mut reconciler = reconciler();
        assert!(feed(&mut reconciler, r#"{"type":"weather","rain":true}"#).is_empty());
    }

    #[test]
    fn sprite_sheet_update_requests_avatar_reload() {
        let mut reconciler = reconciler();
        let intents = feed(
            &mut reconciler,
            r#"{"type":"sprite_sheet_updated","path":"overlay/assets/sprite_sheet.png"}"#,
        );
        assert_eq!(
            intents,
            vec![UiIntent::ReloadAvatar(
                "overlay/assets/sprite_sheet.png".to_owned()
            )]
        );
    }

    #[test]
    fn perk_labels_and_icons() {
        assert_eq!(perk_label("PlantScavenging"), "Plant Scavenging");
        assert_eq!(perk_label("Axe"), "Axe");
        assert_eq!(perk_label(""), "Skill");
        assert_eq!(perk_icon("Woodwork"), "🪚");
        assert_eq!(perk_icon("Unheard"), "⭐");
    }
}
