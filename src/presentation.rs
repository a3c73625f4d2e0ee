use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::trace;

use crate::{
    config::{HealthConfig, ToastConfig},
    reconciler::{ToastCategory, ToastIcon, ToastIntent, UiIntent},
    snapshot::{BodyPart, Hand, Item, Location, PlayerSnapshot},
    sprites::{SpriteResolver, SpriteStyle},
    transport::ConnectionStatus,
};

pub type ToastId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Widget {
    HealthBar,
    BodyPart(BodyPart),
    Stat(String),
    WeightBar,
    Location,
    Position,
    WeaponSlot(HandSlot),
    Toast(ToastId),
    Connection,
    HitMarker,
}

/// `Hand` without the snapshot semantics, so widgets can be ordered and hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandSlot {
    Primary,
    Secondary,
}

impl From<Hand> for HandSlot {
    fn from(hand: Hand) -> Self {
        match hand {
            Hand::Primary => HandSlot::Primary,
            Hand::Secondary => HandSlot::Secondary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Visual {
    LowHealth,
    DamageFlash,
    Damaged,
    Hidden,
    Outside,
    Empty,
    Disconnected,
    Active,
    Exiting,
    Xp,
    LevelUp,
    Kill,
    Item,
}

impl From<ToastCategory> for Visual {
    fn from(category: ToastCategory) -> Self {
        match category {
            ToastCategory::Xp => Visual::Xp,
            ToastCategory::LevelUp => Visual::LevelUp,
            ToastCategory::Kill => Visual::Kill,
            ToastCategory::Item => Visual::Item,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Icon {
    Sprite(SpriteStyle),
    Emoji(String),
}

impl From<ToastIcon> for Icon {
    fn from(icon: ToastIcon) -> Self {
        match icon {
            ToastIcon::Sprite(style) => Icon::Sprite(style),
            ToastIcon::Emoji(emoji) => Icon::Emoji(emoji),
        }
    }
}

/// What the driver needs from a rendering target. Changes become visible only
/// when the target paints, which never happens in the middle of a driver call.
pub trait HudSurface {
    fn set_fill(&mut self, widget: &Widget, ratio: f32);
    fn set_text(&mut self, widget: &Widget, text: &str);
    fn set_visual(&mut self, widget: &Widget, visual: Visual, on: bool);
    fn mount_icon(&mut self, widget: &Widget, icon: &Icon);
    fn unmount_icon(&mut self, widget: &Widget);
    /// Removes the widget and everything attached to it.
    fn release(&mut self, widget: &Widget);
    fn reload_avatar(&mut self, _path: &str) {}
}

#[derive(Debug, Clone)]
struct ActiveToast {
    id: ToastId,
    hide_at: Instant,
    gone_at: Instant,
    exit_from: Option<Instant>,
}

impl ActiveToast {
    fn exiting(&self) -> bool {
        self.exit_from.is_some()
    }

    /// 0 when the exit transition starts, 1 when the toast is gone.
    fn exit_progress(&self, now: Instant) -> f32 {
        let Some(from) = self.exit_from else {
            return 0.0;
        };
        let span = self.gone_at.saturating_duration_since(from);
        if span.is_zero() {
            return 1.0;
        }
        (now.saturating_duration_since(from).as_secs_f32() / span.as_secs_f32()).clamp(0.0, 1.0)
    }
}

pub struct PresentationDriver<S: HudSurface> {
    surface: S,
    sprites: Arc<SpriteResolver>,
    health: HealthConfig,
    toasts: ToastConfig,
    last_health: Option<f64>,
    flash_until: Option<Instant>,
    hit_until: Option<Instant>,
    active_toasts: VecDeque<ActiveToast>,
    next_toast_id: ToastId,
}

impl<S: HudSurface> PresentationDriver<S> {
    pub fn new(
        surface: S,
        sprites: Arc<SpriteResolver>,
        health: HealthConfig,
        toasts: ToastConfig,
    ) -> Self {
        Self {
            surface,
            sprites,
            health,
            toasts,
            last_health: None,
            flash_until: None,
            hit_until: None,
            active_toasts: VecDeque::new(),
            next_toast_id: 1,
        }
    }

    #[cfg(test)]
    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    #[cfg(test)]
    pub fn is_flashing(&self) -> bool {
        self.flash_until.is_some()
    }

    pub fn visible_toasts(&self) -> usize {
        self.active_toasts.len()
    }

    /// Carries out one reconciler intent. `Persist` belongs to the store.
    pub fn apply(&mut self, intent: UiIntent, snapshot: &PlayerSnapshot, now: Instant) {
        match intent {
            UiIntent::RenderFull => self.render_full(snapshot, now),
            UiIntent::Persist => {}
            UiIntent::Toast(toast) => {
                self.push_toast(toast, now);
            }
            UiIntent::HitMarker => self.show_hit_marker(now),
            UiIntent::ReloadAvatar(path) => self.surface.reload_avatar(&path),
        }
    }

    pub fn render_full(&mut self, snapshot: &PlayerSnapshot, now: Instant) {
        self.render_health(snapshot, now);
        self.render_body_parts(snapshot);
        self.render_stats(snapshot);
        self.render_weight(snapshot);
        self.render_location(snapshot.location);
        self.render_position(snapshot);
        self.render_weapon(HandSlot::Primary, snapshot.equipment.slot(Hand::Primary));
        self.render_weapon(HandSlot::Secondary, snapshot.equipment.slot(Hand::Secondary));
    }

    fn render_health(&mut self, snapshot: &PlayerSnapshot, now: Instant) {
        let Some(health) = snapshot.health else {
            return;
        };
        let widget = Widget::HealthBar;
        self.surface.set_fill(&widget, (health / 100.0) as f32);
        if let Some(display) = snapshot.display_health() {
            self.surface.set_text(&widget, &format!("{display}%"));
        }
        self.surface.set_visual(
            &widget,
            Visual::LowHealth,
            health < self.health.low_health_threshold,
        );

        if let Some(previous) = self.last_health {
            if health < previous {
                // A new drop restarts the flash instead of queueing another.
                self.flash_until =
                    Some(now + Duration::from_millis(self.health.damage_flash_ms.max(1)));
                self.surface.set_visual(&widget, Visual::DamageFlash, true);
                trace!(previous, health, "damage flash");
            }
        }
        self.last_health = Some(health);
    }

    fn render_body_parts(&mut self, snapshot: &PlayerSnapshot) {
        for part in BodyPart::ALL {
            let Some(value) = snapshot.body_part_health.get(&part) else {
                continue;
            };
            let widget = Widget::BodyPart(part);
            self.surface.set_fill(&widget, (*value / 100.0) as f32);
            self.surface.set_text(
                &widget,
                &format!("{} {}%", part.label(), value.round() as u32),
            );
            self.surface.set_visual(
                &widget,
                Visual::Damaged,
                *value < self.health.body_part_damage_threshold,
            );
        }
    }

    fn render_stats(&mut self, snapshot: &PlayerSnapshot) {
        for (name, value) in &snapshot.health_stats {
            let widget = Widget::Stat(name.clone());
            let ratio = value.clamp(0.0, 1.0);
            self.surface.set_fill(&widget, ratio as f32);
            self.surface.set_text(
                &widget,
                &format!("{} {}%", stat_label(name), (ratio * 100.0).round() as u32),
            );
        }
    }

    fn render_weight(&mut self, snapshot: &PlayerSnapshot) {
        let widget = Widget::WeightBar;
        match snapshot.weight {
            Some(weight) if weight.is_renderable() => {
                self.surface.set_visual(&widget, Visual::Hidden, false);
                self.surface.set_fill(&widget, weight.fill_ratio());
                self.surface.set_text(
                    &widget,
                    &format!("{:.1} / {:.1}", weight.current, weight.max),
                );
            }
            _ => self.surface.set_visual(&widget, Visual::Hidden, true),
        }
    }

    fn render_location(&mut self, location: Option<Location>) {
        let Some(location) = location else {
            return;
        };
        let widget = Widget::Location;
        self.surface
            .set_visual(&widget, Visual::Outside, location == Location::Outside);
        self.surface.set_text(&widget, location.label());
    }

    fn render_position(&mut self, snapshot: &PlayerSnapshot) {
        if let Some(label) = snapshot.position.and_then(|position| position.label()) {
            self.surface.set_text(&Widget::Position, &label);
        }
    }

    fn render_weapon(&mut self, slot: HandSlot, item: Option<&Item>) {
        let widget = Widget::WeaponSlot(slot);
        match item {
            Some(item) => {
                let texture = item.texture_ref.as_deref().unwrap_or(item.name.as_str());
                let style = self.sprites.resolve(texture);
                self.surface.mount_icon(&widget, &Icon::Sprite(style));
                self.surface.set_text(&widget, &item.name);
                self.surface.set_visual(&widget, Visual::Empty, false);
            }
            None => {
                let style = self.sprites.default_style();
                self.surface.mount_icon(&widget, &Icon::Sprite(style));
                self.surface.set_text(&widget, "Empty");
                self.surface.set_visual(&widget, Visual::Empty, true);
            }
        }
    }

    pub fn render_connection(&mut self, status: ConnectionStatus) {
        let widget = Widget::Connection;
        let disconnected = status != ConnectionStatus::Open;
        self.surface
            .set_visual(&widget, Visual::Disconnected, disconnected);
        self.surface
            .set_text(&widget, if disconnected { "DISCONNECTED" } else { "" });
    }

    pub fn show_hit_marker(&mut self, now: Instant) {
        self.hit_until = Some(now + Duration::from_millis(self.health.hit_marker_ms.max(1)));
        self.surface
            .set_visual(&Widget::HitMarker, Visual::Active, true);
    }

    pub fn push_toast(&mut self, intent: ToastIntent, now: Instant) -> ToastId {
        let max_visible = self.toasts.max_visible.max(1);
        let mut showing = self
            .active_toasts
            .iter()
            .filter(|toast| !toast.exiting())
            .count();
        for toast in self.active_toasts.iter_mut() {
            if showing < max_visible {
                break;
            }
            if !toast.exiting() {
                start_exit(&mut self.surface, toast, now, self.toasts.exit_ms);
                showing -= 1;
            }
        }
        // Only one toast may be on its way out; older exits are cut short.
        while self.active_toasts.len() > max_visible {
            let Some(index) = self.active_toasts.iter().position(ActiveToast::exiting) else {
                break;
            };
            if let Some(dropped) = self.active_toasts.remove(index) {
                self.surface.release(&Widget::Toast(dropped.id));
            }
        }

        let id = self.next_toast_id;
        self.next_toast_id += 1;
        let hold_ms = match intent.category {
            ToastCategory::LevelUp => self.toasts.level_up_duration_ms,
            _ => self.toasts.duration_ms,
        };
        let hide_at = now + Duration::from_millis(hold_ms);
        let widget = Widget::Toast(id);
        trace!(id, spawned = %intent.spawn_time, category = ?intent.category, "toast");
        self.surface.set_text(&widget, &intent.message);
        self.surface.mount_icon(&widget, &Icon::from(intent.icon));
        self.surface
            .set_visual(&widget, Visual::from(intent.category), true);
        self.active_toasts.push_back(ActiveToast {
            id,
            hide_at,
            gone_at: hide_at + Duration::from_millis(self.toasts.exit_ms),
            exit_from: None,
        });
        id
    }

    /// Advances every deadline the driver owns.
    pub fn tick(&mut self, now: Instant) {
        if self.flash_until.is_some_and(|until| now >= until) {
            self.flash_until = None;
            self.surface
                .set_visual(&Widget::HealthBar, Visual::DamageFlash, false);
        }
        if self.hit_until.is_some_and(|until| now >= until) {
            self.hit_until = None;
            self.surface
                .set_visual(&Widget::HitMarker, Visual::Active, false);
        }

        let exit_ms = self.toasts.exit_ms;
        for toast in self.active_toasts.iter_mut() {
            if !toast.exiting() && now >= toast.hide_at {
                start_exit(&mut self.surface, toast, now, exit_ms);
            }
        }
        let surface = &mut self.surface;
        self.active_toasts.retain(|toast| {
            if !toast.exiting() {
                return true;
            }
            if now >= toast.gone_at {
                surface.release(&Widget::Toast(toast.id));
                return false;
            }
            surface.set_fill(&Widget::Toast(toast.id), toast.exit_progress(now));
            true
        });
    }

    /// Clears every outstanding timer and releases transient widgets.
    pub fn teardown(&mut self) {
        if self.flash_until.take().is_some() {
            self.surface
                .set_visual(&Widget::HealthBar, Visual::DamageFlash, false);
        }
        if self.hit_until.take().is_some() {
            self.surface
                .set_visual(&Widget::HitMarker, Visual::Active, false);
        }
        for toast in self.active_toasts.drain(..) {
            self.surface.release(&Widget::Toast(toast.id));
        }
    }
}

/// The toast's fill carries its exit progress from here on.
fn start_exit<S: HudSurface>(surface: &mut S, toast: &mut ActiveToast, now: Instant, exit_ms: u64) {
    toast.exit_from = Some(now);
    toast.gone_at = toast
        .gone_at
        .min(now + Duration::from_millis(exit_ms));
    let widget = Widget::Toast(toast.id);
    surface.set_visual(&widget, Visual::Exiting, true);
    surface.set_fill(&widget, 0.0);
}

/// `wetness` -> `Wetness`, `foodSicknessLevel` -> `Food Sickness Level`.
pub fn stat_label(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for (index, ch) in name.chars().enumerate() {
        if ch == '_' {
            out.push(' ');
            prev_lower = false;
            continue;
        }
        if ch.is_ascii_uppercase() && prev_lower {
            out.push(' ');
        }
        prev_lower = ch.is_ascii_lowercase();
        if index == 0 || out.ends_with(' ') {
            out.extend(ch.to_uppercase());
        } else {
            out.push(ch);
        }
    }
    out
}
