use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::Path,
};

use eframe::egui::{
    self, pos2, vec2, Align2, Color32, FontId, Painter, Pos2, Rect, Sense, Stroke, StrokeKind,
    TextureHandle, TextureOptions,
};
use tracing::{debug, info, warn};

use crate::{
    animator::MouthFrame,
    config::OverlayWindowConfig,
    presentation::{HandSlot, HudSurface, Icon, Visual, Widget},
    snapshot::BodyPart,
    sprites::{SpriteFit, SpriteStyle},
};

const PANEL_WIDTH: f32 = 260.0;
const BAR_HEIGHT: f32 = 18.0;
const AVATAR_SIZE: f32 = 96.0;
const SLOT_SIZE: f32 = 40.0;
const TOAST_WIDTH: f32 = 280.0;
const TOAST_HEIGHT: f32 = 36.0;

#[derive(Debug, Clone, Default)]
struct WidgetState {
    fill: Option<f32>,
    text: Option<String>,
    visuals: BTreeSet<Visual>,
    icon: Option<Icon>,
}

impl WidgetState {
    fn has(&self, visual: Visual) -> bool {
        self.visuals.contains(&visual)
    }
}

/// Retained widget state painted by egui each frame.
pub struct EguiSurface {
    widgets: BTreeMap<Widget, WidgetState>,
    textures: HashMap<String, Option<TextureHandle>>,
    avatar_sheet: String,
    mouth: MouthFrame,
    scale: f32,
    opacity: f32,
    origin: Pos2,
}

impl EguiSurface {
    pub fn new(window: &OverlayWindowConfig, avatar_sheet: impl Into<String>) -> Self {
        Self {
            widgets: BTreeMap::new(),
            textures: HashMap::new(),
            avatar_sheet: avatar_sheet.into(),
            mouth: MouthFrame::Closed,
            scale: window.scale.clamp(0.25, 4.0),
            opacity: window.opacity.clamp(0.05, 1.0),
            origin: pos2(window.origin[0], window.origin[1]),
        }
    }

    pub fn set_mouth(&mut self, frame: MouthFrame) {
        self.mouth = frame;
    }

    fn state(&mut self, widget: &Widget) -> &mut WidgetState {
        self.widgets.entry(widget.clone()).or_default()
    }

    fn get(&self, widget: &Widget) -> Option<&WidgetState> {
        self.widgets.get(widget)
    }

    pub fn paint(&mut self, ctx: &egui::Context) {
        let time = ctx.input(|input| input.time);
        let origin = self.origin;
        egui::Area::new(egui::Id::new("zomboid_hud_panel"))
            .fixed_pos(origin)
            .interactable(false)
            .show(ctx, |ui| {
                let s = self.scale;
                let (rect, _) = ui.allocate_exact_size(vec2(PANEL_WIDTH * s, 520.0 * s), Sense::hover());
                let painter = ui.painter().clone();
                let mut cursor = rect.min;
                cursor = self.paint_connection(&painter, cursor);
                cursor = self.paint_avatar(ctx, &painter, cursor);
                cursor = self.paint_health(&painter, cursor, time);
                cursor = self.paint_body_parts(&painter, cursor);
                cursor = self.paint_stats(&painter, cursor);
                cursor = self.paint_weight(&painter, cursor);
                cursor = self.paint_location(&painter, cursor);
                self.paint_weapons(ctx, &painter, cursor);
            });
        self.paint_toasts(ctx);
        self.paint_hit_marker(ctx);
    }

    fn paint_connection(&self, painter: &Painter, cursor: Pos2) -> Pos2 {
        let Some(state) = self.get(&Widget::Connection) else {
            return cursor;
        };
        if !state.has(Visual::Disconnected) {
            return cursor;
        }
        let s = self.scale;
        let rect = Rect::from_min_size(cursor, vec2(PANEL_WIDTH * s, 22.0 * s));
        painter.rect_filled(rect, 4.0, self.tint(Color32::from_rgba_premultiplied(140, 30, 30, 220)));
        painter.text(
            rect.center(),
            Align2::CENTER_CENTER,
            state.text.as_deref().unwrap_or("DISCONNECTED"),
            FontId::proportional(13.0 * s),
            self.tint(Color32::WHITE),
        );
        pos2(cursor.x, rect.max.y + 6.0 * s)
    }

    fn paint_avatar(&mut self, ctx: &egui::Context, painter: &Painter, cursor: Pos2) -> Pos2 {
        let s = self.scale;
        let rect = Rect::from_min_size(cursor, vec2(AVATAR_SIZE * s, AVATAR_SIZE * s));
        let sheet = self.avatar_sheet.clone();
        if let Some(texture) = self.load_texture(ctx, &sheet) {
            let (col, row) = self.mouth.cell();
            let uv = Rect::from_min_size(
                pos2(col as f32 * 0.5, row as f32 * 0.5),
                vec2(0.5, 0.5),
            );
            painter.image(texture.id(), rect, uv, self.tint(Color32::WHITE));
        } else {
            painter.rect_filled(rect, 8.0, self.tint(Color32::from_rgba_premultiplied(20, 24, 20, 160)));
        }
        pos2(cursor.x, rect.max.y + 8.0 * s)
    }

    fn paint_health(&self, painter: &Painter, cursor: Pos2, time: f64) -> Pos2 {
        let Some(state) = self.get(&Widget::HealthBar) else {
            return cursor;
        };
        let s = self.scale;
        let rect = Rect::from_min_size(cursor, vec2(PANEL_WIDTH * s, BAR_HEIGHT * 1.4 * s));
        let mut fill = Color32::from_rgb(170, 40, 40);
        if state.has(Visual::LowHealth) {
            let pulse = ((time * 4.0).sin() * 0.5 + 0.5) as f32;
            fill = lerp_color(Color32::from_rgb(110, 10, 10), Color32::from_rgb(255, 60, 60), pulse);
        }
        self.bar(painter, rect, state.fill.unwrap_or(0.0), fill, state.text.as_deref());
        if state.has(Visual::DamageFlash) {
            painter.rect_filled(rect, 4.0, self.tint(Color32::from_rgba_premultiplied(255, 255, 255, 90)));
        }
        pos2(cursor.x, rect.max.y + 6.0 * s)
    }

    fn paint_body_parts(&self, painter: &Painter, cursor: Pos2) -> Pos2 {
        let s = self.scale;
        let cell = vec2((PANEL_WIDTH * s - 4.0 * s) / 2.0, BAR_HEIGHT * s);
        let mut bottom = cursor.y;
        for (index, part) in BodyPart::ALL.iter().enumerate() {
            let Some(state) = self.get(&Widget::BodyPart(*part)) else {
                continue;
            };
            let col = (index % 2) as f32;
            let row = (index / 2) as f32;
            let min = pos2(cursor.x + col * (cell.x + 4.0 * s), cursor.y + row * (cell.y + 3.0 * s));
            let rect = Rect::from_min_size(min, cell);
            let fill = if state.has(Visual::Damaged) {
                Color32::from_rgb(190, 110, 30)
            } else {
                Color32::from_rgb(60, 140, 70)
            };
            self.bar(painter, rect, state.fill.unwrap_or(0.0), fill, state.text.as_deref());
            bottom = bottom.max(rect.max.y);
        }
        pos2(cursor.x, bottom + 6.0 * s)
    }

    fn paint_stats(&self, painter: &Painter, cursor: Pos2) -> Pos2 {
        let s = self.scale;
        let mut y = cursor.y;
        for (widget, state) in &self.widgets {
            if !matches!(widget, Widget::Stat(_)) {
                continue;
            }
            let rect = Rect::from_min_size(pos2(cursor.x, y), vec2(PANEL_WIDTH * s, BAR_HEIGHT * 0.8 * s));
            self.bar(
                painter,
                rect,
                state.fill.unwrap_or(0.0),
                Color32::from_rgb(80, 110, 170),
                state.text.as_deref(),
            );
            y = rect.max.y + 3.0 * s;
        }
        pos2(cursor.x, y + 3.0 * s)
    }

    fn paint_weight(&self, painter: &Painter, cursor: Pos2) -> Pos2 {
        let Some(state) = self.get(&Widget::WeightBar) else {
            return cursor;
        };
        if state.has(Visual::Hidden) {
            return cursor;
        }
        let s = self.scale;
        let rect = Rect::from_min_size(cursor, vec2(PANEL_WIDTH * s, BAR_HEIGHT * s));
        let ratio = state.fill.unwrap_or(0.0);
        let fill = if ratio >= 1.0 {
            Color32::from_rgb(200, 70, 40)
        } else {
            Color32::from_rgb(150, 130, 70)
        };
        self.bar(painter, rect, ratio, fill, state.text.as_deref());
        pos2(cursor.x, rect.max.y + 6.0 * s)
    }

    fn paint_location(&self, painter: &Painter, cursor: Pos2) -> Pos2 {
        let s = self.scale;
        let position = self
            .get(&Widget::Position)
            .and_then(|state| state.text.as_deref());
        let Some(state) = self.get(&Widget::Location) else {
            let Some(position) = position else {
                return cursor;
            };
            self.paint_position(painter, pos2(cursor.x, cursor.y + 10.0 * s), position);
            return pos2(cursor.x, cursor.y + 26.0 * s);
        };
        let rect = Rect::from_min_size(cursor, vec2(90.0 * s, 20.0 * s));
        let fill = if state.has(Visual::Outside) {
            Color32::from_rgba_premultiplied(40, 100, 50, 200)
        } else {
            Color32::from_rgba_premultiplied(70, 60, 40, 200)
        };
        painter.rect_filled(rect, 10.0, self.tint(fill));
        painter.text(
            rect.center(),
            Align2::CENTER_CENTER,
            state.text.as_deref().unwrap_or_default(),
            FontId::proportional(12.0 * s),
            self.tint(Color32::WHITE),
        );
        if let Some(position) = position {
            self.paint_position(painter, pos2(rect.max.x + 8.0 * s, rect.center().y), position);
        }
        pos2(cursor.x, rect.max.y + 6.0 * s)
    }

    fn paint_position(&self, painter: &Painter, left_center: Pos2, label: &str) {
        painter.text(
            left_center,
            Align2::LEFT_CENTER,
            label,
            FontId::monospace(11.0 * self.scale),
            self.tint(Color32::from_rgb(190, 190, 170)),
        );
    }

    fn paint_weapons(&mut self, ctx: &egui::Context, painter: &Painter, cursor: Pos2) -> Pos2 {
        let s = self.scale;
        let mut y = cursor.y;
        for slot in [HandSlot::Primary, HandSlot::Secondary] {
            let widget = Widget::WeaponSlot(slot);
            let Some(state) = self.get(&widget).cloned() else {
                continue;
            };
            let frame = Rect::from_min_size(pos2(cursor.x, y), vec2(SLOT_SIZE * s, SLOT_SIZE * s));
            let alpha = if state.has(Visual::Empty) { 0.45 } else { 1.0 };
            painter.rect_filled(frame, 4.0, self.tint(Color32::from_rgba_premultiplied(10, 12, 10, 170)));
            painter.rect_stroke(
                frame,
                4.0,
                Stroke::new(1.0, self.tint(Color32::from_rgb(90, 90, 80))),
                StrokeKind::Inside,
            );
            if let Some(icon) = &state.icon {
                self.paint_icon(ctx, painter, frame.shrink(4.0 * s), icon, alpha);
            }
            painter.text(
                pos2(frame.max.x + 8.0 * s, frame.center().y),
                Align2::LEFT_CENTER,
                state.text.as_deref().unwrap_or_default(),
                FontId::proportional(13.0 * s),
                with_alpha(self.tint(Color32::WHITE), alpha),
            );
            y = frame.max.y + 4.0 * s;
        }
        pos2(cursor.x, y)
    }

    fn paint_toasts(&mut self, ctx: &egui::Context) {
        let toasts: Vec<(Widget, WidgetState)> = self
            .widgets
            .iter()
            .filter(|(widget, _)| matches!(widget, Widget::Toast(_)))
            .map(|(widget, state)| (widget.clone(), state.clone()))
            .collect();
        if toasts.is_empty() {
            return;
        }
        let s = self.scale;
        let painter = ctx.layer_painter(egui::LayerId::new(
            egui::Order::Foreground,
            egui::Id::new("zomboid_hud_toasts"),
        ));
        let screen = ctx.screen_rect();
        let mut y = screen.min.y + 24.0 * s;
        for (_, state) in toasts {
            let (alpha, slide) = toast_exit(&state);
            let rect = Rect::from_min_size(
                pos2(screen.max.x - (TOAST_WIDTH + 24.0) * s * (1.0 - slide), y),
                vec2(TOAST_WIDTH * s, TOAST_HEIGHT * s),
            );
            let accent = toast_accent(&state.visuals);
            painter.rect_filled(
                rect,
                6.0,
                with_alpha(self.tint(Color32::from_rgba_premultiplied(12, 14, 12, 210)), alpha),
            );
            painter.rect_stroke(
                rect,
                6.0,
                Stroke::new(1.5, with_alpha(self.tint(accent), alpha)),
                StrokeKind::Inside,
            );
            let icon_rect = Rect::from_min_size(
                rect.min + vec2(6.0 * s, 4.0 * s),
                vec2((TOAST_HEIGHT - 8.0) * s, (TOAST_HEIGHT - 8.0) * s),
            );
            if let Some(icon) = &state.icon {
                self.paint_icon(ctx, &painter, icon_rect, icon, alpha);
            }
            painter.text(
                pos2(icon_rect.max.x + 8.0 * s, rect.center().y),
                Align2::LEFT_CENTER,
                state.text.as_deref().unwrap_or_default(),
                FontId::proportional(14.0 * s),
                with_alpha(self.tint(Color32::WHITE), alpha),
            );
            y = rect.max.y + 6.0 * s;
        }
    }

    fn paint_hit_marker(&self, ctx: &egui::Context) {
        let active = self
            .get(&Widget::HitMarker)
            .is_some_and(|state| state.has(Visual::Active));
        if !active {
            return;
        }
        let painter = ctx.layer_painter(egui::LayerId::new(
            egui::Order::Foreground,
            egui::Id::new("zomboid_hud_hit_marker"),
        ));
        let center = ctx.screen_rect().center();
        let (inner, outer) = (6.0 * self.scale, 14.0 * self.scale);
        let stroke = Stroke::new(2.0, self.tint(Color32::WHITE));
        for (dx, dy) in [(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0), (1.0, 1.0)] {
            painter.line_segment(
                [
                    center + vec2(dx * inner, dy * inner),
                    center + vec2(dx * outer, dy * outer),
                ],
                stroke,
            );
        }
    }

    fn paint_icon(
        &mut self,
        ctx: &egui::Context,
        painter: &Painter,
        rect: Rect,
        icon: &Icon,
        alpha: f32,
    ) {
        match icon {
            Icon::Emoji(emoji) => {
                painter.text(
                    rect.center(),
                    Align2::CENTER_CENTER,
                    emoji,
                    FontId::proportional(rect.height() * 0.8),
                    with_alpha(self.tint(Color32::WHITE), alpha),
                );
            }
            Icon::Sprite(style) => {
                let Some(texture) = self.load_texture(ctx, &style.sheet) else {
                    return;
                };
                let sheet = texture.size_vec2();
                let (target, uv) = sprite_placement(rect, style, sheet.x, sheet.y);
                painter.image(
                    texture.id(),
                    target,
                    uv,
                    with_alpha(self.tint(Color32::WHITE), alpha),
                );
            }
        }
    }

    fn bar(&self, painter: &Painter, rect: Rect, ratio: f32, fill: Color32, label: Option<&str>) {
        painter.rect_filled(rect, 4.0, self.tint(Color32::from_rgba_premultiplied(8, 10, 8, 180)));
        let mut filled = rect;
        filled.set_width(rect.width() * ratio.clamp(0.0, 1.0));
        painter.rect_filled(filled, 4.0, self.tint(fill));
        painter.rect_stroke(
            rect,
            4.0,
            Stroke::new(1.0, self.tint(Color32::from_rgba_premultiplied(0, 0, 0, 200))),
            StrokeKind::Inside,
        );
        if let Some(label) = label {
            painter.text(
                rect.left_center() + vec2(6.0 * self.scale, 0.0),
                Align2::LEFT_CENTER,
                label,
                FontId::proportional(rect.height() * 0.65),
                self.tint(Color32::WHITE),
            );
        }
    }

    fn tint(&self, color: Color32) -> Color32 {
        with_alpha(color, self.opacity)
    }

    fn load_texture(&mut self, ctx: &egui::Context, path: &str) -> Option<TextureHandle> {
        if let Some(existing) = self.textures.get(path) {
            return existing.clone();
        }
        let texture = load_color_image(Path::new(path))
            .map(|image| ctx.load_texture(format!("sheet://{path}"), image, TextureOptions::LINEAR));
        if texture.is_none() {
            warn!(path, "sprite sheet unavailable");
        }
        self.textures.insert(path.to_owned(), texture.clone());
        texture
    }
}

impl HudSurface for EguiSurface {
    fn set_fill(&mut self, widget: &Widget, ratio: f32) {
        self.state(widget).fill = Some(ratio.clamp(0.0, 1.0));
    }

    fn set_text(&mut self, widget: &Widget, text: &str) {
        self.state(widget).text = Some(text.to_owned());
    }

    fn set_visual(&mut self, widget: &Widget, visual: Visual, on: bool) {
        let state = self.state(widget);
        if on {
            state.visuals.insert(visual);
        } else {
            state.visuals.remove(&visual);
        }
    }

    fn mount_icon(&mut self, widget: &Widget, icon: &Icon) {
        self.state(widget).icon = Some(icon.clone());
    }

    fn unmount_icon(&mut self, widget: &Widget) {
        self.state(widget).icon = None;
    }

    fn release(&mut self, widget: &Widget) {
        self.widgets.remove(widget);
    }

    /// Points the avatar at a new sheet and drops any cached copy of the old one.
    fn reload_avatar(&mut self, path: &str) {
        self.textures.remove(&self.avatar_sheet);
        self.textures.remove(path);
        self.avatar_sheet = path.to_owned();
        info!(path, "avatar sheet reloaded");
    }
}

/// Headless target: reports changes through the log instead of painting.
#[derive(Debug, Default)]
pub struct LogSurface {
    texts: HashMap<Widget, String>,
}

impl HudSurface for LogSurface {
    fn set_fill(&mut self, _widget: &Widget, _ratio: f32) {}

    fn set_text(&mut self, widget: &Widget, text: &str) {
        if self.texts.get(widget).map(String::as_str) == Some(text) {
            return;
        }
        info!(widget = ?widget, text, "hud");
        self.texts.insert(widget.clone(), text.to_owned());
    }

    fn set_visual(&mut self, widget: &Widget, visual: Visual, on: bool) {
        debug!(widget = ?widget, ?visual, on, "hud visual");
    }

    fn mount_icon(&mut self, _widget: &Widget, _icon: &Icon) {}

    fn unmount_icon(&mut self, _widget: &Widget) {}

    fn release(&mut self, widget: &Widget) {
        self.texts.remove(widget);
    }
}

/// Target rect and uv for a sprite region. `Contain` keeps the region's aspect
/// ratio centred inside `rect`; `Exact` stretches it over `rect`.
fn sprite_placement(rect: Rect, style: &SpriteStyle, sheet_w: f32, sheet_h: f32) -> (Rect, Rect) {
    let (sheet_w, sheet_h) = (sheet_w.max(1.0), sheet_h.max(1.0));
    let uv = Rect::from_min_max(
        pos2(style.x as f32 / sheet_w, style.y as f32 / sheet_h),
        pos2(
            ((style.x + style.width) as f32 / sheet_w).min(1.0),
            ((style.y + style.height) as f32 / sheet_h).min(1.0),
        ),
    );
    let target = match style.fit {
        SpriteFit::Exact => rect,
        SpriteFit::Contain => {
            let aspect = style.width.max(1) as f32 / style.height.max(1) as f32;
            let size = if rect.width() / rect.height().max(f32::EPSILON) > aspect {
                vec2(rect.height() * aspect, rect.height())
            } else {
                vec2(rect.width(), rect.width() / aspect)
            };
            Rect::from_center_size(rect.center(), size)
        }
    };
    (target, uv)
}

/// Opacity and slide fraction for a toast. An exiting toast's fill is its
/// exit progress: it fades out while sliding off the right edge.
fn toast_exit(state: &WidgetState) -> (f32, f32) {
    if !state.has(Visual::Exiting) {
        return (1.0, 0.0);
    }
    let progress = state.fill.unwrap_or(0.0).clamp(0.0, 1.0);
    (1.0 - progress, progress)
}

fn toast_accent(visuals: &BTreeSet<Visual>) -> Color32 {
    if visuals.contains(&Visual::LevelUp) {
        Color32::from_rgb(240, 200, 60)
    } else if visuals.contains(&Visual::Kill) {
        Color32::from_rgb(200, 50, 50)
    } else if visuals.contains(&Visual::Item) {
        Color32::from_rgb(90, 160, 220)
    } else {
        Color32::from_rgb(110, 200, 110)
    }
}

fn load_color_image(path: &Path) -> Option<egui::ColorImage> {
    let img = image::open(path).ok()?.to_rgba8();
    let size = [
        usize::try_from(img.width()).ok()?,
        usize::try_from(img.height()).ok()?,
    ];
    let pixels = img.into_raw();
    Some(egui::ColorImage::from_rgba_unmultiplied(size, &pixels))
}

fn with_alpha(color: Color32, multiplier: f32) -> Color32 {
    let alpha = ((color.a() as f32) * multiplier).clamp(0.0, 255.0) as u8;
    Color32::from_rgba_premultiplied(color.r(), color.g(), color.b(), alpha)
}

fn lerp_color(from: Color32, to: Color32, t: f32) -> Color32 {
    let t = t.clamp(0.0, 1.0);
    let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
    Color32::from_rgb(mix(from.r(), to.r()), mix(from.g(), to.g()), mix(from.b(), to.b()))
}

#[cfg(test)]
mod tests {
    use eframe::egui::{pos2, vec2, Rect};

    use super::{sprite_placement, toast_exit, EguiSurface, Visual, Widget};
    use crate::{
        config::OverlayWindowConfig,
        presentation::HudSurface,
        sprites::{SpriteFit, SpriteStyle},
    };

    fn style(width: u32, height: u32, fit: SpriteFit) -> SpriteStyle {
        SpriteStyle {
            sheet: "sheet.png".to_owned(),
            x: 32,
            y: 0,
            width,
            height,
            fit,
        }
    }

    #[test]
    fn contain_fit_keeps_aspect_inside_target() {
        let rect = Rect::from_min_size(pos2(0.0, 0.0), vec2(40.0, 40.0));
        let (target, uv) = sprite_placement(rect, &style(32, 16, SpriteFit::Contain), 64.0, 32.0);
        assert_eq!(target.size(), vec2(40.0, 20.0));
        assert_eq!(target.center(), rect.center());
        assert_eq!(uv, Rect::from_min_max(pos2(0.5, 0.0), pos2(1.0, 0.5)));
    }

    #[test]
    fn exact_fit_fills_target() {
        let rect = Rect::from_min_size(pos2(10.0, 10.0), vec2(24.0, 48.0));
        let (target, _) = sprite_placement(rect, &style(32, 32, SpriteFit::Exact), 64.0, 64.0);
        assert_eq!(target, rect);
    }

    #[test]
    fn released_widgets_drop_all_state() {
        let mut surface = EguiSurface::new(&OverlayWindowConfig::default(), "avatar.png");
        let toast = Widget::Toast(3);
        surface.set_text(&toast, "+5 Axe XP");
        surface.set_visual(&toast, Visual::Exiting, true);
        assert!(surface.get(&toast).is_some_and(|state| state.has(Visual::Exiting)));
        surface.release(&toast);
        assert!(surface.get(&toast).is_none());
    }

    #[test]
    fn exiting_toast_fades_and_slides_with_progress() {
        let mut surface = EguiSurface::new(&OverlayWindowConfig::default(), "avatar.png");
        let toast = Widget::Toast(9);
        surface.set_text(&toast, "Zombie killed with Axe");
        let settled = surface.get(&toast).cloned().expect("toast state");
        assert_eq!(toast_exit(&settled), (1.0, 0.0));

        surface.set_visual(&toast, Visual::Exiting, true);
        surface.set_fill(&toast, 0.25);
        let leaving = surface.get(&toast).cloned().expect("toast state");
        assert_eq!(toast_exit(&leaving), (0.75, 0.25));
    }
}
