use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub endpoint: String,
    pub reconnect_floor_ms: u64,
    pub reconnect_ceiling_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8080".to_owned(),
            reconnect_floor_ms: 1_000,
            reconnect_ceiling_ms: 30_000,
        }
    }
}

impl TransportConfig {
    pub fn reconnect_floor(&self) -> Duration {
        Duration::from_millis(self.reconnect_floor_ms.max(1))
    }

    pub fn reconnect_ceiling(&self) -> Duration {
        Duration::from_millis(self.reconnect_ceiling_ms.max(self.reconnect_floor_ms.max(1)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToastConfig {
    pub duration_ms: u64,
    pub level_up_duration_ms: u64,
    pub exit_ms: u64,
    pub max_visible: usize,
}

impl Default for ToastConfig {
    fn default() -> Self {
        Self {
            duration_ms: 3_000,
            level_up_duration_ms: 5_000,
            exit_ms: 300,
            max_visible: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XpConfig {
    pub min_amount: f64,
    pub frequent_perks: Vec<String>,
    pub frequent_threshold: f64,
}

impl Default for XpConfig {
    fn default() -> Self {
        Self {
            min_amount: 1.0,
            frequent_perks: vec![
                "Sprinting".to_owned(),
                "Fitness".to_owned(),
                "Strength".to_owned(),
                "Lightfoot".to_owned(),
                "Nimble".to_owned(),
                "Sneak".to_owned(),
            ],
            frequent_threshold: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub low_health_threshold: f64,
    pub damage_flash_ms: u64,
    pub hit_marker_ms: u64,
    /// Cells below this percentage render as damaged.
    pub body_part_damage_threshold: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            low_health_threshold: 25.0,
            damage_flash_ms: 400,
            hit_marker_ms: 150,
            body_part_damage_threshold: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
    pub max_age_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_age_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpriteConfig {
    pub atlas_path: Option<PathBuf>,
    pub sheets: HashMap<String, String>,
    pub default_sheet: String,
    pub texture_aliases: HashMap<String, String>,
}

impl Default for SpriteConfig {
    fn default() -> Self {
        let mut sheets = HashMap::new();
        sheets.insert("ui".to_owned(), "assets/sprites/ui.png".to_owned());
        sheets.insert("items".to_owned(), "assets/sprites/items.png".to_owned());
        Self {
            atlas_path: Some(PathBuf::from("assets/sprites/atlas.json")),
            sheets,
            default_sheet: "ui".to_owned(),
            texture_aliases: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimatorConfig {
    pub enabled: bool,
    pub sheet_path: String,
    pub talking_threshold: f32,
    pub loud_multiplier: f32,
    pub frame_interval_ms: u64,
    pub sustain_ms: u64,
    /// Relative band around the previous sample that still counts as the same sound.
    pub sustain_tolerance: f32,
    pub idle_after_ms: u64,
    pub idle_interval_ms: u64,
    pub smirk_chance: f64,
    pub smirk_ms: u64,
}

impl Default for AnimatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sheet_path: "assets/sprite_sheet.png".to_owned(),
            talking_threshold: 12.0,
            loud_multiplier: 2.0,
            frame_interval_ms: 120,
            sustain_ms: 250,
            sustain_tolerance: 0.15,
            idle_after_ms: 10_000,
            idle_interval_ms: 2_000,
            smirk_chance: 0.05,
            smirk_ms: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayWindowConfig {
    pub scale: f32,
    pub opacity: f32,
    pub origin: [f32; 2],
}

impl Default for OverlayWindowConfig {
    fn default() -> Self {
        Self {
            scale: 1.0,
            opacity: 0.92,
            origin: [24.0, 24.0],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HudConfig {
    pub transport: TransportConfig,
    pub toasts: ToastConfig,
    pub xp: XpConfig,
    pub health: HealthConfig,
    pub store: StoreConfig,
    pub sprites: SpriteConfig,
    pub animator: AnimatorConfig,
    pub ingest_bind: Option<String>,
    pub overlay: OverlayWindowConfig,
}

impl Default for HudConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            toasts: ToastConfig::default(),
            xp: XpConfig::default(),
            health: HealthConfig::default(),
            store: StoreConfig::default(),
            sprites: SpriteConfig::default(),
            animator: AnimatorConfig::default(),
            ingest_bind: None,
            overlay: OverlayWindowConfig::default(),
        }
    }
}

impl HudConfig {
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("unable to locate OS config directory")?
            .join("zomboid-hud");
        Ok(config_dir.join("config.json"))
    }

    pub fn load_or_create(path: Option<&Path>) -> Result<(Self, PathBuf)> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed creating config dir at {}", parent.display()))?;
        }

        if !config_path.exists() {
            let default = Self::default();
            default.save(&config_path)?;
            return Ok((default, config_path));
        }

        let text = fs::read_to_string(&config_path)
            .with_context(|| format!("failed reading {}", config_path.display()))?;
        let config = serde_json::from_str::<Self>(&text)
            .with_context(|| format!("invalid json in {}", config_path.display()))?;
        Ok((config, config_path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let payload = serde_json::to_string_pretty(self).context("failed serializing config")?;
        fs::write(path, payload).with_context(|| format!("failed writing {}", path.display()))?;
        Ok(())
    }

    pub fn state_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.store.path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_local_dir()
            .context("unable to locate OS data directory")?
            .join("zomboid-hud");
        Ok(data_dir.join("hud_state.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::HudConfig;

    #[test]
    fn parses_partial_config_with_defaults() {
        let raw = r#"{
            "transport": { "endpoint": "ws://127.0.0.1:9000" },
            "xp": { "frequent_threshold": 10 }
        }"#;
        let parsed: HudConfig = serde_json::from_str(raw).expect("config should parse");
        assert_eq!(parsed.transport.endpoint, "ws://127.0.0.1:9000");
        assert_eq!(parsed.transport.reconnect_floor_ms, 1_000);
        assert_eq!(parsed.xp.frequent_threshold, 10.0);
        assert_eq!(parsed.xp.min_amount, 1.0);
        assert!(parsed.xp.frequent_perks.iter().any(|perk| perk == "Sprinting"));
        assert_eq!(parsed.toasts.duration_ms, 3_000);
        assert_eq!(parsed.store.max_age_secs, 300);
        assert_eq!(parsed.health.body_part_damage_threshold, 50.0);
        assert!(parsed.ingest_bind.is_none());
    }

    #[test]
    fn reconnect_ceiling_never_drops_below_floor() {
        let mut config = HudConfig::default();
        config.transport.reconnect_floor_ms = 5_000;
        config.transport.reconnect_ceiling_ms = 100;
        assert_eq!(
            config.transport.reconnect_ceiling(),
            config.transport.reconnect_floor()
        );
    }

    #[test]
    fn load_or_create_writes_defaults_then_reads_them_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.json");

        let (created, created_path) =
            HudConfig::load_or_create(Some(&path)).expect("should create config");
        assert_eq!(created_path, path);
        assert!(path.exists());

        let (loaded, _) = HudConfig::load_or_create(Some(&path)).expect("should load config");
        assert_eq!(loaded.transport.endpoint, created.transport.endpoint);
        assert_eq!(loaded.sprites.default_sheet, "ui");
    }
}
