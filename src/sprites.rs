use std::{collections::HashMap, fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SpriteConfig;

const DEFAULT_CELL: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpriteFit {
    Contain,
    Exact,
}

/// Where to find a texture: sheet image plus pixel region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpriteStyle {
    pub sheet: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub fit: SpriteFit,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AtlasEntry {
    pub sheet: String,
    #[serde(default)]
    pub x: u32,
    #[serde(default)]
    pub y: u32,
    #[serde(default = "default_cell")]
    pub width: u32,
    #[serde(default = "default_cell")]
    pub height: u32,
}

fn default_cell() -> u32 {
    DEFAULT_CELL
}

#[derive(Debug, Clone, Default)]
pub struct SpriteAtlas {
    entries: HashMap<String, AtlasEntry>,
}

impl SpriteAtlas {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let entries = serde_json::from_str::<HashMap<String, AtlasEntry>>(text)
            .context("invalid sprite atlas json")?;
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed reading sprite atlas at {}", path.display()))?;
        Self::from_json_str(&text)
            .with_context(|| format!("failed parsing sprite atlas at {}", path.display()))
    }

    /// A missing or broken atlas degrades to an empty one; every lookup then
    /// resolves to the default style.
    pub fn load_or_empty(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match Self::load(path) {
            Ok(atlas) => {
                info!(path = %path.display(), entries = atlas.len(), "loaded sprite atlas");
                atlas
            }
            Err(err) => {
                warn!(?err, path = %path.display(), "sprite atlas unavailable; using defaults");
                Self::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, name: &str) -> Option<&AtlasEntry> {
        self.entries.get(name)
    }

    #[cfg(test)]
    pub fn insert(&mut self, name: impl Into<String>, entry: AtlasEntry) {
        self.entries.insert(name.into(), entry);
    }
}

/// Identifiers the game has renamed across versions.
const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("Item_Axe", "Item_FireAxe"),
    ("Item_BaseballBatNails", "Item_BaseballBat_Nails"),
    ("Item_Hammer", "Item_ClawHammer"),
    ("Item_KitchenKnife", "Item_Knife"),
    ("Item_Pistol", "Item_Pistol1"),
    ("Item_Shotgun", "Item_Shotgun1"),
    ("Item_Flashlight", "Item_Torch"),
];

#[derive(Debug, Clone)]
pub struct SpriteResolver {
    atlas: SpriteAtlas,
    aliases: HashMap<String, String>,
    sheets: HashMap<String, String>,
    default_sheet: String,
}

impl SpriteResolver {
    pub fn new(config: &SpriteConfig, atlas: SpriteAtlas) -> Self {
        let mut aliases: HashMap<String, String> = BUILTIN_ALIASES
            .iter()
            .map(|(from, to)| ((*from).to_owned(), (*to).to_owned()))
            .collect();
        aliases.extend(config.texture_aliases.clone());
        Self {
            atlas,
            aliases,
            sheets: config.sheets.clone(),
            default_sheet: config.default_sheet.clone(),
        }
    }

    pub fn from_config(config: &SpriteConfig) -> Self {
        let atlas = SpriteAtlas::load_or_empty(config.atlas_path.as_deref());
        Self::new(config, atlas)
    }

    pub fn default_style(&self) -> SpriteStyle {
        SpriteStyle {
            sheet: self.sheet_path(&self.default_sheet),
            x: 0,
            y: 0,
            width: DEFAULT_CELL,
            height: DEFAULT_CELL,
            fit: SpriteFit::Contain,
        }
    }

    pub fn resolve(&self, texture_id: &str) -> SpriteStyle {
        let candidates = self.candidate_names(texture_id);
        let Some(entry) = candidates.iter().find_map(|name| self.atlas.get(name)) else {
            debug!(texture = %texture_id, "no atlas entry; using default sprite");
            return self.default_style();
        };
        SpriteStyle {
            sheet: self.sheet_path(&entry.sheet),
            x: entry.x,
            y: entry.y,
            width: entry.width.max(1),
            height: entry.height.max(1),
            fit: SpriteFit::Exact,
        }
    }

    fn sheet_path(&self, key: &str) -> String {
        self.sheets
            .get(key)
            .or_else(|| self.sheets.get(&self.default_sheet))
            .cloned()
            .unwrap_or_else(|| self.default_sheet.clone())
    }

    /// Normalised id, its alias (if any), then the `Item_`-prefixed spelling.
    fn candidate_names(&self, texture_id: &str) -> Vec<String> {
        let base = normalize_texture_id(texture_id);
        if base.is_empty() {
            return Vec::new();
        }
        let mut names = Vec::with_capacity(3);
        if let Some(alias) = self.aliases.get(&base) {
            names.push(alias.clone());
        }
        names.push(base.clone());
        if !base.starts_with("Item_") {
            let prefixed = format!("Item_{base}");
            if let Some(alias) = self.aliases.get(&prefixed) {
                names.push(alias.clone());
            }
            names.push(prefixed);
        }
        names
    }
}

/// Strips directories and image extensions: `media/textures/Item_Axe.png` -> `Item_Axe`.
fn normalize_texture_id(texture_id: &str) -> String {
    let trimmed = texture_id.trim();
    let file = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    let stem = file
        .strip_suffix(".png")
        .or_else(|| file.strip_suffix(".PNG"))
        .unwrap_or(file);
    stem.to_owned()
}
