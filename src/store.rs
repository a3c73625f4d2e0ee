use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::snapshot::{BodyPart, Equipment, Item, Location, PlayerSnapshot, Weight};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedWeapons {
    pub primary: Option<Item>,
    pub secondary: Option<Item>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedHud {
    pub health: Option<f64>,
    pub weight: Option<Weight>,
    pub location: Option<Location>,
    #[serde(default)]
    pub weapons: PersistedWeapons,
    #[serde(default)]
    pub body_parts: BTreeMap<BodyPart, f64>,
    #[serde(default)]
    pub health_stats: BTreeMap<String, f64>,
    pub last_updated: DateTime<Utc>,
}

impl PersistedHud {
    pub fn from_snapshot(snapshot: &PlayerSnapshot, written_at: DateTime<Utc>) -> Self {
        Self {
            health: snapshot.health,
            weight: snapshot.weight,
            location: snapshot.location,
            weapons: PersistedWeapons {
                primary: snapshot.equipment.primary.clone(),
                secondary: snapshot.equipment.secondary.clone(),
            },
            body_parts: snapshot.body_part_health.clone(),
            health_stats: snapshot.health_stats.clone(),
            last_updated: written_at,
        }
    }

    pub fn into_snapshot(self) -> PlayerSnapshot {
        PlayerSnapshot {
            health: self.health,
            body_part_health: self.body_parts,
            health_stats: self.health_stats,
            weight: self.weight,
            location: self.location,
            equipment: Equipment {
                primary: self.weapons.primary,
                secondary: self.weapons.secondary,
            },
            position: None,
            last_updated: Some(self.last_updated),
        }
    }
}

/// Write-through cache of the last reconciled HUD state.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    max_age: Duration,
}

impl StateStore {
    pub fn new(path: PathBuf, max_age: Duration) -> Self {
        Self { path, max_age }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, snapshot: &PlayerSnapshot, now: DateTime<Utc>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed creating state dir at {}", parent.display()))?;
        }
        let persisted = PersistedHud::from_snapshot(snapshot, now);
        let payload =
            serde_json::to_string_pretty(&persisted).context("failed serializing hud state")?;
        fs::write(&self.path, payload)
            .with_context(|| format!("failed writing hud state at {}", self.path.display()))?;
        Ok(())
    }

    /// Returns the stored snapshot unless it is missing, unreadable or older than
    /// the age ceiling. Stale and corrupt blobs are purged.
    pub fn load(&self, now: DateTime<Utc>) -> Option<PlayerSnapshot> {
        if !self.path.exists() {
            return None;
        }
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) => {
                warn!(?err, path = %self.path.display(), "failed reading hud state");
                return None;
            }
        };
        let persisted = match serde_json::from_str::<PersistedHud>(&text) {
            Ok(persisted) => persisted,
            Err(err) => {
                warn!(?err, path = %self.path.display(), "discarding corrupt hud state");
                self.purge();
                return None;
            }
        };

        let age = now.signed_duration_since(persisted.last_updated);
        let expired = age
            .to_std()
            .map(|age| age > self.max_age)
            .unwrap_or(false);
        if expired {
            debug!(age_secs = age.num_seconds(), "hud state expired");
            self.purge();
            return None;
        }
        Some(persisted.into_snapshot())
    }

    pub fn purge(&self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(?err, path = %self.path.display(), "failed removing hud state");
            }
        }
    }
}
