//! Configuration management

use crate::models::LastSelection;
use crate::player::OverlayConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_USER_AGENT: &str = "SeriesPlayer/0.1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Catalog locations tried in order: URLs or file paths
    #[serde(default = "default_catalog_sources")]
    pub catalog_sources: Vec<String>,
    /// Series shown on the page
    #[serde(default)]
    pub series_id: String,
    /// Command used for links the built-in player can't handle
    #[serde(default = "default_external_player")]
    pub external_player: String,
    #[serde(default = "default_grid_columns")]
    pub grid_columns: usize,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_manifest_timeout")]
    pub manifest_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub dark_mode: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_catalog_sources() -> Vec<String> {
    vec!["data/catalog.json".to_string(), "catalog.json".to_string()]
}
fn default_external_player() -> String { "mpv".to_string() }
fn default_grid_columns() -> usize { 4 }
fn default_retention_days() -> i64 { crate::progress::DEFAULT_RETENTION_DAYS }
fn default_manifest_timeout() -> u64 { 8 }
fn default_true() -> bool { true }
fn default_user_agent() -> String { DEFAULT_USER_AGENT.to_string() }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            catalog_sources: default_catalog_sources(),
            series_id: String::new(),
            external_player: default_external_player(),
            grid_columns: default_grid_columns(),
            retention_days: default_retention_days(),
            manifest_timeout_secs: default_manifest_timeout(),
            dark_mode: true,
            user_agent: default_user_agent(),
        }
    }
}

/// `<config dir>/series_player`, created on first use
pub fn app_dir() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("series_player");
    if let Err(e) = fs::create_dir_all(&path) {
        warn!(path = %path.display(), error = %e, "could not create config directory");
    }
    path
}

impl AppConfig {
    fn config_path() -> PathBuf {
        app_dir().join("config.json")
    }

    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path).map(|content| serde_json::from_str::<AppConfig>(&content)) {
                Ok(Ok(config)) => return config.sanitized(),
                Ok(Err(e)) => warn!(path = %path.display(), error = %e, "invalid config, using defaults"),
                Err(e) => warn!(path = %path.display(), error = %e, "could not read config"),
            }
        }

        Self::default()
    }

    pub fn save(&self) {
        self.save_to(&Self::config_path());
    }

    pub fn save_to(&self, path: &Path) {
        if let Ok(content) = serde_json::to_string_pretty(self) {
            if let Err(e) = fs::write(path, content) {
                warn!(path = %path.display(), error = %e, "could not save config");
            }
        }
    }

    /// Clamp values that would make the page or the player unusable
    fn sanitized(mut self) -> Self {
        if self.catalog_sources.is_empty() {
            self.catalog_sources = default_catalog_sources();
        }
        self.grid_columns = self.grid_columns.clamp(1, 12);
        if self.retention_days <= 0 {
            self.retention_days = default_retention_days();
        }
        if self.manifest_timeout_secs == 0 {
            self.manifest_timeout_secs = default_manifest_timeout();
        }
        self
    }

    pub fn overlay_config(&self) -> OverlayConfig {
        OverlayConfig {
            manifest_timeout: Duration::from_secs(self.manifest_timeout_secs),
            ..OverlayConfig::default()
        }
    }
}

fn last_selection_path() -> PathBuf {
    app_dir().join("last_selection.json")
}

pub fn load_last_selections() -> Vec<LastSelection> {
    load_last_selections_from(&last_selection_path())
}

pub fn load_last_selections_from(path: &Path) -> Vec<LastSelection> {
    if path.exists() {
        if let Ok(content) = fs::read_to_string(path) {
            if let Ok(selections) = serde_json::from_str(&content) {
                return selections;
            }
        }
        debug!(path = %path.display(), "ignoring unreadable last selection file");
    }

    Vec::new()
}

pub fn save_last_selections(selections: &[LastSelection]) {
    save_last_selections_to(&last_selection_path(), selections);
}

pub fn save_last_selections_to(path: &Path, selections: &[LastSelection]) {
    if let Ok(content) = serde_json::to_string_pretty(selections) {
        if let Err(e) = fs::write(path, content) {
            warn!(path = %path.display(), error = %e, "could not save last selection");
        }
    }
}

/// Replace the entry of `selection.series_id`, keeping the others
pub fn remember_selection(selections: &mut Vec<LastSelection>, selection: LastSelection) {
    selections.retain(|s| s.series_id != selection.series_id);
    selections.push(selection);
}
