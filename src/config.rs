//! Application configuration persistence
//!
//! Stored in ~/.config/offtune/config.json. Every field has a default, so a
//! missing file or a partial one both load.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::offline::DEFAULT_FAVOURITES_NAME;

const APP_DIR: &str = "offtune";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where downloaded songs and the cache index live
    pub cache_dir: PathBuf,
    /// Number of concurrent downloads
    pub parallel_downloads: usize,
    /// Songs requested per catalog page
    pub page_size: usize,
    /// Name of the playlist mirroring favourite songs
    pub favourites_playlist: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let cache_dir = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR)
            .join("cache");

        Self {
            cache_dir,
            parallel_downloads: 4,
            page_size: 50,
            favourites_playlist: DEFAULT_FAVOURITES_NAME.to_string(),
        }
    }
}

impl AppConfig {
    /// Default location of the config file
    pub fn config_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Key-value file holding collection memberships
    pub fn metadata_path(&self) -> PathBuf {
        self.cache_dir.join("collections.json")
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config {:?}", path))?;

        Ok(config.normalized())
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        debug!("Saved config to {}", path.display());
        Ok(())
    }

    fn normalized(mut self) -> Self {
        self.parallel_downloads = self.parallel_downloads.max(1);
        self.page_size = self.page_size.max(1);
        if self.favourites_playlist.trim().is_empty() {
            self.favourites_playlist = DEFAULT_FAVOURITES_NAME.to_string();
        }
        self
    }
}
