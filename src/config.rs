use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::api_client::DEFAULT_API_URL;
use crate::history::DEFAULT_PREVIEW_CHARS;
use crate::timer::DEFAULT_TICK_MS;

const CONFIG_DIR_NAME: &str = ".consultation-tracker";
const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schema_version: u32,
    pub api_base_url: String,

    /// Directory of the timer store; `None` means `<config dir>/store`
    pub store_dir: Option<PathBuf>,

    // Timer driver
    pub tick_interval_ms: u64,
    pub persist_every_ticks: u32,

    pub request_timeout_secs: u64,
    pub history_preview_chars: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            api_base_url: DEFAULT_API_URL.to_string(),
            store_dir: None,
            tick_interval_ms: DEFAULT_TICK_MS,
            persist_every_ticks: 1,
            request_timeout_secs: 30,
            history_preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }
}

impl Config {
    /// Get the config directory (`~/.consultation-tracker`)
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(CONFIG_DIR_NAME))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    pub fn auth_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("auth.json"))
    }

    pub fn log_dir() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("logs"))
    }

    /// Directory holding the persisted timer slots
    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::config_dir()?.join("store")),
        }
    }

    /// Load config from file, or fall back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&content).context("Failed to parse config file")?;
        Ok(config.sanitized())
    }

    /// Load from the default location; an unreadable file is logged and replaced by defaults
    pub fn load_or_default() -> Self {
        let path = match Self::config_path() {
            Ok(path) => path,
            Err(e) => {
                warn!("Could not resolve config path: {}", e);
                return Self::default();
            }
        };
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load config from {:?}: {:#}, using defaults", path, e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;
        info!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Clamp values that would stall the driver
    fn sanitized(mut self) -> Self {
        if self.tick_interval_ms == 0 {
            warn!("tick_interval_ms of 0 is invalid, using {}", DEFAULT_TICK_MS);
            self.tick_interval_ms = DEFAULT_TICK_MS;
        }
        if self.persist_every_ticks == 0 {
            self.persist_every_ticks = 1;
        }
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = Self::default().request_timeout_secs;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.persist_every_ticks, 1);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            api_base_url: "https://api.example.org".to_string(),
            store_dir: Some(dir.path().join("timers")),
            persist_every_ticks: 5,
            ..Config::default()
        };
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.store_path().unwrap(), dir.path().join("timers"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"api_base_url": "http://10.0.0.5:3000"}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.api_base_url, "http://10.0.0.5:3000");
        assert_eq!(config.tick_interval_ms, DEFAULT_TICK_MS);
        assert_eq!(config.history_preview_chars, DEFAULT_PREVIEW_CHARS);
    }

    #[test]
    fn test_zero_values_are_clamped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"tick_interval_ms": 0, "persist_every_ticks": 0}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.tick_interval_ms, DEFAULT_TICK_MS);
        assert_eq!(config.persist_every_ticks, 1);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{oops").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
