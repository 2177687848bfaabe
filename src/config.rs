//! Configuration management for LuccaNotes.
//!
//! Loads and saves application configuration to/from a JSON file.
//! Debounce windows are tuned per use case, not shared: autosave waits
//! ~2 seconds of typing quiet, while search-as-you-type elsewhere in
//! the app uses a much shorter window.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NoteError, NoteResult};

fn default_database_file() -> String {
    "luccanotes.db".to_string()
}

fn default_server_port() -> u16 {
    8384
}

fn default_autosave_debounce_ms() -> u64 {
    2000
}

fn default_search_debounce_ms() -> u64 {
    200
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Sync and editor tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTuning {
    /// Quiet period after the last keystroke before autosave fires
    #[serde(default = "default_autosave_debounce_ms")]
    pub autosave_debounce_ms: u64,
    /// Quiet period for search-input debouncing
    #[serde(default = "default_search_debounce_ms")]
    pub search_debounce_ms: u64,
    /// Client-side timeout for save requests
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            autosave_debounce_ms: default_autosave_debounce_ms(),
            search_debounce_ms: default_search_debounce_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigData {
    /// Path to the SQLite database file
    #[serde(default = "default_database_file")]
    pub database_file: String,
    /// Port the HTTP API listens on
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default)]
    pub sync: SyncTuning,
}

impl Default for ConfigData {
    fn default() -> Self {
        Self {
            database_file: default_database_file(),
            server_port: default_server_port(),
            sync: SyncTuning::default(),
        }
    }
}

/// Configuration with its backing file
#[derive(Debug, Clone)]
pub struct Config {
    data: ConfigData,
    path: PathBuf,
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults if
    /// the file does not exist yet.
    pub fn load<P: AsRef<Path>>(path: P) -> NoteResult<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)
                .map_err(|e| NoteError::Config(format!("invalid config file: {e}")))?
        } else {
            ConfigData::default()
        };
        Ok(Self { data, path })
    }

    /// Persist the current configuration
    pub fn save(&self) -> NoteResult<()> {
        let raw = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }

    pub fn data(&self) -> &ConfigData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut ConfigData {
        &mut self.data
    }

    pub fn database_file(&self) -> &str {
        &self.data.database_file
    }

    pub fn server_port(&self) -> u16 {
        self.data.server_port
    }

    /// Autosave quiet period as a [`Duration`]
    pub fn autosave_quiet_period(&self) -> Duration {
        Duration::from_millis(self.data.sync.autosave_debounce_ms)
    }

    /// Search-input quiet period as a [`Duration`]
    pub fn search_quiet_period(&self) -> Duration {
        Duration::from_millis(self.data.sync.search_debounce_ms)
    }

    /// Save-request timeout as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.data.sync.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_file_missing() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(temp_dir.path().join("config.json")).unwrap();

        assert_eq!(config.server_port(), 8384);
        assert_eq!(config.autosave_quiet_period(), Duration::from_millis(2000));
        assert_eq!(config.search_quiet_period(), Duration::from_millis(200));
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");

        let mut config = Config::load(&path).unwrap();
        config.data_mut().sync.autosave_debounce_ms = 5000;
        config.save().unwrap();

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(
            reloaded.autosave_quiet_period(),
            Duration::from_secs(5)
        );
        // Untouched fields keep their defaults.
        assert_eq!(reloaded.search_quiet_period(), Duration::from_millis(200));
    }

    #[test]
    fn test_partial_config_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{"server_port": 9000}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server_port(), 9000);
        assert_eq!(config.database_file(), "luccanotes.db");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "not json at all").unwrap();

        assert!(matches!(
            Config::load(&path).unwrap_err(),
            NoteError::Config(_)
        ));
    }
}
