//! # Offline Configuration
//!
//! Settings for the offline queue, connectivity probing and auto-sync.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     STOCKZIP_MAX_RETRIES=5                                             │
//! │     STOCKZIP_AUTO_SYNC=false                                           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/stockzip/offline.toml (Linux)                            │
//! │     ~/Library/Application Support/com.stockzip.stockzip/offline.toml   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     3 retries, 30s probe interval, auto-sync 2s after reconnect        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # offline.toml
//! [queue]
//! max_retries = 3
//!
//! [connectivity]
//! probe_interval_secs = 30
//!
//! [auto_sync]
//! enabled = true
//! delay_ms = 2000
//!
//! [storage]
//! database_path = "/var/lib/stockzip/offline.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use stockzip_store::DbConfig;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Sections
// =============================================================================

/// Mutation queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Failed attempts allowed before an operation is marked failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    stockzip_core::DEFAULT_MAX_RETRIES
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            max_retries: default_max_retries(),
        }
    }
}

/// Connectivity probe settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivitySettings {
    /// Seconds between background probes.
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
}

fn default_probe_interval() -> u64 {
    crate::DEFAULT_PROBE_INTERVAL_SECS
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        ConnectivitySettings {
            probe_interval_secs: default_probe_interval(),
        }
    }
}

/// Auto-sync settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoSyncSettings {
    /// Drain the queue automatically when connectivity returns.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Wait after an offline → online transition before draining.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_delay_ms() -> u64 {
    crate::auto_sync::DEFAULT_AUTO_SYNC_DELAY.as_millis() as u64
}

impl Default for AutoSyncSettings {
    fn default() -> Self {
        AutoSyncSettings {
            enabled: true,
            delay_ms: default_delay_ms(),
        }
    }
}

/// Local storage settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite file. Defaults to `offline.db` in the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

// =============================================================================
// Offline Configuration
// =============================================================================

/// Complete offline configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineConfig {
    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub connectivity: ConnectivitySettings,

    #[serde(default)]
    pub auto_sync: AutoSyncSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl OfflineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (offline.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading offline config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load offline config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Offline config saved");
        Ok(())
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.queue.max_retries == 0 {
            return Err(SyncError::InvalidConfig(
                "max_retries must be greater than 0".into(),
            ));
        }

        if self.connectivity.probe_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "probe_interval_secs must be greater than 0".into(),
            ));
        }

        if let Some(path) = &self.storage.database_path {
            if path.as_os_str().is_empty() {
                return Err(SyncError::InvalidConfig("database_path is empty".into()));
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `STOCKZIP_*` overrides read through `var`.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(value) = var("STOCKZIP_MAX_RETRIES") {
            match value.parse::<u32>() {
                Ok(n) => {
                    debug!(max_retries = n, "Overriding max retries from environment");
                    self.queue.max_retries = n;
                }
                Err(_) => warn!(value = %value, "Ignoring invalid STOCKZIP_MAX_RETRIES"),
            }
        }

        if let Some(value) = var("STOCKZIP_PROBE_INTERVAL_SECS") {
            match value.parse::<u64>() {
                Ok(secs) => self.connectivity.probe_interval_secs = secs,
                Err(_) => warn!(value = %value, "Ignoring invalid STOCKZIP_PROBE_INTERVAL_SECS"),
            }
        }

        if let Some(value) = var("STOCKZIP_AUTO_SYNC") {
            match value.to_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => self.auto_sync.enabled = true,
                "0" | "false" | "off" | "no" => self.auto_sync.enabled = false,
                _ => warn!(value = %value, "Ignoring invalid STOCKZIP_AUTO_SYNC"),
            }
        }

        if let Some(value) = var("STOCKZIP_AUTO_SYNC_DELAY_MS") {
            match value.parse::<u64>() {
                Ok(ms) => self.auto_sync.delay_ms = ms,
                Err(_) => warn!(value = %value, "Ignoring invalid STOCKZIP_AUTO_SYNC_DELAY_MS"),
            }
        }

        if let Some(path) = var("STOCKZIP_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.storage.database_path = Some(PathBuf::from(path));
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "stockzip", "stockzip")
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("offline.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.connectivity.probe_interval_secs)
    }

    pub fn auto_sync_delay(&self) -> Duration {
        Duration::from_millis(self.auto_sync.delay_ms)
    }

    /// Resolved database file: configured path, platform data dir, or `./offline.db`.
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .or_else(|| Self::project_dirs().map(|dirs| dirs.data_dir().join("offline.db")))
            .unwrap_or_else(|| Path::new("offline.db").to_path_buf())
    }

    /// Database settings for [`stockzip_store::Database::new`].
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(self.database_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = OfflineConfig::default();
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.probe_interval(), Duration::from_secs(30));
        assert!(config.auto_sync.enabled);
        assert_eq!(config.auto_sync_delay(), Duration::from_millis(2000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = OfflineConfig::default();

        config.queue.max_retries = 0;
        assert!(config.validate().unwrap_err().is_config_error());

        config.queue.max_retries = 1;
        config.connectivity.probe_interval_secs = 0;
        assert!(config.validate().is_err());

        config.connectivity.probe_interval_secs = 10;
        config.storage.database_path = Some(PathBuf::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: OfflineConfig = toml::from_str(
            r#"
            [auto_sync]
            enabled = false
            "#,
        )
        .unwrap();

        assert!(!config.auto_sync.enabled);
        assert_eq!(config.auto_sync.delay_ms, 2000);
        assert_eq!(config.queue.max_retries, 3);
        assert!(config.storage.database_path.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("STOCKZIP_MAX_RETRIES", "5"),
            ("STOCKZIP_AUTO_SYNC", "off"),
            ("STOCKZIP_AUTO_SYNC_DELAY_MS", "250"),
            ("STOCKZIP_PROBE_INTERVAL_SECS", "soon"),
            ("STOCKZIP_DATABASE_PATH", "/tmp/stockzip.db"),
        ]
        .into_iter()
        .collect();

        let mut config = OfflineConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.queue.max_retries, 5);
        assert!(!config.auto_sync.enabled);
        assert_eq!(config.auto_sync.delay_ms, 250);
        assert_eq!(config.connectivity.probe_interval_secs, 30);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/stockzip.db"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("offline.toml");

        let mut config = OfflineConfig::default();
        config.queue.max_retries = 7;
        config.storage.database_path = Some(dir.path().join("offline.db"));
        config.save(Some(path.clone())).unwrap();

        let loaded = OfflineConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.queue.max_retries, 7);
        assert_eq!(loaded.storage, config.storage);
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline.toml");
        std::fs::write(&path, "[queue]\nmax_retries = \"many\"\n").unwrap();

        assert!(OfflineConfig::load(Some(path.clone())).is_err());
        assert_eq!(OfflineConfig::load_or_default(Some(path)).queue.max_retries, 3);
    }
}
