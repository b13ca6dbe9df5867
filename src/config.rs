//! Configuration for keytally.

use crate::collector::{KeyId, DELETE_KEY_ID};
use crate::storage::BackupSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const APP_DIR: &str = "keytally";

/// Main configuration for the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the snapshot, backups and state files
    pub data_path: PathBuf,

    /// Default destination for exports
    pub export_path: PathBuf,

    /// How often the live aggregate is written to disk
    #[serde(with = "duration_serde")]
    pub autosave_interval: Duration,

    /// How often the backup policy is evaluated
    #[serde(with = "duration_serde")]
    pub backup_check_interval: Duration,

    /// Scheduled backup settings
    pub backup: BackupSettings,

    /// Key identifier counted as "delete"
    pub delete_key_id: KeyId,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            export_path: data_dir.join("exports"),
            data_path: data_dir,
            autosave_interval: Duration::from_secs(60),
            backup_check_interval: Duration::from_secs(60 * 60),
            backup: BackupSettings::default(),
            delete_key_id: DELETE_KEY_ID,
        }
    }
}

impl Config {
    /// A configuration with all data under `data_path`.
    pub fn with_data_path(data_path: impl Into<PathBuf>) -> Self {
        let data_path = data_path.into();
        Self {
            export_path: data_path.join("exports"),
            data_path,
            ..Self::default()
        }
    }

    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it is absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }
        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Primary snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_path.join("snapshot.json")
    }

    /// Directory holding timestamped backups.
    pub fn backup_dir(&self) -> PathBuf {
        self.data_path.join("backups")
    }

    /// Where backup bookkeeping is kept.
    pub fn backup_state_path(&self) -> PathBuf {
        self.data_path.join("backup_state.json")
    }

    /// Where health counters are persisted.
    pub fn health_path(&self) -> PathBuf {
        self.data_path.join("health.json")
    }

    /// Marker asking a running daemon to clear its aggregate.
    pub fn clear_request_path(&self) -> PathBuf {
        self.data_path.join("clear.request")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        for dir in [&self.data_path, &self.export_path, &self.backup_dir()] {
            std::fs::create_dir_all(dir).map_err(|e| ConfigError::Io(e.to_string()))?;
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs.max(1)))
    }
}
