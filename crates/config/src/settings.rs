// User settings

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(String),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveSettings {
    /// Quiet period after the last change before a save fires
    pub delay_ms: u64,
    /// Wait for the previous save to finish before starting the next one
    pub serialize_saves: bool,
}

impl Default for AutosaveSettings {
    fn default() -> Self {
        Self {
            delay_ms: 900,
            serialize_saves: false,
        }
    }
}

impl AutosaveSettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub chunk_size: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self { chunk_size: 400 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasteSettings {
    pub allow_variable_rows: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// SQLite file. Relative paths resolve against the data directory.
    pub database: PathBuf,
    pub records_table: String,
    pub rows_table: String,
    /// Create the (entity_id, record_kind) unique index on new tables
    pub unique_key: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            database: PathBuf::from("formsync.db"),
            records_table: "records".to_string(),
            rows_table: "record_rows".to_string(),
            unique_key: true,
        }
    }
}

impl StoreSettings {
    /// Absolute database path.
    pub fn database_path(&self) -> PathBuf {
        if self.database.is_absolute() {
            return self.database.clone();
        }
        Settings::data_dir().join(&self.database)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub autosave: AutosaveSettings,
    pub batch: BatchSettings,
    pub paste: PasteSettings,
    pub store: StoreSettings,
}

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("formsync")
            .join("config.toml")
    }

    /// Directory relative database paths resolve against
    pub fn data_dir() -> PathBuf {
        dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("formsync")
    }

    /// Load settings from the default location, falling back to defaults
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("{}; using default settings", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.autosave.delay_ms == 0 {
            return Err(ConfigError::Invalid("autosave.delay_ms must be greater than 0".into()));
        }
        if self.batch.chunk_size == 0 {
            return Err(ConfigError::Invalid("batch.chunk_size must be greater than 0".into()));
        }
        for (field, name) in [
            ("store.records_table", &self.store.records_table),
            ("store.rows_table", &self.store.rows_table),
        ] {
            if !is_identifier(name) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a plain identifier, got '{}'",
                    field, name
                )));
            }
        }
        if self.store.records_table == self.store.rows_table {
            return Err(ConfigError::Invalid(
                "store.records_table and store.rows_table must differ".into(),
            ));
        }
        Ok(())
    }

    /// Save current settings to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        fs::write(path, text).map_err(io_err)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    }
}
