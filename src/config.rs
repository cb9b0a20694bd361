//! Application configuration
//!
//! Read from `config.json` in the XDG config directory
//! (`~/.config/wxcache/config.json` on Linux) or from an explicit path.
//! Every field except the API key has a default; `OPENWEATHER_API_KEY`
//! overrides the key from the file.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::cache::{Store, DEFAULT_FETCH_TIMEOUT, DEFAULT_FRESHNESS_WINDOW, STORE_FILE_NAME};
use crate::data::weather::{Units, OPEN_WEATHER_BASE_URL, OPEN_WEATHER_HISTORY_URL};

/// Environment variable that overrides `api_key`
pub const API_KEY_ENV: &str = "OPENWEATHER_API_KEY";

/// Name of the config file inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Errors loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The config file is not valid JSON for [`AppConfig`]
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// No API key in the file or the environment
    #[error("No API key configured. Set \"api_key\" in config.json or the OPENWEATHER_API_KEY environment variable")]
    MissingApiKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// OpenWeatherMap API key
    #[serde(default)]
    pub api_key: Option<String>,

    /// API root URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Root URL for historical lookups
    #[serde(default = "default_history_base_url")]
    pub history_base_url: String,

    /// Default unit system: metric, imperial or standard
    #[serde(default = "default_units")]
    pub units: String,

    /// How long a cached payload is served without refreshing
    #[serde(default = "default_freshness_minutes")]
    pub freshness_minutes: u64,

    /// Upper bound on one API request
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Where the cache is persisted (defaults to the XDG cache dir)
    #[serde(default)]
    pub cache_file: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_base_url() -> String {
    OPEN_WEATHER_BASE_URL.to_string()
}

fn default_history_base_url() -> String {
    OPEN_WEATHER_HISTORY_URL.to_string()
}

fn default_units() -> String {
    Units::Metric.as_str().to_string()
}

fn default_freshness_minutes() -> u64 {
    DEFAULT_FRESHNESS_WINDOW.as_secs() / 60
}

fn default_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT.as_secs()
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            history_base_url: default_history_base_url(),
            units: default_units(),
            freshness_minutes: default_freshness_minutes(),
            timeout_secs: default_timeout_secs(),
            cache_file: None,
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Default config file location, if a home directory exists
    pub fn default_path() -> Option<PathBuf> {
        let project_dirs = ProjectDirs::from("", "", "wxcache")?;
        Some(project_dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from `path`, or the default location when `None`
    ///
    /// A missing file yields defaults. The API key environment override is
    /// applied afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env_override(std::env::var(API_KEY_ENV).ok());
        Ok(config)
    }

    /// Reads `path`; a missing file is the default config
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Replaces the API key when the environment provides a non-empty one
    pub fn apply_env_override(&mut self, env_key: Option<String>) {
        if let Some(key) = env_key.filter(|k| !k.trim().is_empty()) {
            self.api_key = Some(key);
        }
    }

    /// The API key, or an error if none is configured
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_minutes.saturating_mul(60))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Configured cache file, falling back to the XDG cache path, then the
    /// working directory
    pub fn cache_path(&self) -> PathBuf {
        self.cache_file
            .clone()
            .or_else(Store::default_path)
            .unwrap_or_else(|| PathBuf::from(STORE_FILE_NAME))
    }
}
