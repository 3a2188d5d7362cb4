//! Application configuration stored as `config.toml` in the app directory.
//!
//! Missing files and missing keys fall back to defaults. Content roots can also
//! come from the `CONTENT_ROOT` / `CONTENT_TRANSLATED_ROOT` environment
//! variables, which take precedence over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app_dirs;
use crate::atomic_write::atomic_write;

/// Default filename used to store the app configuration.
pub const CONFIG_FILE_NAME: &str = "config.toml";
/// Host serving `update.json` and the offline content packages.
pub const DEFAULT_UPDATES_BASE_URL: &str = "https://updates.developer.allizom.org";
/// Host serving the notifications API.
pub const DEFAULT_SITE_BASE_URL: &str = "https://developer.mozilla.org";

/// Errors raised while loading or saving `config.toml`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unable to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config to TOML at {path}: {source}")]
    SerializeToml {
        path: PathBuf,
        source: toml::ser::Error,
    },
    #[error("No suitable config directory found")]
    NoConfigDir,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub offline: OfflineConfig,
    pub site: SiteConfig,
    pub content: ContentConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            offline: OfflineConfig::default(),
            site: SiteConfig::default(),
            content: ContentConfig::default(),
        }
    }
}

/// Offline coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    pub updates_base_url: String,
    /// Registration scope handed to the worker host.
    pub worker_scope: String,
    pub auto_update_interval_secs: u64,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            updates_base_url: DEFAULT_UPDATES_BASE_URL.into(),
            worker_scope: "/".into(),
            auto_update_interval_secs: 60 * 60,
        }
    }
}

impl OfflineConfig {
    pub fn auto_update_interval(&self) -> Duration {
        Duration::from_secs(self.auto_update_interval_secs.max(1))
    }
}

/// Website endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,
    pub default_locale: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SITE_BASE_URL.into(),
            default_locale: crate::server::locale::DEFAULT_LOCALE.into(),
        }
    }
}

/// Content checkout locations used to build the redirect map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub content_root: Option<PathBuf>,
    pub content_translated_root: Option<PathBuf>,
    /// Base for relative content roots; defaults to the working directory.
    pub project_root: Option<PathBuf>,
}

impl ContentConfig {
    /// Apply `CONTENT_ROOT` / `CONTENT_TRANSLATED_ROOT` overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var("CONTENT_ROOT")
            && !value.is_empty()
        {
            self.content_root = Some(PathBuf::from(value));
        }
        if let Ok(value) = std::env::var("CONTENT_TRANSLATED_ROOT")
            && !value.is_empty()
        {
            self.content_translated_root = Some(PathBuf::from(value));
        }
        self
    }
}

/// Resolve the configuration file path, ensuring the parent directory exists.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let dir = app_dirs::app_root_dir().map_err(map_app_dir_error)?;
    Ok(dir.join(CONFIG_FILE_NAME))
}

/// Load configuration from disk, returning defaults if missing.
pub fn load_or_default() -> Result<AppConfig, ConfigError> {
    load_from(&config_path()?)
}

/// Persist configuration to the default location.
pub fn save(config: &AppConfig) -> Result<(), ConfigError> {
    save_to_path(config, &config_path()?)
}

pub fn load_from(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save_to_path(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    let data = toml::to_string_pretty(config).map_err(|source| ConfigError::SerializeToml {
        path: path.to_path_buf(),
        source,
    })?;
    atomic_write(path, data.as_bytes()).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn map_app_dir_error(error: app_dirs::AppDirError) -> ConfigError {
    match error {
        app_dirs::AppDirError::NoBaseDir => ConfigError::NoConfigDir,
        app_dirs::AppDirError::CreateDir { path, source } => {
            ConfigError::CreateDir { path, source }
        }
    }
}
