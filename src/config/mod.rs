//! Configuration module for edgellm
//!
//! Loads config from `$XDG_CONFIG_HOME/edgellm/config.toml` or the platform config dir.
//! Falls back to defaults if the file doesn't exist.
//! Partial configs are merged with defaults using serde's default attributes,
//! then `EDGELLM_*` environment variables override storage and runtime paths.
//!
//! # Example
//!
//! ```no_run
//! use edgellm::config::Config;
//!
//! let config = Config::load().expect("Failed to load config");
//! println!("Model store: {}", config.storage.root.display());
//! println!("Runtime mirrors: {}", config.runtime.mirrors.len());
//! ```

pub mod schema;

pub use schema::{
    Config, DownloadConfig, GenerationOptions, RuntimeConfig, SessionConfig, StorageConfig,
};

use crate::error::{EdgeError, Result};
use std::fs;
use std::path::{Path, PathBuf};

impl Config {
    /// Load config from the default location, applying environment overrides
    pub fn load() -> Result<Self> {
        let mut config = match config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|e| match e {
            EdgeError::Config(msg) => EdgeError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Parse config from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| EdgeError::Config(format!("Failed to parse config: {e}")))
    }

    /// Override paths from `EDGELLM_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Some(path) = env_path("EDGELLM_STORAGE_ROOT") {
            self.storage.root = path;
        }
        if let Some(path) = env_path("EDGELLM_CACHE_DIR") {
            self.storage.cache_dir = path;
        }
        if let Some(path) = env_path("EDGELLM_DEV_CACHE_DIR") {
            self.storage.dev_cache_dir = Some(path);
        }
        if let Some(path) = env_path("EDGELLM_BUNDLE_DIR") {
            self.storage.bundle_dir = Some(path);
        }
        if let Some(path) = env_path("EDGELLM_RUNTIME_DIR") {
            self.runtime.install_dir = path;
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Location of `config.toml`
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    let base = env_path("XDG_CONFIG_HOME").or_else(dirs::config_dir)?;
    Some(base.join("edgellm").join("config.toml"))
}
