//! Configuration management
//!
//! The configuration lives in a single TOML file. Its location is
//! `$BK_CONFIG_DIR/config.toml` when the variable is set, otherwise
//! `<platform config dir>/bucketkit/config.toml`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::alias::Alias;
use crate::error::{Error, Result};

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "BK_CONFIG_DIR";

const CONFIG_FILE_NAME: &str = "config.toml";
const SCHEMA_VERSION: u32 = 1;

/// Default multipart threshold (1 GiB)
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 1024 * 1024 * 1024;
/// Default number of parts uploaded at once
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;
/// Default credential retry budget
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default minimum part size (8 MiB)
pub const DEFAULT_MIN_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Upload defaults, overridable per command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Files at or above this size go through a multipart upload
    pub multipart_threshold: u64,
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub min_part_size: u64,
    /// "human" or "json"
    pub output: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            min_part_size: DEFAULT_MIN_PART_SIZE,
            output: "human".to_string(),
        }
    }
}

/// On-disk configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub aliases: Vec<Alias>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            defaults: Defaults::default(),
            aliases: Vec::new(),
        }
    }
}

impl Config {
    fn validate(&self) -> Result<()> {
        if self.schema_version > SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "Unsupported config schema version {} (this build understands up to {})",
                self.schema_version, SCHEMA_VERSION
            )));
        }
        if self.defaults.max_concurrency == 0 {
            return Err(Error::Config(
                "defaults.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.defaults.min_part_size == 0 {
            return Err(Error::Config(
                "defaults.min_part_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads and saves the configuration file
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    /// Create a manager for the default configuration location
    pub fn new() -> Result<Self> {
        let dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::config_dir()
                .ok_or_else(|| Error::Config("Cannot determine config directory".to_string()))?
                .join("bucketkit"),
        };

        Ok(Self::with_path(dir.join(CONFIG_FILE_NAME)))
    }

    /// Create a manager for an explicit configuration file
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration; a missing file yields the defaults
    pub fn load(&self) -> Result<Config> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "Config file not found, using defaults");
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration, creating parent directories as needed
    pub fn save(&self, config: &Config) -> Result<()> {
        config.validate()?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(config)?;
        std::fs::write(&self.path, content)?;
        tracing::debug!(path = %self.path.display(), "Config saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp_dir.path().join("config.toml"));

        let config = manager.load().unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.defaults.max_concurrency, 5);
        assert_eq!(config.defaults.max_retries, 3);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp_dir.path().join("nested/config.toml"));

        let mut config = Config::default();
        config.defaults.multipart_threshold = 64 * 1024 * 1024;
        config.aliases.push(Alias::new(
            "local",
            "http://localhost:9000",
            "accesskey",
            "secretkey",
        ));
        manager.save(&config).unwrap();

        let loaded = manager.load().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_defaults_are_filled_in() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[defaults]\nmax_retries = 7\n").unwrap();

        let config = ConfigManager::with_path(&path).load().unwrap();
        assert_eq!(config.defaults.max_retries, 7);
        assert_eq!(config.defaults.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.schema_version, 1);
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[defaults]\nmax_concurrency = 0\n").unwrap();

        let result = ConfigManager::with_path(&path).load();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "schema_version = 99\n").unwrap();

        assert!(ConfigManager::with_path(&path).load().is_err());
    }
}
