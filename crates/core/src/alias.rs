//! Alias management
//!
//! An alias is a named storage endpoint together with the credentials used to
//! reach it. Aliases are stored in the configuration file.

use serde::{Deserialize, Serialize};

use crate::config::ConfigManager;
use crate::error::{Error, Result};

/// Backoff settings for transient network failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
        }
    }
}

/// A named storage endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub name: String,
    pub endpoint: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Empty means "use the AWS default credential chain"
    #[serde(default)]
    pub access_key: String,

    #[serde(default)]
    pub secret_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,

    /// auto, path or dns
    #[serde(default = "default_bucket_lookup")]
    pub bucket_lookup: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_bucket_lookup() -> String {
    "auto".to_string()
}

impl Alias {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            region: default_region(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token: None,
            bucket_lookup: default_bucket_lookup(),
            retry: None,
        }
    }

    /// Whether credentials come from the alias itself rather than the environment
    pub fn has_static_credentials(&self) -> bool {
        !self.access_key.is_empty()
    }

    pub fn retry_config(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::Config(format!(
                "Invalid alias name '{}': use letters, digits, '-' or '_'",
                self.name
            )));
        }

        let endpoint = url::Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("Invalid endpoint '{}': {e}", self.endpoint)))?;
        if endpoint.scheme() != "http" && endpoint.scheme() != "https" {
            return Err(Error::Config(format!(
                "Endpoint must use http or https: {}",
                self.endpoint
            )));
        }

        if !matches!(self.bucket_lookup.as_str(), "auto" | "path" | "dns") {
            return Err(Error::Config(format!(
                "Invalid bucket lookup '{}': expected auto, path or dns",
                self.bucket_lookup
            )));
        }

        if self.access_key.is_empty() != self.secret_key.is_empty() {
            return Err(Error::Config(
                "Access key and secret key must be given together".to_string(),
            ));
        }

        Ok(())
    }
}

/// CRUD over the aliases stored in the configuration file
#[derive(Debug, Clone)]
pub struct AliasManager {
    config_manager: ConfigManager,
}

impl AliasManager {
    pub fn new() -> Result<Self> {
        Ok(Self {
            config_manager: ConfigManager::new()?,
        })
    }

    pub fn with_config_manager(config_manager: ConfigManager) -> Self {
        Self { config_manager }
    }

    /// Add an alias or replace the one with the same name
    pub fn set(&self, alias: Alias) -> Result<()> {
        alias.validate()?;

        let mut config = self.config_manager.load()?;
        match config.aliases.iter_mut().find(|a| a.name == alias.name) {
            Some(existing) => *existing = alias,
            None => config.aliases.push(alias),
        }
        self.config_manager.save(&config)
    }

    pub fn get(&self, name: &str) -> Result<Alias> {
        self.config_manager
            .load()?
            .aliases
            .into_iter()
            .find(|a| a.name == name)
            .ok_or_else(|| Error::AliasNotFound(name.to_string()))
    }

    /// All aliases, sorted by name
    pub fn list(&self) -> Result<Vec<Alias>> {
        let mut aliases = self.config_manager.load()?.aliases;
        aliases.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(aliases)
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let mut config = self.config_manager.load()?;
        let before = config.aliases.len();
        config.aliases.retain(|a| a.name != name);
        if config.aliases.len() == before {
            return Err(Error::AliasNotFound(name.to_string()));
        }
        self.config_manager.save(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(temp_dir: &TempDir) -> AliasManager {
        AliasManager::with_config_manager(ConfigManager::with_path(
            temp_dir.path().join("config.toml"),
        ))
    }

    #[test]
    fn test_set_get_remove() {
        let temp_dir = TempDir::new().unwrap();
        let am = manager(&temp_dir);

        am.set(Alias::new("local", "http://localhost:9000", "ak", "sk"))
            .unwrap();
        let alias = am.get("local").unwrap();
        assert_eq!(alias.endpoint, "http://localhost:9000");
        assert_eq!(alias.region, "us-east-1");
        assert!(alias.has_static_credentials());

        am.remove("local").unwrap();
        assert!(matches!(am.get("local"), Err(Error::AliasNotFound(_))));
    }

    #[test]
    fn test_set_replaces_existing() {
        let temp_dir = TempDir::new().unwrap();
        let am = manager(&temp_dir);

        am.set(Alias::new("s3", "https://s3.amazonaws.com", "old", "old"))
            .unwrap();
        am.set(Alias::new("s3", "https://s3.amazonaws.com", "new", "new"))
            .unwrap();

        let aliases = am.list().unwrap();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].access_key, "new");
    }

    #[test]
    fn test_list_is_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let am = manager(&temp_dir);

        am.set(Alias::new("zeta", "http://z:9000", "", "")).unwrap();
        am.set(Alias::new("alpha", "http://a:9000", "", "")).unwrap();

        let names: Vec<_> = am.list().unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_remove_missing_alias() {
        let temp_dir = TempDir::new().unwrap();
        let am = manager(&temp_dir);
        assert!(matches!(
            am.remove("nonexistent"),
            Err(Error::AliasNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_aliases_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let am = manager(&temp_dir);

        assert!(am.set(Alias::new("bad name", "http://x", "a", "b")).is_err());
        assert!(am.set(Alias::new("ok", "ftp://x", "a", "b")).is_err());
        assert!(am.set(Alias::new("ok", "not a url", "a", "b")).is_err());
        assert!(am.set(Alias::new("ok", "http://x", "a", "")).is_err());

        let mut alias = Alias::new("ok", "http://x", "a", "b");
        alias.bucket_lookup = "sideways".to_string();
        assert!(am.set(alias).is_err());
    }

    #[test]
    fn test_retry_config_default() {
        let alias = Alias::new("local", "http://localhost:9000", "", "");
        assert!(!alias.has_static_credentials());
        assert_eq!(alias.retry_config(), RetryConfig::default());
    }
}
