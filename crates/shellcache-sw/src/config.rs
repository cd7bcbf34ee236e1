//! Engine configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use shellcache_common::LogConfig;
use url::Url;

use crate::error::{CacheError, Result};
use crate::key::ResourceKey;
use crate::manifest::ShellSet;

/// Names of the three stores the engine owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheNames {
    /// Staging store filled on install.
    pub temp: String,
    /// Durable content store.
    pub content: String,
    /// Holds the last applied manifest.
    pub manifest: String,
}

impl Default for CacheNames {
    fn default() -> Self {
        Self {
            temp: "flutter-temp-cache".to_string(),
            content: "flutter-app-cache".to_string(),
            manifest: "flutter-app-manifest".to_string(),
        }
    }
}

impl CacheNames {
    pub fn all(&self) -> [&str; 3] {
        [&self.content, &self.temp, &self.manifest]
    }
}

/// Engine configuration, usually read from a JSON file next to the build
/// output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Origin the application is served from, e.g. `https://app.example.com`.
    pub origin: String,

    /// Store names.
    #[serde(default)]
    pub caches: CacheNames,

    /// Key the applied manifest is stored under in the manifest store.
    #[serde(default = "default_manifest_key")]
    pub manifest_key: String,

    /// Resources staged with a reload fetch on every install.
    #[serde(default)]
    pub shell: ShellSet,

    /// Maximum number of fetches in flight during bulk staging.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Logging settings for binaries embedding the engine.
    #[serde(default)]
    pub logging: Option<LogConfig>,
}

fn default_manifest_key() -> String {
    "manifest".to_string()
}

fn default_max_concurrent_fetches() -> usize {
    6
}

impl EngineConfig {
    /// Configuration with defaults for everything but the origin.
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into().trim_end_matches('/').to_string(),
            caches: CacheNames::default(),
            manifest_key: default_manifest_key(),
            shell: ShellSet::default(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            logging: None,
        }
    }

    pub fn with_shell(mut self, shell: ShellSet) -> Self {
        self.shell = shell;
        self
    }

    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut config: Self =
            serde_json::from_str(json).map_err(|e| CacheError::config(e.to_string()))?;
        config.origin = config.origin.trim_end_matches('/').to_string();
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| CacheError::config(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.origin)
            .map_err(|e| CacheError::config(format!("origin '{}': {e}", self.origin)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CacheError::config(format!(
                "origin '{}' must be http or https",
                self.origin
            )));
        }
        if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
            return Err(CacheError::config(format!(
                "origin '{}' must not carry a path, query or fragment",
                self.origin
            )));
        }
        if self.shell.iter().any(|k| k.as_str().is_empty()) {
            return Err(CacheError::config("shell contains an empty key"));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(CacheError::config("max_concurrent_fetches must be at least 1"));
        }
        let names = self.caches.all();
        if names[0] == names[1] || names[1] == names[2] || names[0] == names[2] {
            return Err(CacheError::config("cache names must be distinct"));
        }
        Ok(())
    }

    /// Canonical request URL for `key`.
    pub fn url_for(&self, key: &ResourceKey) -> String {
        key.to_url(&self.origin)
    }

    /// URL the applied manifest is stored under.
    pub fn manifest_url(&self) -> String {
        ResourceKey::new(self.manifest_key.as_str()).to_url(&self.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_json() {
        let config = EngineConfig::from_json(r#"{"origin": "https://app.example.com/"}"#).unwrap();

        assert_eq!(config.origin, "https://app.example.com");
        assert_eq!(config.caches.content, "flutter-app-cache");
        assert_eq!(config.manifest_key, "manifest");
        assert_eq!(config.shell, ShellSet::flutter());
        assert_eq!(config.max_concurrent_fetches, 6);
        assert!(config.logging.is_none());
    }

    #[test]
    fn test_full_json() {
        let config = EngineConfig::from_json(
            r#"{
                "origin": "http://localhost:8080",
                "caches": {"content": "app-v2"},
                "shell": ["index.html", "main.js"],
                "max_concurrent_fetches": 2,
                "logging": {"level": "debug", "format": "json"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.caches.content, "app-v2");
        assert_eq!(config.caches.temp, "flutter-temp-cache");
        assert_eq!(config.shell.len(), 2);
        assert_eq!(config.logging.unwrap().level, "debug");
    }

    #[test]
    fn test_rejects_origin_with_path() {
        let err = EngineConfig::from_json(r#"{"origin": "https://app.example.com/app"}"#).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_rejects_non_http_origin() {
        assert!(EngineConfig::from_json(r#"{"origin": "file:///tmp"}"#).is_err());
    }

    #[test]
    fn test_rejects_zero_fan_out() {
        let mut config = EngineConfig::new("https://app.example.com");
        config.max_concurrent_fetches = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_shared_cache_names() {
        let mut config = EngineConfig::new("https://app.example.com");
        config.caches.temp = config.caches.content.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_urls() {
        let config = EngineConfig::new("https://app.example.com");
        assert_eq!(config.manifest_url(), "https://app.example.com/manifest");
        assert_eq!(config.url_for(&ResourceKey::root()), "https://app.example.com/");
    }
}
