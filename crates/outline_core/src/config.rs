//! Configuration for an outline store directory.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Store configuration, read from `config.toml` in the store directory.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Storage-related configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Change subscription configuration.
    #[serde(default)]
    pub subscription: SubscriptionConfig,

    /// Full-text search configuration.
    #[serde(default)]
    pub search: SearchConfig,
}

impl Config {
    /// Load configuration from a store directory. Missing file means defaults.
    pub fn load(store_dir: &Path) -> Result<Self> {
        let path = store_dir.join("config.toml");
        if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| StoreError::ConfigError(format!("failed to read config: {}", e)))?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| StoreError::ConfigError(format!("failed to parse config: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to a store directory.
    pub fn save(&self, store_dir: &Path) -> Result<()> {
        let path = store_dir.join("config.toml");
        let content = toml::to_string_pretty(self)
            .map_err(|e| StoreError::ConfigError(format!("failed to serialize config: {}", e)))?;
        fs::write(&path, content)
            .map_err(|e| StoreError::ConfigError(format!("failed to write config: {}", e)))?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.subscription.channel_capacity == 0 {
            return Err(StoreError::ConfigError(
                "subscription.channel_capacity must be > 0".to_string(),
            ));
        }
        if self.storage.file_name.trim().is_empty() {
            return Err(StoreError::ConfigError(
                "storage.file_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Storage-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file name inside the store directory (default: outline.redb).
    pub file_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            file_name: "outline.redb".to_string(),
        }
    }
}

/// Change subscription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Change batches queued per subscriber before it is dropped as lagging
    /// (default: 1024).
    pub channel_capacity: usize,

    /// Writes remembered per session for echo suppression (default: 4096).
    pub echo_capacity: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            echo_capacity: 4096,
        }
    }
}

/// Full-text search configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchConfig {
    /// Maximum search results to return (default: unlimited).
    pub max_results: Option<usize>,
}
