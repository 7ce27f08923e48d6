//! Configuration management for Sieve.
//!
//! Configuration is stored in TOML format in a platform-appropriate location.
//! A missing file means defaults.

use crate::error::{Result, SieveError};
use crate::pull::DEFAULT_BLOCK_SIZE;
use crate::query::DEFAULT_PARALLEL_THRESHOLD;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration structure for Sieve.
///
/// ## Example Configuration File (sieve.toml)
///
/// ```toml
/// [general]
/// log_level = "info"
///
/// [index]
/// concurrent = false
/// auto_index = true
///
/// [query]
/// parallel_threshold = 10000
///
/// [pull]
/// block_size = 1024
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    /// Secondary index behavior
    pub index: IndexConfig,

    /// Query evaluation tuning
    pub query: QueryConfig,

    /// Block column store layout
    pub pull: PullConfig,
}

/// General configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            log_level: "info".to_string(),
        }
    }
}

/// Index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Back index buckets with a sharded concurrent map
    pub concurrent: bool,

    /// Build an index on first select by a property that has none
    pub auto_index: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            concurrent: false,
            auto_index: true,
        }
    }
}

/// Query configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Linear scans over more items than this run in parallel
    pub parallel_threshold: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

/// Column store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PullConfig {
    /// Slots per block
    pub block_size: u32,
}

impl Default for PullConfig {
    fn default() -> Self {
        PullConfig {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default config if no config file exists.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Config::default());
        }

        info!(path = %path.display(), "Loading configuration");
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents).map_err(|e| SieveError::ConfigError {
            reason: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path()?;
        self.save_to(&config_path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        info!(path = %path.display(), "Saving configuration");
        let contents = toml::to_string_pretty(self).map_err(|e| SieveError::ConfigError {
            reason: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "sieve").ok_or_else(|| SieveError::ConfigError {
            reason: "Could not determine config directory".to_string(),
        })?;

        Ok(dirs.config_dir().join("sieve.toml"))
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        if self.pull.block_size == 0 {
            return Err(SieveError::ConfigError {
                reason: "pull.block_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
