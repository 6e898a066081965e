//! Configuration management
//!
//! This module handles loading and validation of the Weave configuration.
//! Configuration is stored in TOML format at ~/.weave/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Agent identity, log level and format, data directory
//! - **history**: How many recent and similar fragments state assembly loads
//! - **cache**: Fragment cache sizing and expiry
//! - **database**: SQLite file location
//!
//! Every section and field has a default, so an empty file is a valid config.
//!
//! # Examples
//!
//! ```no_run
//! use weave_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Agent: {}", config.core.agent_name);
//! println!("Database: {:?}", config.database_path());
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use sdk::types::Id;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::telemetry::LogFormat;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// History window used during state assembly
    #[serde(default)]
    pub history: HistoryConfig,

    /// Fragment cache settings
    #[serde(default)]
    pub cache: CacheSection,

    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Display name of the assistant actor
    #[serde(default = "default_agent_name")]
    pub agent_name: String,

    /// Explicit assistant actor id; derived from `agent_name` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Id>,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format (auto, pretty, json)
    #[serde(default)]
    pub log_format: LogFormat,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// History window configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Most recent session fragments loaded into state
    #[serde(default = "default_history_limit")]
    pub recent_limit: usize,

    /// Similar session fragments loaded into state
    #[serde(default = "default_history_limit")]
    pub relevant_limit: usize,
}

/// Fragment cache configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSection {
    /// Maximum cached fragments per store
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,

    /// Entry lifetime in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Interval between expiry sweeps in seconds
    #[serde(default = "default_cache_cleanup_secs")]
    pub cleanup_period_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file, relative to `core.data_dir` unless absolute
    #[serde(default = "default_database_file")]
    pub path: PathBuf,
}

// Default value functions
fn default_agent_name() -> String {
    "weave".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.weave")
}

fn default_history_limit() -> usize {
    20
}

fn default_cache_max_size() -> usize {
    1000
}

fn default_cache_ttl_secs() -> u64 {
    30 * 60
}

fn default_cache_cleanup_secs() -> u64 {
    60
}

fn default_database_file() -> PathBuf {
    PathBuf::from("weave.db")
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            agent_name: default_agent_name(),
            agent_id: None,
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            recent_limit: default_history_limit(),
            relevant_limit: default_history_limit(),
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            ttl_secs: default_cache_ttl_secs(),
            cleanup_period_secs: default_cache_cleanup_secs(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_file(),
        }
    }
}

impl CacheSection {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_size: self.max_size,
            ttl: Duration::from_secs(self.ttl_secs),
            cleanup_period: Duration::from_secs(self.cleanup_period_secs),
        }
    }
}

impl CoreConfig {
    /// Identifier of the assistant actor
    pub fn agent_id(&self) -> Id {
        self.agent_id
            .unwrap_or_else(|| Id::from_name(&self.agent_name))
    }
}

impl Config {
    /// Load configuration from the default location (~/.weave/config.toml)
    ///
    /// If the configuration file doesn't exist, writes a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read or written
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(&Config::default())
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, &toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        Self::from_toml_str(&toml_string)
    }

    /// Get the default configuration file path (~/.weave/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".weave").join("config.toml"))
    }

    /// Resolved SQLite file path
    pub fn database_path(&self) -> PathBuf {
        if self.database.path.is_absolute() {
            self.database.path.clone()
        } else {
            self.core.data_dir.join(&self.database.path)
        }
    }

    /// Validate values, expand ~ in paths and create the data directory
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.core.agent_name.trim().is_empty() {
            return Err(EngineError::Config("agent_name must not be empty".to_string()));
        }

        if self.cache.max_size == 0 {
            return Err(EngineError::Config(
                "cache.max_size must be greater than 0".to_string(),
            ));
        }
        if self.cache.ttl_secs == 0 {
            return Err(EngineError::Config(
                "cache.ttl_secs must be greater than 0".to_string(),
            ));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        self.database.path = expand_path(&self.database.path)?;

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn with_data_dir(dir: &TempDir, extra: &str) -> String {
        format!(
            "[core]\ndata_dir = {:?}\n{}",
            dir.path().join("data").display().to_string(),
            extra
        )
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.core.agent_name, "weave");
        assert_eq!(config.history.recent_limit, 20);
        assert_eq!(config.history.relevant_limit, 20);
        assert_eq!(config.cache.max_size, 1000);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let text = with_data_dir(&dir, "[history]\nrecent_limit = 5\n");
        let config = Config::from_toml_str(&text).unwrap();

        assert_eq!(config.history.recent_limit, 5);
        assert_eq!(config.history.relevant_limit, 20);
        assert!(config.core.data_dir.is_dir());
        assert_eq!(config.database_path(), dir.path().join("data").join("weave.db"));
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let dir = TempDir::new().unwrap();
        let text = with_data_dir(&dir, "log_level = \"loud\"\n");
        let err = Config::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("Invalid log level"));
    }

    #[test]
    fn test_zero_cache_size_rejected() {
        let dir = TempDir::new().unwrap();
        let text = with_data_dir(&dir, "[cache]\nmax_size = 0\n");
        assert!(matches!(
            Config::from_toml_str(&text),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, with_data_dir(&dir, "agent_name = \"sage\"\n")).unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.core.agent_name, "sage");
        assert_eq!(config.core.agent_id(), Id::from_name("sage"));
    }

    #[test]
    fn test_cache_section_conversion() {
        let cache = CacheSection {
            max_size: 10,
            ttl_secs: 30,
            cleanup_period_secs: 5,
        }
        .to_cache_config();
        assert_eq!(cache.ttl, Duration::from_secs(30));
        assert_eq!(cache.cleanup_period, Duration::from_secs(5));
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let expanded = expand_path(&PathBuf::from("~/test")).unwrap();
        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        assert_eq!(expand_path(&path).unwrap(), path);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_string = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.history, deserialized.history);
    }
}
