//! Configuration file support.
//!
//! Settings for the decode workers, the default poll budget, cache purging
//! and logging, stored as versioned JSON.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use texreplace_formats::FormatSupport;

use crate::constants::{
    DEFAULT_PARALLEL_COPY_MIN_BYTES, DEFAULT_POLL_BUDGET_SECS, DEFAULT_PURGE_AFTER_SECS,
    DEFAULT_WORKER_THREADS,
};

/// Log level setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Show only errors
    Error,
    /// Show errors and warnings
    Warn,
    /// Show errors, warnings, and info messages
    #[default]
    Info,
    /// Show debug-level logging
    Debug,
    /// Show all log messages including trace
    Trace,
}

impl LogLevel {
    /// Convert to log crate's LevelFilter.
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Current configuration file format version.
/// Increment this when making breaking changes to the config format.
pub const CONFIG_VERSION: u32 = 1;

/// Replacement loader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplacerConfig {
    /// Version of the configuration file format
    pub version: u32,

    /// Log verbosity level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Number of decode worker threads
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Default readiness budget per poll, in milliseconds
    #[serde(default = "default_poll_budget_ms")]
    pub poll_budget_ms: f64,

    /// Decoded data unused for this long may be purged
    #[serde(default = "default_purge_after_secs")]
    pub purge_after_secs: u64,

    /// Copies at least this large are split across threads
    #[serde(default = "default_parallel_copy_min_bytes")]
    pub parallel_copy_min_bytes: usize,

    /// GPU compressed format support; `None` means the caller decides
    #[serde(default)]
    pub format_support: Option<FormatSupport>,
}

fn default_worker_threads() -> usize {
    DEFAULT_WORKER_THREADS
}

fn default_poll_budget_ms() -> f64 {
    DEFAULT_POLL_BUDGET_SECS * 1000.0
}

fn default_purge_after_secs() -> u64 {
    DEFAULT_PURGE_AFTER_SECS
}

fn default_parallel_copy_min_bytes() -> usize {
    DEFAULT_PARALLEL_COPY_MIN_BYTES
}

impl ReplacerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self {
            version: CONFIG_VERSION,
            log_level: LogLevel::default(),
            worker_threads: default_worker_threads(),
            poll_budget_ms: default_poll_budget_ms(),
            purge_after_secs: default_purge_after_secs(),
            parallel_copy_min_bytes: default_parallel_copy_min_bytes(),
            format_support: None,
        }
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;

        if config.version > CONFIG_VERSION {
            return Err(ConfigError::VersionTooNew {
                file_version: config.version,
                supported_version: CONFIG_VERSION,
            });
        }

        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a JSON file, creating parent directories.
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = self.to_json()?;
        std::fs::write(path, json)?;
        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Poll budget in seconds, as taken by `ReplacedTexture::is_ready`.
    pub fn poll_budget(&self) -> f64 {
        self.poll_budget_ms / 1000.0
    }

    /// Age after which unused decoded data may be purged.
    pub fn purge_after(&self) -> Duration {
        Duration::from_secs(self.purge_after_secs)
    }
}

impl Default for ReplacerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Configuration version is newer than supported
    #[error(
        "Configuration file version {file_version} is newer than supported \
         version {supported_version}"
    )]
    VersionTooNew {
        file_version: u32,
        supported_version: u32,
    },

    /// I/O error when reading/writing config
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_default() {
        let config = ReplacerConfig::from_json(r#"{ "version": 1 }"#).unwrap();
        assert_eq!(config, ReplacerConfig::new());
        assert!((config.poll_budget() - DEFAULT_POLL_BUDGET_SECS).abs() < 1e-12);
        assert_eq!(config.purge_after(), Duration::from_secs(20));
    }

    #[test]
    fn test_version_too_new() {
        let err = ReplacerConfig::from_json(r#"{ "version": 99 }"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::VersionTooNew {
                file_version: 99,
                supported_version: CONFIG_VERSION
            }
        ));
    }

    #[test]
    fn test_log_level_names() {
        let config =
            ReplacerConfig::from_json(r#"{ "version": 1, "log_level": "trace" }"#).unwrap();
        assert_eq!(config.log_level, LogLevel::Trace);
        assert_eq!(config.log_level.to_level_filter(), log::LevelFilter::Trace);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("texreplace.json");
        let mut config = ReplacerConfig::new();
        config.worker_threads = 6;
        config.format_support = Some(FormatSupport::desktop());
        config.save_to_path(&path).unwrap();

        let loaded = ReplacerConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            ReplacerConfig::from_json("not json"),
            Err(ConfigError::ParseError(_))
        ));
    }
}
