//! Engine configuration.
//!
//! Supports YAML files, environment overrides through the `config` crate
//! (`SPM__TABLE__MAX_RULES=2048`) and validation of every section.

use crate::error::{ConfigError, Result};
use crate::types::{DEFAULT_MAX_RULES, DEFAULT_PCP};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::Level;

/// Root configuration of the policy engine.
///
/// # Examples
///
/// ```
/// use spm_core::config::EngineConfig;
///
/// let config = EngineConfig::from_yaml("table:\n  max_rules: 64\n").unwrap();
/// assert_eq!(config.table.max_rules, 64);
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rule table sizing and defaults
    #[serde(default)]
    pub table: TableConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Optional rule file loaded at start-up
    #[serde(default)]
    pub rules: Option<PathBuf>,
}

impl EngineConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path.display().to_string()).into());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration through the `config` crate, layering `SPM__*`
    /// environment variables over the file.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded or merged.
    pub fn from_config_builder<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .add_source(
                config::Environment::with_prefix("SPM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        config.try_deserialize().map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any section holds an out-of-range value.
    pub fn validate(&self) -> Result<()> {
        self.table.validate()?;
        self.logging.parse_level()?;

        if self.rules.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
            return Err(ConfigError::validation_failed("rules path is empty").into());
        }

        Ok(())
    }
}

/// Rule table sizing and defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Maximum number of live rules
    #[serde(default = "default_max_rules")]
    pub max_rules: usize,

    /// PCP used when nothing matches, or when a DSCP fallback has no IP header
    #[serde(default = "default_pcp")]
    pub default_pcp: u8,
}

fn default_max_rules() -> usize {
    DEFAULT_MAX_RULES
}

fn default_pcp() -> u8 {
    DEFAULT_PCP
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            max_rules: default_max_rules(),
            default_pcp: default_pcp(),
        }
    }
}

impl TableConfig {
    /// Validates the table configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_rules == 0 {
            return Err(ConfigError::invalid_value("table.max_rules", "must be at least 1").into());
        }

        if self.default_pcp > 7 {
            return Err(ConfigError::invalid_value(
                "table.default_pcp",
                format!("{} is not a PCP value (0-7)", self.default_pcp),
            )
            .into());
        }

        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    /// Parses the log level string to a tracing Level.
    pub fn parse_level(&self) -> Result<Level> {
        self.level.parse().map_err(|_| {
            ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: format!("Invalid log level: {}", self.level),
            }
            .into()
        })
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON format for structured logging
    Json,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether counters are emitted through the `metrics` facade
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
