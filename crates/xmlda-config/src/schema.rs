// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration file schema.
//!
//! ```text
//! ConfigFile
//! ├── client: ClientConfig
//! │   ├── endpoint, request_timeout, locale_id, listener_capacity
//! │   ├── subscription: SubscriptionDefaults
//! │   └── recovery: RecoveryPolicy
//! └── logging: LoggingConfig
//! ```
//!
//! Example (YAML):
//!
//! ```yaml
//! client:
//!   endpoint: http://gateway:8080/OPC/DA
//!   request_timeout: 30s
//!   subscription:
//!     ping_rate: 30s
//!     hold_time: 1s
//!     wait_time: 10s
//!   recovery:
//!     resubscribe_threshold: 3
//! logging:
//!   level: info
//!   format: json
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use xmlda_client::ClientConfig;

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// ConfigFile
// =============================================================================

/// Root of a configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Client engine settings.
    pub client: ClientConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ConfigFile {
    /// Creates a configuration for `endpoint` with every other field at its
    /// default.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: ClientConfig::new(endpoint),
            logging: LoggingConfig::default(),
        }
    }

    /// Validates the whole file.
    pub fn validate(&self) -> ConfigResult<()> {
        self.client.validate()?;
        self.logging.validate()
    }
}

// =============================================================================
// Logging Configuration
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level. `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub level: LogLevel,

    /// Log format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include targets in log lines.
    #[serde(default = "default_with_target")]
    pub with_target: bool,

    /// Extra filter directives, e.g. `xmlda_client::client=debug`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<String>,
}

fn default_with_target() -> bool {
    true
}

impl LoggingConfig {
    /// Validates the logging configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        for directive in &self.directives {
            if directive.trim().is_empty() {
                return Err(ConfigError::validation(
                    "logging.directives",
                    "directives must not be empty",
                ));
            }
        }
        Ok(())
    }

    /// Returns the filter string built from level and directives.
    pub fn filter(&self) -> String {
        std::iter::once(self.level.as_str().to_string())
            .chain(self.directives.iter().map(|d| d.trim().to_string()))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            with_target: default_with_target(),
            directives: Vec::new(),
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the filter name of the level.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(ConfigError::validation(
                "logging.level",
                format!("unknown level '{other}'"),
            )),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Single-line compact text.
    Compact,
    /// JSON lines for log aggregation.
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::validation(
                "logging.format",
                format!("unknown format '{other}'"),
            )),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_config_file_defaults() {
        let file = ConfigFile::new("http://localhost:8080/OPC/DA");
        assert!(file.validate().is_ok());
        assert_eq!(file.logging.level, LogLevel::Info);
        assert_eq!(file.logging.format, LogFormat::Text);
        assert_eq!(file.client.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_validate_propagates_client_errors() {
        let mut file = ConfigFile::new("http://localhost:8080/OPC/DA");
        file.client.request_timeout = Duration::from_secs(5);
        assert!(matches!(
            file.validate(),
            Err(ConfigError::Validation { ref field, .. }) if field == "request_timeout"
        ));
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Error.to_string(), "error");
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_filter_string() {
        let logging = LoggingConfig {
            level: LogLevel::Warn,
            directives: vec!["xmlda_client=debug".into()],
            ..Default::default()
        };
        assert_eq!(logging.filter(), "warn,xmlda_client=debug");
        assert!(logging.validate().is_ok());
    }
}
