// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading.
//!
//! # Loading Pipeline
//!
//! 1. Read the file and pick the format from its extension
//! 2. Resolve `${VAR}` / `${VAR:default}` placeholders in the raw text
//! 3. Parse into [`ConfigFile`]
//! 4. Apply environment variable overrides
//! 5. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! XMLDA_ENDPOINT=http://gateway:8080/OPC/DA
//! XMLDA_REQUEST_TIMEOUT_MS=45000
//! XMLDA_PING_RATE_MS=20000
//! XMLDA_RESUBSCRIBE_THRESHOLD=5
//! XMLDA_LOG_LEVEL=debug
//! XMLDA_LOG_FORMAT=json
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{ConfigFile, LogFormat, LogLevel};

/// Default prefix of override variables.
pub const DEFAULT_ENV_PREFIX: &str = "XMLDA";

// =============================================================================
// ConfigLoader
// =============================================================================

/// Loads [`ConfigFile`]s from YAML, TOML or JSON.
///
/// # Examples
///
/// ```no_run
/// use xmlda_config::loader::ConfigLoader;
///
/// let file = ConfigLoader::new().load("xmlda.yaml")?;
/// println!("{}", file.client.endpoint);
/// # Ok::<(), xmlda_config::ConfigError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_prefix: String,
    resolve_env_vars: bool,
}

impl ConfigLoader {
    /// Creates a loader with the `XMLDA` prefix and placeholder resolution on.
    pub fn new() -> Self {
        Self {
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            resolve_env_vars: true,
        }
    }

    /// Creates a builder.
    pub fn builder() -> ConfigLoaderBuilder {
        ConfigLoaderBuilder::new()
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables placeholders and overrides.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Returns the environment variable prefix.
    pub fn env_prefix(&self) -> &str {
        &self.env_prefix
    }

    /// Loads configuration from a file.
    ///
    /// The format follows the extension: `.yaml`/`.yml`, `.toml` or `.json`.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<ConfigFile> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let format = ConfigFormat::from_path(path)?;
        let content = self.read_file(path)?;
        let mut file = self.parse_content(&content, format, path)?;

        self.finish(&mut file)?;
        Ok(file)
    }

    /// Loads configuration from a string.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<ConfigFile> {
        let content = self.expand(content);
        let mut file = parse_str(&content, format)?;

        self.finish(&mut file)?;
        Ok(file)
    }

    fn finish(&self, file: &mut ConfigFile) -> ConfigResult<()> {
        if self.resolve_env_vars {
            self.apply_env_overrides(file)?;
        }

        file.validate()?;

        info!(
            endpoint = %file.client.endpoint,
            request_timeout = %humantime::format_duration(file.client.request_timeout),
            ping_rate = %humantime::format_duration(file.client.subscription.ping_rate),
            resubscribe_threshold = file.client.recovery.resubscribe_threshold,
            "Configuration loaded"
        );
        Ok(())
    }

    fn read_file(&self, path: &Path) -> ConfigResult<String> {
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))
    }

    fn parse_content(
        &self,
        content: &str,
        format: ConfigFormat,
        path: &Path,
    ) -> ConfigResult<ConfigFile> {
        let content = self.expand(content);

        parse_str(&content, format).map_err(|e| match e {
            ConfigError::Serialization { message } => ConfigError::parse(path, message),
            other => other,
        })
    }

    fn expand(&self, content: &str) -> String {
        if self.resolve_env_vars {
            resolve_env_placeholders(content)
        } else {
            content.to_string()
        }
    }

    fn var_name(&self, suffix: &str) -> String {
        format!("{}_{}", self.env_prefix, suffix)
    }

    fn apply_env_overrides(&self, file: &mut ConfigFile) -> ConfigResult<()> {
        if let Ok(value) = env::var(self.var_name("ENDPOINT")) {
            debug!(endpoint = %value, "Endpoint overridden from environment");
            file.client.endpoint = value;
        }

        if let Some(millis) = self.env_u64("REQUEST_TIMEOUT_MS")? {
            file.client.request_timeout = Duration::from_millis(millis);
        }

        if let Some(millis) = self.env_u64("PING_RATE_MS")? {
            file.client.subscription.ping_rate = Duration::from_millis(millis);
        }

        if let Some(threshold) = self.env_u64("RESUBSCRIBE_THRESHOLD")? {
            let name = self.var_name("RESUBSCRIBE_THRESHOLD");
            file.client.recovery.resubscribe_threshold = u32::try_from(threshold)
                .map_err(|_| ConfigError::invalid_env_var(name, "value out of range"))?;
        }

        let name = self.var_name("LOG_LEVEL");
        if let Ok(value) = env::var(&name) {
            file.logging.level = value
                .parse::<LogLevel>()
                .map_err(|e| ConfigError::invalid_env_var(&name, e.to_string()))?;
        }

        let name = self.var_name("LOG_FORMAT");
        if let Ok(value) = env::var(&name) {
            file.logging.format = value
                .parse::<LogFormat>()
                .map_err(|e| ConfigError::invalid_env_var(&name, e.to_string()))?;
        }

        Ok(())
    }

    fn env_u64(&self, suffix: &str) -> ConfigResult<Option<u64>> {
        let name = self.var_name(suffix);
        match env::var(&name) {
            Ok(value) => value
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| ConfigError::invalid_env_var(name, "expected a non-negative integer")),
            Err(_) => Ok(None),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses `content` in the given format without any environment processing.
fn parse_str(content: &str, format: ConfigFormat) -> ConfigResult<ConfigFile> {
    match format {
        ConfigFormat::Yaml => config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Yaml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::serialization(e.to_string())),
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
        ConfigFormat::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
    }
}

/// Replaces `${VAR}` and `${VAR:default}` with the variable's value.
///
/// An unset variable without a default is left in place.
fn resolve_env_placeholders(content: &str) -> String {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find('}') else {
            result.push_str(&rest[start..]);
            return result;
        };

        let body = &after[..end];
        let (name, default) = match body.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (body, None),
        };

        match (env::var(name), default) {
            (Ok(value), _) => result.push_str(&value),
            (Err(_), Some(default)) => result.push_str(default),
            (Err(_), None) => {
                warn!(variable = name, "Environment variable not set");
                result.push_str(&rest[start..start + 2 + end + 1]);
            }
        }

        rest = &after[end + 1..];
    }

    result.push_str(rest);
    result
}

// =============================================================================
// ConfigLoaderBuilder
// =============================================================================

/// Builder for [`ConfigLoader`].
#[derive(Debug, Default)]
pub struct ConfigLoaderBuilder {
    env_prefix: Option<String>,
    resolve_env_vars: Option<bool>,
}

impl ConfigLoaderBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the environment prefix.
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Enables or disables environment processing.
    pub fn resolve_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = Some(enabled);
        self
    }

    /// Builds the loader.
    pub fn build(self) -> ConfigLoader {
        let mut loader = ConfigLoader::new();
        if let Some(prefix) = self.env_prefix {
            loader.env_prefix = prefix;
        }
        if let Some(enabled) = self.resolve_env_vars {
            loader.resolve_env_vars = enabled;
        }
        loader
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(other) => Err(ConfigError::unsupported_format(other)),
            None => Err(ConfigError::unsupported_format("(no extension)")),
        }
    }

    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yaml",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads a configuration file with the default loader.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<ConfigFile> {
    ConfigLoader::new().load(path)
}

/// Loads configuration from a string with the default loader.
pub fn load_config_str(content: &str, format: ConfigFormat) -> ConfigResult<ConfigFile> {
    ConfigLoader::new().load_from_str(content, format)
}

/// Serializes a configuration in the given format.
pub fn to_string(file: &ConfigFile, format: ConfigFormat) -> ConfigResult<String> {
    match format {
        ConfigFormat::Toml => {
            toml::to_string_pretty(file).map_err(|e| ConfigError::serialization(e.to_string()))
        }
        ConfigFormat::Json => serde_json::to_string_pretty(file)
            .map_err(|e| ConfigError::serialization(e.to_string())),
        ConfigFormat::Yaml => Err(ConfigError::unsupported_format("yaml output")),
    }
}

/// Writes a configuration to `path`, picking the format from the extension.
pub fn save_config(file: &ConfigFile, path: impl Into<PathBuf>) -> ConfigResult<()> {
    let path = path.into();
    let content = to_string(file, ConfigFormat::from_path(&path)?)?;
    fs::write(&path, content).map_err(|e| ConfigError::io(path, e))
}

// =============================================================================
// Tests
// =============================================================================
