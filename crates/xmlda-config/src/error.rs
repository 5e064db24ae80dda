// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Errors raised while loading a client configuration.

use std::path::PathBuf;

use thiserror::Error;
use xmlda_client::{ConfigurationError, XmlDaError};

/// Why a configuration could not be produced.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but its content is not valid for its format.
    #[error("{}: {message}", .path.display())]
    Parse {
        /// File being parsed.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// A value parsed but is out of range or inconsistent.
    #[error("invalid `{field}`: {message}")]
    Validation {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// A field the client cannot run without.
    #[error("`{field}` is required")]
    MissingField {
        /// Dotted field path.
        field: String,
    },

    /// Reading or writing the file failed.
    #[error("cannot access {}: {source}", .path.display())]
    Io {
        /// File involved.
        path: PathBuf,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// No file at the given path.
    #[error("no configuration at {}", .path.display())]
    FileNotFound {
        /// Path looked up.
        path: PathBuf,
    },

    /// An override variable holds something unusable.
    #[error("environment override {name}: {message}")]
    InvalidEnvVar {
        /// Variable name, prefix included.
        name: String,
        /// What is wrong with it.
        message: String,
    },

    /// The file extension names no known format.
    #[error("cannot handle configuration format {format}")]
    UnsupportedFormat {
        /// Extension or format label.
        format: String,
    },

    /// Content-level (de)serialization failure, before a path is attached.
    #[error("{message}")]
    Serialization {
        /// Serializer message.
        message: String,
    },

    /// The tracing subscriber could not be installed.
    #[error("logging setup failed: {message}")]
    Logging {
        /// Subscriber message.
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Builds a [`ConfigError::Validation`].
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    pub(crate) fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }

    pub(crate) fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub(crate) fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub(crate) fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }
}

impl From<XmlDaError> for ConfigError {
    fn from(error: XmlDaError) -> Self {
        match error {
            XmlDaError::Configuration(ConfigurationError::MissingField { field }) => {
                Self::MissingField { field }
            }
            XmlDaError::Configuration(ConfigurationError::InvalidValue { field, message }) => {
                Self::Validation { field, message }
            }
            other => Self::validation("client", other.to_string()),
        }
    }
}

/// Result alias for this crate.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_field() {
        let error = ConfigError::validation("client.request_timeout", "must be positive");
        assert_eq!(
            error.to_string(),
            "invalid `client.request_timeout`: must be positive"
        );
        assert_eq!(
            ConfigError::file_not_found("/x.yaml").to_string(),
            "no configuration at /x.yaml"
        );
    }

    #[test]
    fn test_from_client_configuration_error() {
        let error: ConfigError =
            XmlDaError::invalid_config("subscription.ping_rate", "must be positive").into();
        assert!(matches!(
            error,
            ConfigError::Validation { ref field, .. } if field == "subscription.ping_rate"
        ));

        let error: ConfigError = XmlDaError::Configuration(ConfigurationError::MissingField {
            field: "endpoint".into(),
        })
        .into();
        assert!(matches!(error, ConfigError::MissingField { .. }));
    }
}
