// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Tracing subscriber setup from a [`LoggingConfig`].
//!
//! Library crates only emit `tracing` events. Applications call
//! [`init_logging`] once at startup.

use std::io::IsTerminal;

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{LogFormat, LogLevel, LoggingConfig};

// =============================================================================
// Logging Initialization
// =============================================================================

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level and directives.
/// Fails if a global subscriber is already installed.
///
/// ```ignore
/// use xmlda_config::{init_logging, load_config};
///
/// let file = load_config("xmlda.yaml")?;
/// init_logging(&file.logging)?;
/// ```
pub fn init_logging(config: &LoggingConfig) -> ConfigResult<()> {
    let filter = build_filter(config)?;
    let ansi = std::io::stdout().is_terminal();

    let result = match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(config.with_target)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(ansi),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(config.with_target)
                    .with_file(true)
                    .with_line_number(true)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_ansi(ansi),
            )
            .try_init(),
    };

    result.map_err(|e| ConfigError::logging(e.to_string()))
}

/// Builds the filter: `RUST_LOG` if set and valid, otherwise the configured
/// level and directives.
pub fn build_filter(config: &LoggingConfig) -> ConfigResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(config.filter())
        .map_err(|e| ConfigError::validation("logging.directives", e.to_string()))
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
