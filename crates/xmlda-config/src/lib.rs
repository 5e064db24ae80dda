// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # xmlda-config
//!
//! Configuration files and logging setup for the OPC XML-DA client engine.
//!
//! ## Features
//!
//! - **Multi-Format Support**: YAML, TOML and JSON configuration files
//! - **Placeholders**: `${VAR}` and `${VAR:default}` resolved before parsing
//! - **Environment Overrides**: `XMLDA_*` variables win over file values
//! - **Logging**: tracing subscriber setup from the `logging` section
//!
//! ## Quick Start
//!
//! ```no_run
//! use xmlda_config::{init_logging, load_config};
//!
//! let file = load_config("xmlda.yaml")?;
//! init_logging(&file.logging)?;
//!
//! println!("Endpoint: {}", file.client.endpoint);
//! # Ok::<(), xmlda_config::ConfigError>(())
//! ```
//!
//! ## Configuration Schema
//!
//! - `client` - [`xmlda_client::ClientConfig`]: endpoint, timeouts,
//!   subscription defaults and recovery policy
//! - `logging` - level, format and extra filter directives

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod loader;
pub mod logging;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    load_config, load_config_str, save_config, ConfigFormat, ConfigLoader, ConfigLoaderBuilder,
    DEFAULT_ENV_PREFIX,
};
pub use logging::{build_filter, init_logging};
pub use schema::{ConfigFile, LogFormat, LogLevel, LoggingConfig};
