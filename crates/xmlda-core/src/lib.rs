// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # xmlda-core
//!
//! Protocol-agnostic building blocks for the OPC XML-DA client engine.
//!
//! - **Types**: item [`Value`] and OPC DA [`Quality`]
//! - **Error**: the outcome set of a transport call ([`InvokeError`])
//! - **Retry**: retry strategies used for subscribe and one-shot operations
//!
//! ## Example
//!
//! ```rust
//! use xmlda_core::{Quality, QualityStatus, Value};
//!
//! let quality = Quality::from_word(0x00C0);
//! assert!(quality.is_good());
//! assert_eq!(quality.status, QualityStatus::Good);
//! assert_eq!(Value::from(7i32).as_i64(), Some(7));
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod retry;
pub mod types;

pub use error::{InvokeError, InvokeResult, TransportError};
pub use types::{LimitStatus, Quality, QualityCategory, QualityStatus, Value};

pub use retry::{ExponentialBackoff, RetryConfig, RetryDecision, RetryStrategy};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
