// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # XML-DA Integration Tests
//!
//! Shared test support and cross-crate integration tests for the OPC XML-DA
//! client engine.
//!
//! ## Module Structure
//!
//! - [`common`]: shared utilities
//!   - `mocks`: `ScriptedTransport` and `EventLog`
//!   - `fixtures`: configurations, clients and reply items
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p xmlda-tests
//! cargo test -p xmlda-tests --test integration_subscription
//! RUST_LOG=xmlda_client=trace cargo test -p xmlda-tests -- --nocapture
//! ```
//!
//! ## Test Suites
//!
//! - `integration_subscription.rs`: cadence, change suppression, cancel,
//!   partial failures, invalidated handles
//! - `integration_recovery.rs`: Subscribe retries, poll backoff,
//!   resubscription
//! - `integration_reconciler.rs`: no-regression property
//! - `integration_client.rs`: one-shot operations through the facade
//! - `integration_config.rs`: loading files into a working client
//!
//! Time-dependent tests run with `#[tokio::test(start_paused = true)]`, so
//! the send times recorded by `ScriptedTransport` are virtual and exact.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::fixtures::*;
    pub use crate::common::init_test_logging;
    pub use crate::common::mocks::*;
}
