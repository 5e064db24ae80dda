// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Pre-built configurations, clients and reply items.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use xmlda_client::client::messages::ItemValue;
use xmlda_client::{ClientConfig, RecoveryPolicy, Value, XmlDaClient};
use xmlda_core::{Quality, RetryConfig};

use super::mocks::{server_item_handle, EventLog, ScriptedTransport};

/// Endpoint used by every fixture.
pub const TEST_ENDPOINT: &str = "http://plc-gateway:8080/OPC/DA";

// =============================================================================
// Configuration Fixtures
// =============================================================================

/// Configuration fixtures.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// Defaults with the test endpoint.
    pub fn default_client() -> ClientConfig {
        ClientConfig::new(TEST_ENDPOINT)
    }

    /// Subscribe retries capped at `attempts`, fast backoff.
    pub fn with_subscribe_attempts(attempts: u32) -> ClientConfig {
        let mut config = Self::default_client();
        config.recovery = RecoveryPolicy::default().with_subscribe_retry(
            RetryConfig::new()
                .with_max_attempts(attempts)
                .with_initial_delay(Duration::from_millis(100))
                .with_multiplier(2.0)
                .with_max_delay(Duration::from_secs(1)),
        );
        config
    }

    /// A YAML configuration file body.
    pub fn yaml() -> String {
        format!(
            r#"
client:
  endpoint: {TEST_ENDPOINT}
  request_timeout: 20s
  subscription:
    ping_rate: 10s
    hold_time: 500ms
    wait_time: 5s
  recovery:
    resubscribe_threshold: 2
    subscribe:
      max_attempts: 3
      initial_delay_ms: 200
logging:
  level: debug
  format: compact
"#
        )
    }
}

// =============================================================================
// Client Fixtures
// =============================================================================

/// A client over a scripted transport with an event log.
pub struct TestClient {
    /// The client.
    pub client: XmlDaClient<Arc<ScriptedTransport>>,
    /// The transport, shared with the client.
    pub transport: Arc<ScriptedTransport>,
    /// Every event the client reported.
    pub events: Arc<EventLog>,
}

impl TestClient {
    /// Builds a client with default configuration.
    pub fn new(transport: ScriptedTransport) -> Self {
        Self::with_config(ConfigFixtures::default_client(), transport)
    }

    /// Builds a client with `config`.
    pub fn with_config(config: ClientConfig, transport: ScriptedTransport) -> Self {
        let transport = Arc::new(transport);
        let events = EventLog::new();
        let client = XmlDaClient::new(config, Arc::clone(&transport), events.clone())
            .expect("test configuration must be valid");
        Self {
            client,
            transport,
            events,
        }
    }
}

// =============================================================================
// Item Fixtures
// =============================================================================

/// A fixed timestamp `seconds` after a reference instant.
pub fn ts(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0)
        .single()
        .expect("valid timestamp")
}

/// A good-quality poll item addressed by the default server handle.
pub fn polled(name: &str, value: impl Into<Value>, seconds: i64) -> ItemValue {
    polled_with_quality(name, value, Quality::GOOD, seconds)
}

/// A poll item with an explicit quality.
pub fn polled_with_quality(
    name: &str,
    value: impl Into<Value>,
    quality: Quality,
    seconds: i64,
) -> ItemValue {
    ItemValue::new(name)
        .with_server_handle(server_item_handle(name))
        .with_value(value)
        .with_quality(quality)
        .with_timestamp(ts(seconds))
}

/// A failed poll item.
pub fn polled_failure(name: &str, code: &str) -> ItemValue {
    ItemValue::new(name)
        .with_server_handle(server_item_handle(name))
        .with_result(code)
}
