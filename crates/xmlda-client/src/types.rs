// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Identifiers and client configuration.
//!
//! # Identifiers
//!
//! | type                | assigned by | scope                         |
//! |---------------------|-------------|-------------------------------|
//! | [`ItemIdentity`]    | server      | server address space          |
//! | [`ClientItemHandle`]| client      | one registry, stable per item |
//! | [`ServerItemHandle`]| server      | one subscription              |
//! | [`ServerSubHandle`] | server      | one Subscribe reply           |
//! | [`SubscriptionId`]  | client      | one manager, never reused     |

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::RecoveryPolicy;
use crate::error::{ConfigurationError, XmlDaError, XmlDaResult};

// =============================================================================
// Item Identity
// =============================================================================

/// Server-addressable identity of an item: `{ItemPath, ItemName}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemIdentity {
    /// Item path. Empty when the server uses flat names.
    #[serde(default)]
    pub item_path: String,
    /// Item name.
    pub item_name: String,
}

impl ItemIdentity {
    /// Creates an identity from path and name.
    pub fn new(item_path: impl Into<String>, item_name: impl Into<String>) -> Self {
        Self {
            item_path: item_path.into(),
            item_name: item_name.into(),
        }
    }

    /// Creates an identity with an empty path.
    pub fn named(item_name: impl Into<String>) -> Self {
        Self::new(String::new(), item_name)
    }

    /// Returns the path, or `None` when it is empty.
    pub fn path(&self) -> Option<&str> {
        if self.item_path.is_empty() {
            None
        } else {
            Some(&self.item_path)
        }
    }
}

impl fmt::Display for ItemIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.path() {
            Some(path) => write!(f, "{}/{}", path, self.item_name),
            None => write!(f, "{}", self.item_name),
        }
    }
}

impl From<&str> for ItemIdentity {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

// =============================================================================
// Handles
// =============================================================================

macro_rules! string_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Creates a handle.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the handle text.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_handle!(
    /// Client-chosen item handle, echoed back by the server in item values.
    ClientItemHandle
);

string_handle!(
    /// Opaque server-assigned item handle, valid while its subscription is active.
    ServerItemHandle
);

string_handle!(
    /// Opaque server-assigned subscription handle (`ServerSubHandle`).
    ServerSubHandle
);

/// Locally assigned subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl SubscriptionId {
    /// Creates a new subscription ID.
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

impl From<u64> for SubscriptionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// =============================================================================
// Result Codes
// =============================================================================

/// OPC XML-DA result code (`ResultID` qualified name without namespace).
///
/// Codes starting with `E_` are failures; `S_` codes are successes that
/// carry extra information (e.g. a clamped value or a revised rate).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultCode(pub String);

impl ResultCode {
    /// Access denied.
    pub const E_ACCESS_DENIED: &'static str = "E_ACCESS_DENIED";
    /// Value type not supported.
    pub const E_BADTYPE: &'static str = "E_BADTYPE";
    /// Non-specific failure.
    pub const E_FAIL: &'static str = "E_FAIL";
    /// Continuation point no longer valid.
    pub const E_INVALIDCONTINUATIONPOINT: &'static str = "E_INVALIDCONTINUATIONPOINT";
    /// Hold time in the past or too long.
    pub const E_INVALIDHOLDTIME: &'static str = "E_INVALIDHOLDTIME";
    /// Item name syntax invalid.
    pub const E_INVALIDITEMNAME: &'static str = "E_INVALIDITEMNAME";
    /// Item path syntax invalid.
    pub const E_INVALIDITEMPATH: &'static str = "E_INVALIDITEMPATH";
    /// Unknown subscription handle.
    pub const E_NOSUBSCRIPTION: &'static str = "E_NOSUBSCRIPTION";
    /// Item is read only.
    pub const E_READONLY: &'static str = "E_READONLY";
    /// Item does not exist.
    pub const E_UNKNOWNITEMNAME: &'static str = "E_UNKNOWNITEMNAME";
    /// Item path does not exist.
    pub const E_UNKNOWNITEMPATH: &'static str = "E_UNKNOWNITEMPATH";
    /// Item is write only.
    pub const E_WRITEONLY: &'static str = "E_WRITEONLY";
    /// Written value was clamped.
    pub const S_CLAMP: &'static str = "S_CLAMP";
    /// Requested rate was revised.
    pub const S_UNSUPPORTEDRATE: &'static str = "S_UNSUPPORTEDRATE";

    /// Creates a result code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the code text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for failure codes.
    pub fn is_error(&self) -> bool {
        self.0.starts_with("E_")
    }

    /// Returns `true` for success codes.
    pub fn is_success(&self) -> bool {
        !self.is_error()
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResultCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Default ping rate: a subscription not polled within this window expires
/// on the server.
pub const DEFAULT_PING_RATE: Duration = Duration::from_secs(30);

/// Default hold time of a polled refresh.
pub const DEFAULT_HOLD_TIME: Duration = Duration::from_secs(1);

/// Default wait time of a polled refresh.
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(10);

/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Defaults applied to every subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionDefaults {
    /// Window within which the server expects a poll.
    #[serde(default = "default_ping_rate", with = "humantime_serde")]
    pub ping_rate: Duration,

    /// Minimum time the server holds a polled refresh before replying.
    #[serde(default = "default_hold_time", with = "humantime_serde")]
    pub hold_time: Option<Duration>,

    /// Additional time the server waits for a change after the hold time.
    #[serde(default = "default_wait_time", with = "humantime_serde")]
    pub wait_time: Option<Duration>,

    /// Percent deadband for analog items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadband: Option<f32>,

    /// Ask the server to buffer intermediate values.
    #[serde(default)]
    pub enable_buffering: bool,

    /// Ask for initial values in the Subscribe reply.
    #[serde(default = "default_true")]
    pub return_values_on_reply: bool,

    /// Smallest polling interval a caller may request.
    #[serde(default = "default_min_interval", with = "humantime_serde")]
    pub min_interval: Duration,
}

fn default_ping_rate() -> Duration {
    DEFAULT_PING_RATE
}

fn default_hold_time() -> Option<Duration> {
    Some(DEFAULT_HOLD_TIME)
}

fn default_wait_time() -> Option<Duration> {
    Some(DEFAULT_WAIT_TIME)
}

fn default_min_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_true() -> bool {
    true
}

impl Default for SubscriptionDefaults {
    fn default() -> Self {
        Self {
            ping_rate: default_ping_rate(),
            hold_time: default_hold_time(),
            wait_time: default_wait_time(),
            deadband: None,
            enable_buffering: false,
            return_values_on_reply: true,
            min_interval: default_min_interval(),
        }
    }
}

impl SubscriptionDefaults {
    /// Time a polled refresh may legitimately stay open on the server.
    pub fn max_poll_hold(&self) -> Duration {
        self.hold_time.unwrap_or_default() + self.wait_time.unwrap_or_default()
    }
}

/// Configuration of an OPC XML-DA client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server endpoint URL (e.g. `http://plc-gw:8080/OPC/DA`).
    pub endpoint: String,

    /// Timeout applied to every request.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Locale for server text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale_id: Option<String>,

    /// Subscription defaults.
    #[serde(default)]
    pub subscription: SubscriptionDefaults,

    /// Retry and resubscription policy.
    #[serde(default)]
    pub recovery: RecoveryPolicy,

    /// Capacity of channel based listeners.
    #[serde(default = "default_listener_capacity")]
    pub listener_capacity: usize,
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_listener_capacity() -> usize {
    1024
}

impl ClientConfig {
    /// Creates a configuration with defaults for the given endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            request_timeout: default_request_timeout(),
            locale_id: None,
            subscription: SubscriptionDefaults::default(),
            recovery: RecoveryPolicy::default(),
            listener_capacity: default_listener_capacity(),
        }
    }

    /// Creates a builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> XmlDaResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(XmlDaError::Configuration(ConfigurationError::MissingField {
                field: "endpoint".to_string(),
            }));
        }

        if self.request_timeout.is_zero() {
            return Err(XmlDaError::invalid_config(
                "request_timeout",
                "must be greater than zero",
            ));
        }

        let hold = self.subscription.max_poll_hold();
        if self.request_timeout <= hold {
            return Err(XmlDaError::invalid_config(
                "request_timeout",
                format!(
                    "{:?} does not exceed hold time plus wait time ({:?})",
                    self.request_timeout, hold
                ),
            ));
        }

        if self.subscription.ping_rate.is_zero() {
            return Err(XmlDaError::invalid_config(
                "subscription.ping_rate",
                "must be greater than zero",
            ));
        }

        if let Some(deadband) = self.subscription.deadband {
            if !(0.0..=100.0).contains(&deadband) {
                return Err(XmlDaError::invalid_config(
                    "subscription.deadband",
                    format!("{deadband} is outside 0..=100 percent"),
                ));
            }
        }

        if self.listener_capacity == 0 {
            return Err(XmlDaError::invalid_config(
                "listener_capacity",
                "must be greater than zero",
            ));
        }

        self.recovery.validate()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    endpoint: Option<String>,
    request_timeout: Option<Duration>,
    locale_id: Option<String>,
    subscription: Option<SubscriptionDefaults>,
    recovery: Option<RecoveryPolicy>,
    listener_capacity: Option<usize>,
}

impl ClientConfigBuilder {
    /// Sets the endpoint URL.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the locale.
    pub fn locale_id(mut self, locale: impl Into<String>) -> Self {
        self.locale_id = Some(locale.into());
        self
    }

    /// Sets the subscription defaults.
    pub fn subscription(mut self, defaults: SubscriptionDefaults) -> Self {
        self.subscription = Some(defaults);
        self
    }

    /// Sets the recovery policy.
    pub fn recovery(mut self, policy: RecoveryPolicy) -> Self {
        self.recovery = Some(policy);
        self
    }

    /// Sets the listener channel capacity.
    pub fn listener_capacity(mut self, capacity: usize) -> Self {
        self.listener_capacity = Some(capacity);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> XmlDaResult<ClientConfig> {
        let mut config = ClientConfig::new(self.endpoint.unwrap_or_default());
        if let Some(timeout) = self.request_timeout {
            config.request_timeout = timeout;
        }
        config.locale_id = self.locale_id;
        if let Some(subscription) = self.subscription {
            config.subscription = subscription;
        }
        if let Some(recovery) = self.recovery {
            config.recovery = recovery;
        }
        if let Some(capacity) = self.listener_capacity {
            config.listener_capacity = capacity;
        }

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_identity_display() {
        assert_eq!(ItemIdentity::named("Tank.Level").to_string(), "Tank.Level");
        assert_eq!(
            ItemIdentity::new("Plant/Area1", "Tank.Level").to_string(),
            "Plant/Area1/Tank.Level"
        );
        assert_eq!(ItemIdentity::named("x").path(), None);
    }

    #[test]
    fn test_result_code_classification() {
        assert!(ResultCode::new(ResultCode::E_UNKNOWNITEMNAME).is_error());
        assert!(ResultCode::new(ResultCode::S_CLAMP).is_success());
        assert!(ResultCode::new("S_OK").is_success());
    }

    #[test]
    fn test_subscription_id_display() {
        assert_eq!(SubscriptionId::new(7).to_string(), "sub-7");
        assert_eq!(SubscriptionId::from(7).value(), 7);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::new("http://localhost:8080/OPC/DA");
        assert!(config.validate().is_ok());
        assert_eq!(config.subscription.ping_rate, Duration::from_secs(30));
        assert_eq!(config.subscription.hold_time, Some(Duration::from_secs(1)));
        assert_eq!(config.subscription.wait_time, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_builder_rejects_missing_endpoint() {
        let result = ClientConfig::builder().build();
        assert!(matches!(
            result,
            Err(XmlDaError::Configuration(ConfigurationError::MissingField { .. }))
        ));
    }

    #[test]
    fn test_timeout_must_exceed_poll_hold() {
        let result = ClientConfig::builder()
            .endpoint("http://localhost/OPC/DA")
            .request_timeout(Duration::from_secs(5))
            .build();
        assert!(result.is_err());

        let result = ClientConfig::builder()
            .endpoint("http://localhost/OPC/DA")
            .request_timeout(Duration::from_secs(5))
            .subscription(SubscriptionDefaults {
                hold_time: None,
                wait_time: Some(Duration::from_secs(2)),
                ..Default::default()
            })
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_deadband_range() {
        let mut config = ClientConfig::new("http://localhost/OPC/DA");
        config.subscription.deadband = Some(150.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_deserializes_humantime() {
        let json = r#"{
            "endpoint": "http://localhost/OPC/DA",
            "request_timeout": "45s",
            "subscription": { "ping_rate": "1m", "hold_time": null, "wait_time": "500ms" }
        }"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(45));
        assert_eq!(config.subscription.ping_rate, Duration::from_secs(60));
        assert_eq!(config.subscription.hold_time, None);
        assert_eq!(config.subscription.wait_time, Some(Duration::from_millis(500)));
        assert!(config.subscription.return_values_on_reply);
        assert_eq!(config.recovery.resubscribe_threshold, 3);
    }
}
