// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC XML-DA client error types.
//!
//! # Error Categories
//!
//! ```text
//! XmlDaError
//! ├── Transport      - timeout / connection failure (retried by the recovery layer)
//! ├── ServerFault    - protocol-level rejection (never retried here)
//! ├── Protocol       - malformed or unexpected response shape
//! ├── Item           - per-item failure inside a successful batch
//! ├── Registry       - item handle bookkeeping
//! ├── Subscription   - subscription lifecycle failures
//! └── Configuration  - invalid settings
//! ```
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use xmlda_client::error::{ErrorSeverity, XmlDaError};
//! use xmlda_core::TransportError;
//!
//! let error = XmlDaError::from(TransportError::timeout("Read", Duration::from_secs(5)));
//! assert!(error.is_retryable());
//! assert_eq!(error.severity(), ErrorSeverity::Warning);
//! assert_eq!(error.error_code().to_string(), "XD-0101");
//! ```

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;
use xmlda_core::{InvokeError, TransportError};

use crate::types::{ClientItemHandle, ItemIdentity, ResultCode, ServerItemHandle, SubscriptionId};

// =============================================================================
// XmlDaError - Main Error Type
// =============================================================================

/// The main error type of the client engine.
#[derive(Debug, Clone, Error)]
pub enum XmlDaError {
    /// Timeout or connection failure.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// The server rejected the request.
    #[error("Server fault during {operation}: {code}: {message}")]
    ServerFault {
        /// Operation name.
        operation: String,
        /// Fault code.
        code: String,
        /// Fault text.
        message: String,
    },

    /// The response did not have the expected shape.
    #[error("{0}")]
    Protocol(#[from] ProtocolViolation),

    /// A single item failed.
    #[error("{0}")]
    Item(#[from] ItemError),

    /// Item handle bookkeeping failed.
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// Subscription lifecycle failure.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),

    /// Invalid configuration.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),
}

/// Result type for client operations.
pub type XmlDaResult<T> = Result<T, XmlDaError>;

impl XmlDaError {
    // =========================================================================
    // Factory Methods
    // =========================================================================

    /// Converts a transport outcome, attaching the operation name to faults.
    pub fn from_invoke(operation: &str, error: InvokeError) -> Self {
        match error {
            InvokeError::Transport(e) => Self::Transport(e),
            InvokeError::ServerFault { code, message } => Self::ServerFault {
                operation: operation.to_string(),
                code,
                message,
            },
            InvokeError::Decode { operation, message } => {
                Self::Protocol(ProtocolViolation::Decode { operation, message })
            }
        }
    }

    /// Creates a timeout error.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Transport(TransportError::timeout(operation, duration))
    }

    /// Creates a configuration error for an invalid value.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration(ConfigurationError::InvalidValue {
            field: field.into(),
            message: message.into(),
        })
    }

    // =========================================================================
    // Error Properties
    // =========================================================================

    /// Returns `true` if a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Transport(_) => ErrorSeverity::Warning,
            Self::Item(_) => ErrorSeverity::Warning,
            Self::ServerFault { .. } => ErrorSeverity::Error,
            Self::Protocol(_) => ErrorSeverity::Error,
            Self::Registry(_) => ErrorSeverity::Error,
            Self::Subscription(e) => e.severity(),
            Self::Configuration(_) => ErrorSeverity::Critical,
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::ServerFault { .. } => "server_fault",
            Self::Protocol(_) => "protocol",
            Self::Item(_) => "item",
            Self::Registry(_) => "registry",
            Self::Subscription(_) => "subscription",
            Self::Configuration(_) => "configuration",
        }
    }

    /// Returns a structured error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Transport(TransportError::Timeout { .. }) => ErrorCode::new(1, 1),
            Self::Transport(TransportError::Connection { .. }) => ErrorCode::new(1, 2),
            Self::ServerFault { .. } => ErrorCode::new(2, 1),
            Self::Protocol(e) => ErrorCode::new(3, e.code()),
            Self::Item(_) => ErrorCode::new(4, 1),
            Self::Registry(e) => ErrorCode::new(5, e.code()),
            Self::Subscription(e) => ErrorCode::new(6, e.code()),
            Self::Configuration(_) => ErrorCode::new(7, 1),
        }
    }

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Logs this error with appropriate level and context.
    pub fn log(&self, context: &str) {
        let code = self.error_code();

        match self.tracing_level() {
            Level::ERROR => tracing::error!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            _ => tracing::debug!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
        }
    }
}

// =============================================================================
// ProtocolViolation
// =============================================================================

/// The codec or server produced a response the engine cannot interpret.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// A response of the wrong operation came back.
    #[error("Expected {expected} response, received {actual}")]
    UnexpectedResponse {
        /// Requested operation.
        expected: String,
        /// Operation of the received response.
        actual: String,
    },

    /// A mandatory field is absent.
    #[error("{operation} response is missing {field}")]
    MissingField {
        /// Operation name.
        operation: String,
        /// Field name.
        field: String,
    },

    /// The wire payload could not be decoded.
    #[error("{operation} response could not be decoded: {message}")]
    Decode {
        /// Operation name.
        operation: String,
        /// Decoder message.
        message: String,
    },
}

impl ProtocolViolation {
    /// Creates a missing field violation.
    pub fn missing_field(operation: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            operation: operation.into(),
            field: field.into(),
        }
    }

    fn code(&self) -> u8 {
        match self {
            Self::UnexpectedResponse { .. } => 1,
            Self::MissingField { .. } => 2,
            Self::Decode { .. } => 3,
        }
    }
}

// =============================================================================
// ItemError
// =============================================================================

/// A per-item failure reported inside an otherwise successful response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Item '{item}' failed with {code}{}", .text.as_ref().map(|t| format!(": {t}")).unwrap_or_default())]
pub struct ItemError {
    /// The failing item.
    pub item: ItemIdentity,
    /// OPC XML-DA result code.
    pub code: ResultCode,
    /// Error text from the server, when it returned one.
    pub text: Option<String>,
}

impl ItemError {
    /// Creates an item error.
    pub fn new(item: ItemIdentity, code: ResultCode, text: Option<String>) -> Self {
        Self { item, code, text }
    }
}

// =============================================================================
// RegistryError
// =============================================================================

/// Item registry failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The client handle is already bound to another server handle.
    #[error("Client handle {client} is already bound to {bound}, cannot bind to {requested}")]
    DuplicateHandle {
        /// Client handle.
        client: ClientItemHandle,
        /// Existing server handle.
        bound: ServerItemHandle,
        /// Rejected server handle.
        requested: ServerItemHandle,
    },

    /// No item is bound to the server handle.
    #[error("No item bound to server handle {server} in {subscription}")]
    NotFound {
        /// Owning subscription.
        subscription: SubscriptionId,
        /// Server handle.
        server: ServerItemHandle,
    },

    /// The client handle was never registered.
    #[error("Unknown client handle {client}")]
    UnknownClientHandle {
        /// Client handle.
        client: ClientItemHandle,
    },
}

impl RegistryError {
    fn code(&self) -> u8 {
        match self {
            Self::DuplicateHandle { .. } => 1,
            Self::NotFound { .. } => 2,
            Self::UnknownClientHandle { .. } => 3,
        }
    }
}

// =============================================================================
// SubscriptionError
// =============================================================================

/// Subscription lifecycle failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// No live subscription with this id.
    #[error("Subscription {id} not found")]
    NotFound {
        /// Subscription id.
        id: SubscriptionId,
    },

    /// The server refused the Subscribe request.
    #[error("Subscription {id} rejected: {reason}")]
    Rejected {
        /// Subscription id.
        id: SubscriptionId,
        /// Fault or violation text.
        reason: String,
    },

    /// The server reported the subscription handle as invalid.
    #[error("Subscription {id} invalidated by server (handle {handle})")]
    Invalidated {
        /// Subscription id.
        id: SubscriptionId,
        /// Server subscription handle.
        handle: String,
    },

    /// Subscribe kept failing at the transport level.
    #[error("Subscription {id} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Subscription id.
        id: SubscriptionId,
        /// Attempts made.
        attempts: u32,
        /// Last transport error.
        last_error: String,
    },

    /// The subscription was cancelled before it became active.
    #[error("Subscription {id} was cancelled")]
    Cancelled {
        /// Subscription id.
        id: SubscriptionId,
    },

    /// A subscription needs at least one item.
    #[error("Subscription requires at least one item")]
    NoItems,

    /// The requested interval is unusable.
    #[error("Invalid polling interval {interval:?}: {reason}")]
    InvalidInterval {
        /// Requested interval.
        interval: Duration,
        /// Reason.
        reason: String,
    },
}

impl SubscriptionError {
    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotFound { .. } | Self::Cancelled { .. } => ErrorSeverity::Info,
            Self::NoItems | Self::InvalidInterval { .. } => ErrorSeverity::Warning,
            Self::Rejected { .. } | Self::Invalidated { .. } | Self::RetriesExhausted { .. } => {
                ErrorSeverity::Error
            }
        }
    }

    fn code(&self) -> u8 {
        match self {
            Self::NotFound { .. } => 1,
            Self::Rejected { .. } => 2,
            Self::Invalidated { .. } => 3,
            Self::RetriesExhausted { .. } => 4,
            Self::Cancelled { .. } => 5,
            Self::NoItems => 6,
            Self::InvalidInterval { .. } => 7,
        }
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Invalid client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// A required field is empty.
    #[error("Missing required field: {field}")]
    MissingField {
        /// Field name.
        field: String,
    },

    /// A field has an unusable value.
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Reason.
        message: String,
    },
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational - no action required.
    Info,
    /// Warning - handled or partial.
    Warning,
    /// Error - an operation or subscription was lost.
    Error,
    /// Critical - the client cannot run.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// ErrorCode
// =============================================================================

/// Structured error code, rendered as `XD-CCNN`.
///
/// Categories: 1 transport, 2 server fault, 3 protocol, 4 item,
/// 5 registry, 6 subscription, 7 configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category.
    pub category: u8,
    /// Specific error within category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "XD-{:02X}{:02X}", self.category, self.code)
    }
}

// =============================================================================
// Tests
// =============================================================================
