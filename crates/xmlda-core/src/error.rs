// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transport-level error types.
//!
//! Every call across the transport boundary resolves to a response or to one
//! of the outcomes below:
//!
//! ```text
//! InvokeError
//! ├── Transport(TransportError)
//! │   ├── Timeout      - no response within the request timeout
//! │   └── Connection   - refused, reset, unreachable
//! ├── ServerFault      - SOAP fault / protocol-level rejection
//! └── Decode           - the reply could not be decoded by the wire codec
//! ```
//!
//! Transport errors are transient and eligible for retry. Server faults and
//! undecodable replies are never retried at this layer.

use std::time::Duration;

use thiserror::Error;

// =============================================================================
// TransportError
// =============================================================================

/// Network-level failure of a single request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No response within the request timeout.
    #[error("{operation} timed out after {duration:?}")]
    Timeout {
        /// Operation name.
        operation: String,
        /// Timeout that expired.
        duration: Duration,
    },

    /// The request could not be delivered or the connection broke.
    #[error("{operation} connection failure: {message}")]
    Connection {
        /// Operation name.
        operation: String,
        /// Failure description.
        message: String,
    },
}

impl TransportError {
    /// Creates a timeout error.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Creates a connection error.
    pub fn connection(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns `true` for timeouts.
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns the name of the operation that failed.
    pub fn operation(&self) -> &str {
        match self {
            Self::Timeout { operation, .. } | Self::Connection { operation, .. } => operation,
        }
    }
}

// =============================================================================
// InvokeError
// =============================================================================

/// Failure outcome of a transport `invoke`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    /// Network-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with a fault.
    #[error("server fault {code}: {message}")]
    ServerFault {
        /// Fault code (e.g. `E_NOSUBSCRIPTION`, `soap:Server`).
        code: String,
        /// Fault text.
        message: String,
    },

    /// The reply arrived but could not be decoded.
    #[error("{operation} reply could not be decoded: {message}")]
    Decode {
        /// Operation name.
        operation: String,
        /// Decoder message.
        message: String,
    },
}

impl InvokeError {
    /// Creates a server fault.
    pub fn server_fault(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ServerFault {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a timeout.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Transport(TransportError::timeout(operation, duration))
    }

    /// Creates a connection failure.
    pub fn connection(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport(TransportError::connection(operation, message))
    }

    /// Creates a decode failure.
    pub fn decode(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if a later attempt may succeed.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns the transport error, if this is one.
    pub fn as_transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(e) => Some(e),
            Self::ServerFault { .. } | Self::Decode { .. } => None,
        }
    }
}

/// Result alias for transport calls.
pub type InvokeResult<T> = Result<T, InvokeError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let error = TransportError::timeout("Read", Duration::from_secs(2));
        assert_eq!(error.to_string(), "Read timed out after 2s");
        assert!(error.is_timeout());
        assert_eq!(error.operation(), "Read");

        let error = TransportError::connection("Subscribe", "connection refused");
        assert_eq!(
            error.to_string(),
            "Subscribe connection failure: connection refused"
        );
    }

    #[test]
    fn test_invoke_error_classification() {
        assert!(InvokeError::timeout("Browse", Duration::from_millis(10)).is_transient());
        assert!(InvokeError::connection("Browse", "reset").is_transient());

        let fault = InvokeError::server_fault("E_NOSUBSCRIPTION", "unknown handle");
        assert!(!fault.is_transient());
        assert!(fault.as_transport().is_none());
        assert_eq!(
            fault.to_string(),
            "server fault E_NOSUBSCRIPTION: unknown handle"
        );

        let decode = InvokeError::decode("Read", "unexpected element");
        assert!(!decode.is_transient());
        assert_eq!(decode.to_string(), "Read reply could not be decoded: unexpected element");
    }
}
