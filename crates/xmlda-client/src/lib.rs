// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC XML-DA client engine.
//!
//! This crate drives the client side of OPC XML-DA: it subscribes item
//! groups, polls them with SubscriptionPolledRefresh, reconciles the values
//! against a last-known cache so consumers only see genuine changes, and
//! recovers from transport failures by backing off or resubscribing.
//! Encoding requests as SOAP is left to the transport.
//!
//! # Features
//!
//! - All eight operations as typed records (Read, Write, Subscribe,
//!   SubscriptionPolledRefresh, SubscriptionCancel, GetStatus,
//!   GetProperties, Browse)
//! - Per-subscription sequential polling with server-revised intervals
//! - Timestamp-ordered value cache with change suppression
//! - Exponential backoff, poll failure tracking and automatic resubscription
//! - Observer, channel, broadcast and closure based listeners
//!
//! # Error Handling
//!
//! ```text
//! XmlDaError
//! ├── Transport     - Timeout or connection failure
//! ├── ServerFault   - SOAP fault returned by the server
//! ├── Protocol      - Reply with an unexpected shape
//! ├── Item          - A single item failed
//! ├── Registry      - Handle bookkeeping failure
//! ├── Subscription  - Subscription lifecycle failure
//! └── Configuration - Invalid settings
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use xmlda_client::{ClientConfig, XmlDaClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .endpoint("http://gateway:8080/OPC/DA")
//!         .build()?;
//!
//!     let (client, mut events) = XmlDaClient::with_channel(config, MyTransport::new())?;
//!     let id = client.subscribe(["Tank.Level"], Duration::from_secs(1)).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!
//!     client.cancel(id).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod error;
pub mod types;

pub use error::{
    ConfigurationError, ErrorCode, ErrorSeverity, ItemError, ProtocolViolation, RegistryError,
    SubscriptionError, XmlDaError, XmlDaResult,
};

pub use types::{
    ClientConfig, ClientConfigBuilder, ClientItemHandle, ItemIdentity, ResultCode,
    ServerItemHandle, ServerSubHandle, SubscriptionDefaults, SubscriptionId,
};

pub use client::{
    ChannelListener, ClientStats, ReadOutcome, RecoveryPolicy, SubscriptionEvent,
    SubscriptionListener, SubscriptionRequest, SubscriptionState, ValueChange, WriteOutcome,
    XmlDaClient, XmlDaTransport,
};

pub use xmlda_core::{InvokeError, InvokeResult, Quality, TransportError, Value};
