// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC XML-DA client engine.
//!
//! - **Messages**: typed request/response records of the eight operations
//! - **Transport**: the `invoke` boundary and its callback/codec adapters
//! - **Registry**: client handle to server handle bindings
//! - **Reconciler**: last-known values and change detection
//! - **Recovery**: backoff and resubscribe decisions
//! - **Subscriptions**: lifecycle, polling and listeners
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        XmlDaClient                              │
//! │        (read / write / browse / subscribe / cancel API)         │
//! └─────────────────────────────────────────────────────────────────┘
//!                 │                              │
//!                 ▼                              ▼
//! ┌───────────────────────────┐   ┌─────────────────────────────────┐
//! │   one-shot operations     │   │      SubscriptionManager        │
//! │   (RetryStrategy)         │   │  Subscribe → poll loop → Cancel │
//! └───────────────────────────┘   └─────────────────────────────────┘
//!                 │                   │          │           │
//!                 │                   ▼          ▼           ▼
//!                 │            ItemRegistry  ValueReconciler  RecoveryController
//!                 ▼                   │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       XmlDaTransport                            │
//! │         invoke(Request, timeout) -> Response | InvokeError      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Examples
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use xmlda_client::client::{CallbackListener, SubscriptionRequest, XmlDaClient};
//! use xmlda_client::types::ClientConfig;
//!
//! let listener = CallbackListener::new()
//!     .with_value_changed(|change| println!("{} = {}", change.item, change.value));
//!
//! let client = XmlDaClient::new(
//!     ClientConfig::new("http://gateway:8080/OPC/DA"),
//!     transport,
//!     Arc::new(listener),
//! )?;
//!
//! let request = SubscriptionRequest::new(["Tank.Level", "Tank.Temp"], Duration::from_secs(1))
//!     .with_deadband(0.5);
//! let id = client.subscribe_with(request).await?;
//!
//! // ...
//! client.shutdown().await;
//! ```

mod manager;
pub mod messages;
mod reconciler;
mod recovery;
mod registry;
pub mod subscription;
mod transport;
mod wrapper;

pub use manager::{ManagerSettings, SubscriptionManager};
pub use messages::{
    BrowseElement, BrowseFilter, BrowseRequest, BrowseResponse, ItemProperty, ItemValue,
    Operation, PropertyReplyList, Request, Response, ServerState, ServerStatus,
};
pub use reconciler::{
    reconcile, Decision, ReconcileOutcome, ReconcilerStatsSnapshot, ValueCache, ValueChange,
    ValueReconciler, ValueRecord,
};
pub use recovery::{
    PollAction, PollFailureTracker, RecoveryController, RecoveryPolicy, SubscribeAction,
};
pub use registry::{ItemRegistry, RegisteredItem};
pub use subscription::{
    BroadcastListener, CallbackListener, ChannelListener, NoopListener, PollCursor,
    SubscriptionEvent, SubscriptionListener, SubscriptionManagerStats,
    SubscriptionManagerStatsSnapshot, SubscriptionRequest, SubscriptionSnapshot,
    SubscriptionState, SubscriptionStats, SubscriptionStatsSnapshot,
};
pub use transport::{
    call, invoke_with_timeout, CallbackInvoker, CallbackTransport, CodecTransport, DecodeError,
    OperationResponse, ReplySender, RpcChannel, WireCodec, XmlDaTransport,
};
pub use wrapper::{ClientStats, ClientStatsSnapshot, ReadOutcome, WriteOutcome, XmlDaClient};
