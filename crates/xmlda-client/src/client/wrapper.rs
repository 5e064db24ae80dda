// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! High-level OPC XML-DA client.
//!
//! [`XmlDaClient`] bundles a transport with the item registry, the value
//! reconciler and the subscription manager. One-shot operations (Read,
//! Write, GetStatus, GetProperties, Browse) are retried on transport
//! failures; subscriptions recover on their own.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;
use xmlda_core::{ExponentialBackoff, InvokeError, RetryStrategy, Value};

use super::manager::{ManagerSettings, SubscriptionManager};
use super::messages::{
    error_text, BrowseElement, BrowseRequest, BrowseResponse, GetPropertiesRequest,
    GetPropertiesResponse, GetStatusRequest, GetStatusResponse, ItemValue, PropertyReplyList,
    ReadRequest, ReadRequestItem, ReadResponse, Request, RequestOptions, WriteRequest,
    WriteResponse,
};
use super::reconciler::{ValueChange, ValueReconciler, ValueRecord};
use super::recovery::RecoveryController;
use super::registry::ItemRegistry;
use super::subscription::{
    ChannelListener, SubscriptionEvent, SubscriptionListener, SubscriptionManagerStatsSnapshot,
    SubscriptionRequest, SubscriptionSnapshot, SubscriptionState,
};
use super::transport::{invoke_with_timeout, OperationResponse, XmlDaTransport};
use crate::error::{ItemError, XmlDaError, XmlDaResult};
use crate::types::{ClientConfig, ClientItemHandle, ItemIdentity, SubscriptionId};

/// Upper bound on Browse pages followed by [`XmlDaClient::browse_all`].
const MAX_BROWSE_PAGES: usize = 1000;

// =============================================================================
// ClientStats
// =============================================================================

/// Request counters of a client.
#[derive(Debug, Default)]
pub struct ClientStats {
    requests: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    browses: AtomicU64,
}

impl ClientStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    fn record_attempts(&self, attempts: u32) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.retries
            .fetch_add(u64::from(attempts.saturating_sub(1)), Ordering::Relaxed);
    }

    fn record_failure(&self, error: &InvokeError) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if error.as_transport().is_some_and(|e| e.is_timeout()) {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_operation(&self, request: &Request) {
        let counter = match request {
            Request::Read(_) => &self.reads,
            Request::Write(_) => &self.writes,
            Request::Browse(_) => &self.browses,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot.
    pub fn snapshot(&self) -> ClientStatsSnapshot {
        ClientStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            browses: self.browses.load(Ordering::Relaxed),
        }
    }

    /// Resets every counter.
    pub fn reset(&self) {
        for counter in [
            &self.requests,
            &self.failures,
            &self.retries,
            &self.timeouts,
            &self.reads,
            &self.writes,
            &self.browses,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of [`ClientStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStatsSnapshot {
    /// One-shot requests issued (retries not counted).
    pub requests: u64,
    /// Requests that failed after all retries.
    pub failures: u64,
    /// Retry attempts.
    pub retries: u64,
    /// Failures caused by a timeout.
    pub timeouts: u64,
    /// Read requests.
    pub reads: u64,
    /// Write requests.
    pub writes: u64,
    /// Browse requests (one per page).
    pub browses: u64,
}

impl ClientStatsSnapshot {
    /// Fraction of requests that succeeded; 1.0 when nothing was sent.
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            return 1.0;
        }
        (self.requests - self.failures) as f64 / self.requests as f64
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of a Read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOutcome {
    /// Values returned by the server, in request order.
    pub values: Vec<ValueRecord>,
    /// Values that changed relative to the cache and were forwarded to the
    /// listener.
    pub changes: Vec<ValueChange>,
    /// Items the server could not read.
    pub errors: Vec<ItemError>,
}

impl ReadOutcome {
    /// Returns the value read for an item.
    pub fn value(&self, item: &ItemIdentity) -> Option<&ValueRecord> {
        self.values.iter().find(|r| &r.item == item)
    }

    /// Returns `true` if every item was read.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Result of a Write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    /// Items written.
    pub written: Vec<ItemIdentity>,
    /// Items the server refused.
    pub errors: Vec<ItemError>,
}

impl WriteOutcome {
    /// Returns `true` if every item was written.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

// =============================================================================
// XmlDaClient
// =============================================================================

/// OPC XML-DA client over any [`XmlDaTransport`].
///
/// # Example
///
/// ```rust,ignore
/// let config = ClientConfig::builder()
///     .endpoint("http://gateway:8080/OPC/DA")
///     .build()?;
/// let (client, mut events) = XmlDaClient::with_channel(config, transport)?;
///
/// let outcome = client.read(["Tank.Level", "Tank.Temp"]).await?;
/// for record in &outcome.values {
///     println!("{} = {}", record.item, record.value);
/// }
///
/// let id = client.subscribe(["Tank.Level"], Duration::from_secs(1)).await?;
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// client.cancel(id).await?;
/// ```
pub struct XmlDaClient<T: XmlDaTransport + 'static> {
    config: ClientConfig,
    transport: Arc<T>,
    registry: Arc<ItemRegistry>,
    reconciler: Arc<ValueReconciler>,
    listener: Arc<dyn SubscriptionListener>,
    subscriptions: SubscriptionManager<T>,
    retry: ExponentialBackoff,
    stats: ClientStats,
}

impl<T: XmlDaTransport + 'static> XmlDaClient<T> {
    /// Creates a client that reports to `listener`.
    pub fn new(
        config: ClientConfig,
        transport: T,
        listener: Arc<dyn SubscriptionListener>,
    ) -> XmlDaResult<Self> {
        config.validate()?;

        let transport = Arc::new(transport);
        let registry = Arc::new(ItemRegistry::new());
        let reconciler = Arc::new(ValueReconciler::new());
        let recovery = RecoveryController::new(config.recovery.clone());
        let retry = recovery.subscribe_strategy().clone();

        let subscriptions = SubscriptionManager::new(
            Arc::clone(&transport),
            Arc::clone(&registry),
            Arc::clone(&reconciler),
            Arc::clone(&listener),
            recovery,
            ManagerSettings {
                request_timeout: config.request_timeout,
                locale_id: config.locale_id.clone(),
                defaults: config.subscription.clone(),
            },
        );

        tracing::info!(
            endpoint = %transport.endpoint(),
            request_timeout_ms = config.request_timeout.as_millis() as u64,
            "XML-DA client created"
        );

        Ok(Self {
            config,
            transport,
            registry,
            reconciler,
            listener,
            subscriptions,
            retry,
            stats: ClientStats::new(),
        })
    }

    /// Creates a client whose events arrive on a channel sized by
    /// `listener_capacity`.
    pub fn with_channel(
        config: ClientConfig,
        transport: T,
    ) -> XmlDaResult<(Self, mpsc::Receiver<SubscriptionEvent>)> {
        let (listener, receiver) = ChannelListener::with_channel(config.listener_capacity);
        let client = Self::new(config, transport, Arc::new(listener))?;
        Ok((client, receiver))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the endpoint the transport talks to.
    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Returns the item registry.
    pub fn registry(&self) -> &ItemRegistry {
        &self.registry
    }

    /// Returns the last cached value of an item.
    pub fn last_value(&self, item: &ItemIdentity) -> Option<ValueRecord> {
        self.reconciler.last_value(item)
    }

    /// Returns request counters.
    pub fn stats(&self) -> ClientStatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns subscription counters.
    pub fn subscription_stats(&self) -> SubscriptionManagerStatsSnapshot {
        self.subscriptions.stats()
    }

    fn options(&self, prefix: &str) -> RequestOptions {
        RequestOptions::standard(self.config.locale_id.clone())
            .with_request_handle(format!("{prefix}-{}", Uuid::new_v4().simple()))
    }

    /// Sends a one-shot request, retrying transport failures.
    async fn execute<R: OperationResponse>(&self, request: Request) -> XmlDaResult<R> {
        let operation = request.operation();
        let timeout = self.config.request_timeout;
        let transport = &self.transport;
        let attempts = AtomicU32::new(0);

        self.stats.record_operation(&request);
        let result = self
            .retry
            .execute(|| {
                attempts.fetch_add(1, Ordering::Relaxed);
                let request = request.clone();
                async move { invoke_with_timeout(transport.as_ref(), request, timeout).await }
            })
            .await;
        self.stats.record_attempts(attempts.load(Ordering::Relaxed));

        match result {
            Ok(response) => Ok(R::expect(response)?),
            Err(error) => {
                self.stats.record_failure(&error);
                let error = XmlDaError::from_invoke(operation.as_str(), error);
                error.log(operation.as_str());
                Err(error)
            }
        }
    }

    // =========================================================================
    // Read / Write
    // =========================================================================

    /// Reads items.
    ///
    /// Returned values also pass through the value cache; genuine changes
    /// are forwarded to the listener like subscription updates.
    pub async fn read<I>(&self, items: I) -> XmlDaResult<ReadOutcome>
    where
        I: IntoIterator,
        I::Item: Into<ItemIdentity>,
    {
        self.read_with_max_age(items, None).await
    }

    /// Reads items, accepting server-cached values up to `max_age` old.
    pub async fn read_with_max_age<I>(
        &self,
        items: I,
        max_age: Option<Duration>,
    ) -> XmlDaResult<ReadOutcome>
    where
        I: IntoIterator,
        I::Item: Into<ItemIdentity>,
    {
        let requested: Vec<(ItemIdentity, ClientItemHandle)> = items
            .into_iter()
            .map(Into::into)
            .map(|identity: ItemIdentity| {
                let handle = self.registry.register(&identity);
                (identity, handle)
            })
            .collect();
        if requested.is_empty() {
            return Ok(ReadOutcome::default());
        }

        let request = Request::Read(ReadRequest {
            options: self.options("read"),
            max_age,
            items: requested
                .iter()
                .map(|(identity, handle)| ReadRequestItem {
                    item: identity.clone(),
                    client_item_handle: Some(handle.clone()),
                    max_age: None,
                })
                .collect(),
        });
        let reply: ReadResponse = self.execute(request).await?;
        let reply_time = reply.reply.reply_time;

        let mut outcome = ReadOutcome::default();
        for (position, value) in reply.items.iter().enumerate() {
            let Some(identity) = self.identify(value, &requested, position) else {
                tracing::warn!(item = %value.item, "Read reply item does not match the request");
                continue;
            };
            match value.failure() {
                Some(code) => {
                    tracing::warn!(item = %identity, code = %code, "Read failed for item");
                    outcome.errors.push(ItemError::new(
                        identity,
                        code.clone(),
                        error_text(&reply.errors, code),
                    ));
                }
                None => outcome
                    .values
                    .push(ValueRecord::from_item_value(identity, value, reply_time)),
            }
        }

        let reconciled = self.reconciler.reconcile(None, outcome.values.clone());
        for change in &reconciled.changes {
            self.listener.on_value_changed(change.clone()).await;
        }
        outcome.changes = reconciled.changes;

        tracing::debug!(
            items = requested.len(),
            values = outcome.values.len(),
            changes = outcome.changes.len(),
            errors = outcome.errors.len(),
            "Read completed"
        );
        Ok(outcome)
    }

    /// Writes values.
    pub async fn write<I, V>(&self, values: I) -> XmlDaResult<WriteOutcome>
    where
        I: IntoIterator<Item = (ItemIdentity, V)>,
        V: Into<Value>,
    {
        let requested: Vec<(ItemIdentity, ClientItemHandle, Value)> = values
            .into_iter()
            .map(|(identity, value)| {
                let handle = self.registry.register(&identity);
                (identity, handle, value.into())
            })
            .collect();
        if requested.is_empty() {
            return Ok(WriteOutcome::default());
        }

        let request = Request::Write(WriteRequest {
            options: self.options("write"),
            items: requested
                .iter()
                .map(|(identity, handle, value)| {
                    ItemValue::new(identity.clone())
                        .with_client_handle(handle.clone())
                        .with_value(value.clone())
                })
                .collect(),
            return_values_on_reply: false,
        });
        let reply: WriteResponse = self.execute(request).await?;

        let pairs: Vec<(ItemIdentity, ClientItemHandle)> = requested
            .into_iter()
            .map(|(identity, handle, _)| (identity, handle))
            .collect();

        let mut outcome = WriteOutcome::default();
        let mut answered = Vec::new();
        for (position, value) in reply.items.iter().enumerate() {
            let Some(identity) = self.identify(value, &pairs, position) else {
                continue;
            };
            answered.push(identity.clone());
            match value.failure() {
                Some(code) => {
                    tracing::warn!(item = %identity, code = %code, "Write refused for item");
                    outcome.errors.push(ItemError::new(
                        identity,
                        code.clone(),
                        error_text(&reply.errors, code),
                    ));
                }
                None => outcome.written.push(identity),
            }
        }
        // A reply without per-item results means every write succeeded.
        for (identity, _) in pairs {
            if !answered.contains(&identity) {
                outcome.written.push(identity);
            }
        }

        tracing::debug!(
            written = outcome.written.len(),
            errors = outcome.errors.len(),
            "Write completed"
        );
        Ok(outcome)
    }

    /// Finds the requested item a reply item answers: by echoed client
    /// handle, else by position.
    fn identify(
        &self,
        value: &ItemValue,
        requested: &[(ItemIdentity, ClientItemHandle)],
        position: usize,
    ) -> Option<ItemIdentity> {
        match &value.client_item_handle {
            Some(handle) => requested
                .iter()
                .find(|(_, h)| h == handle)
                .map(|(identity, _)| identity.clone()),
            None => requested.get(position).map(|(identity, _)| identity.clone()),
        }
    }

    // =========================================================================
    // Status / Properties / Browse
    // =========================================================================

    /// Queries the server status.
    pub async fn get_status(&self) -> XmlDaResult<GetStatusResponse> {
        let request = Request::GetStatus(GetStatusRequest {
            options: self.options("status"),
        });
        let reply: GetStatusResponse = self.execute(request).await?;

        if !reply.reply.server_state.is_running() {
            tracing::warn!(state = ?reply.reply.server_state, "Server is not running");
        }
        Ok(reply)
    }

    /// Queries item properties. An empty `property_names` returns them all.
    pub async fn get_properties<I>(
        &self,
        items: I,
        property_names: Vec<String>,
    ) -> XmlDaResult<Vec<PropertyReplyList>>
    where
        I: IntoIterator,
        I::Item: Into<ItemIdentity>,
    {
        let request = Request::GetProperties(GetPropertiesRequest {
            options: self.options("properties"),
            items: items.into_iter().map(Into::into).collect(),
            return_all_properties: property_names.is_empty(),
            property_names,
            return_property_values: true,
        });
        let reply: GetPropertiesResponse = self.execute(request).await?;
        Ok(reply.property_lists)
    }

    /// Browses one page.
    pub async fn browse(&self, mut request: BrowseRequest) -> XmlDaResult<BrowseResponse> {
        if request.options.client_request_handle.is_none() {
            request.options = self.options("browse");
        }
        self.execute(Request::Browse(request)).await
    }

    /// Browses every page, following continuation points.
    pub async fn browse_all(&self, request: BrowseRequest) -> XmlDaResult<Vec<BrowseElement>> {
        let mut elements = Vec::new();
        let mut request = request;

        for page in 1..=MAX_BROWSE_PAGES {
            let reply = self.browse(request.clone()).await?;
            elements.extend(reply.elements);

            match reply.continuation_point {
                Some(point) if reply.more_elements || !point.is_empty() => {
                    if request.continuation_point.as_deref() == Some(point.as_str()) {
                        tracing::warn!(page, "Browse continuation point repeated, stopping");
                        break;
                    }
                    request.continuation_point = Some(point);
                }
                _ => break,
            }
        }

        tracing::debug!(item = %request.item, elements = elements.len(), "Browse completed");
        Ok(elements)
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribes to items polled every `interval`.
    pub async fn subscribe<I>(&self, items: I, interval: Duration) -> XmlDaResult<SubscriptionId>
    where
        I: IntoIterator,
        I::Item: Into<ItemIdentity>,
    {
        self.subscribe_with(SubscriptionRequest::new(items, interval))
            .await
    }

    /// Subscribes with full control over the request.
    pub async fn subscribe_with(&self, request: SubscriptionRequest) -> XmlDaResult<SubscriptionId> {
        self.subscriptions.subscribe(request).await
    }

    /// Cancels a subscription.
    pub async fn cancel(&self, id: SubscriptionId) -> XmlDaResult<()> {
        self.subscriptions.cancel(id).await
    }

    /// Returns the state of a subscription.
    pub fn subscription_state(&self, id: SubscriptionId) -> XmlDaResult<SubscriptionState> {
        self.subscriptions.state(id)
    }

    /// Returns a snapshot of a subscription.
    pub fn subscription_snapshot(&self, id: SubscriptionId) -> XmlDaResult<SubscriptionSnapshot> {
        self.subscriptions.snapshot(id)
    }

    /// Returns the ids of all known subscriptions.
    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        self.subscriptions.subscription_ids()
    }

    /// Drops cancelled and failed subscriptions. Returns how many.
    pub fn cleanup_subscriptions(&self) -> usize {
        self.subscriptions.cleanup()
    }

    /// Cancels every subscription and stops all polling.
    pub async fn shutdown(&self) {
        self.subscriptions.shutdown().await;
        tracing::info!(endpoint = %self.endpoint(), "XML-DA client shut down");
    }
}

impl<T: XmlDaTransport + 'static> std::fmt::Debug for XmlDaClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlDaClient")
            .field("endpoint", &self.transport.endpoint())
            .field("items", &self.registry.len())
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
