// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription manager.
//!
//! Owns every subscription of a client and runs one poll task per active
//! subscription. A poll task issues a SubscriptionPolledRefresh, waits for
//! it to resolve, feeds the reply through the reconciler and only then
//! schedules the next poll, so a subscription never has two polls in flight.
//!
//! Shared state (item registry, value cache, subscription table) is guarded
//! by short critical sections that are never held across an `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use xmlda_core::InvokeError;

use super::messages::{
    error_text, CancelRequest, ItemValue, PolledRefreshRequest, PolledRefreshResponse, Request,
    RequestOptions, SubscribeRequest, SubscribeRequestItem, SubscribeResponse,
};
use super::reconciler::{ValueChange, ValueReconciler, ValueRecord};
use super::recovery::{PollAction, PollFailureTracker, RecoveryController, SubscribeAction};
use super::registry::{ItemRegistry, RegisteredItem};
use super::subscription::{
    PollCursor, SubscriptionListener, SubscriptionManagerStats, SubscriptionManagerStatsSnapshot,
    SubscriptionRequest, SubscriptionSnapshot, SubscriptionState, SubscriptionStats,
};
use super::transport::{invoke_with_timeout, OperationResponse, XmlDaTransport};
use crate::error::{ItemError, ProtocolViolation, SubscriptionError, XmlDaError, XmlDaResult};
use crate::types::{
    ClientItemHandle, ItemIdentity, ResultCode, ServerItemHandle, ServerSubHandle,
    SubscriptionDefaults, SubscriptionId,
};

// =============================================================================
// Subscription Entry
// =============================================================================

#[derive(Debug, Clone)]
struct ActiveItem {
    identity: ItemIdentity,
    client: ClientItemHandle,
    server: ServerItemHandle,
}

#[derive(Debug, Default)]
struct EntryState {
    state: SubscriptionState,
    server_handle: Option<ServerSubHandle>,
    active: Vec<ActiveItem>,
    failed: Vec<ItemError>,
    revised_interval: Option<Duration>,
    cursor: PollCursor,
}

/// One subscription and its bookkeeping.
struct SubscriptionEntry {
    id: SubscriptionId,
    request: SubscriptionRequest,
    items: Vec<(ItemIdentity, ClientItemHandle)>,
    state: Mutex<EntryState>,
    cancel: CancellationToken,
    stats: SubscriptionStats,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionEntry {
    fn state(&self) -> SubscriptionState {
        self.state.lock().state
    }

    fn effective_interval(&self) -> Duration {
        let state = self.state.lock();
        effective_interval(self.request.interval, state.revised_interval)
    }

    /// Returns `true` if the subscription is active and polls `item`.
    fn covers(&self, item: &ItemIdentity) -> bool {
        let state = self.state.lock();
        state.state.is_active() && state.active.iter().any(|a| &a.identity == item)
    }

    fn snapshot(&self) -> SubscriptionSnapshot {
        let state = self.state.lock();
        SubscriptionSnapshot {
            id: self.id,
            state: state.state,
            server_handle: state.server_handle.clone(),
            requested_interval: self.request.interval,
            effective_interval: effective_interval(self.request.interval, state.revised_interval),
            active_items: state.active.iter().map(|i| i.identity.clone()).collect(),
            failed_items: state.failed.clone(),
            cursor: state.cursor,
            stats: self.stats.snapshot(),
        }
    }
}

/// The wait between polls: the requested interval, or the server's revision
/// when that is longer.
fn effective_interval(requested: Duration, revised: Option<Duration>) -> Duration {
    revised.map_or(requested, |r| requested.max(r))
}

// =============================================================================
// Manager
// =============================================================================

/// Settings the manager needs from the client configuration.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Timeout applied to every request.
    pub request_timeout: Duration,
    /// Locale sent with requests.
    pub locale_id: Option<String>,
    /// Subscription defaults.
    pub defaults: SubscriptionDefaults,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            request_timeout: crate::types::DEFAULT_REQUEST_TIMEOUT,
            locale_id: None,
            defaults: SubscriptionDefaults::default(),
        }
    }
}

struct Shared<T> {
    transport: Arc<T>,
    registry: Arc<ItemRegistry>,
    reconciler: Arc<ValueReconciler>,
    listener: Arc<dyn SubscriptionListener>,
    recovery: RecoveryController,
    settings: ManagerSettings,
    subscriptions: RwLock<HashMap<SubscriptionId, Arc<SubscriptionEntry>>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
    stats: SubscriptionManagerStats,
}

/// Drives Subscribe, polling, resubscription and cancellation.
///
/// # Example
///
/// ```rust,ignore
/// let (listener, mut events) = ChannelListener::with_channel(256);
/// let manager = SubscriptionManager::new(
///     Arc::new(transport),
///     Arc::new(ItemRegistry::new()),
///     Arc::new(ValueReconciler::new()),
///     Arc::new(listener),
///     RecoveryController::default(),
///     ManagerSettings::default(),
/// );
///
/// let id = manager
///     .subscribe(SubscriptionRequest::new(["Tank.Level"], Duration::from_secs(1)))
///     .await?;
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// manager.cancel(id).await?;
/// ```
pub struct SubscriptionManager<T: XmlDaTransport + 'static> {
    shared: Arc<Shared<T>>,
}

/// Why establishing a subscription stopped.
enum EstablishError {
    /// `cancel()` won the race; the entry is already finalized.
    Cancelled,
    /// The subscription must fail with this error.
    Failed(XmlDaError),
}

/// What a processed poll reply asks the loop to do.
enum PollFlow {
    Continue,
    Stop,
}

impl<T: XmlDaTransport + 'static> SubscriptionManager<T> {
    /// Creates a manager.
    pub fn new(
        transport: Arc<T>,
        registry: Arc<ItemRegistry>,
        reconciler: Arc<ValueReconciler>,
        listener: Arc<dyn SubscriptionListener>,
        recovery: RecoveryController,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                registry,
                reconciler,
                listener,
                recovery,
                settings,
                subscriptions: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
                stats: SubscriptionManagerStats::new(),
            }),
        }
    }

    // =========================================================================
    // Public API
    // =========================================================================

    /// Creates a subscription and starts polling it.
    ///
    /// Returns once the subscription is `Active`. Items the server refuses
    /// are reported to the listener and excluded; the call fails only when
    /// the subscription as a whole cannot be established.
    pub async fn subscribe(&self, request: SubscriptionRequest) -> XmlDaResult<SubscriptionId> {
        let shared = &self.shared;
        request.validate(shared.settings.defaults.min_interval)?;

        let id = SubscriptionId::new(shared.next_id.fetch_add(1, Ordering::Relaxed));

        let mut items: Vec<(ItemIdentity, ClientItemHandle)> = Vec::with_capacity(request.items.len());
        for identity in &request.items {
            if items.iter().any(|(known, _)| known == identity) {
                continue;
            }
            let handle = shared.registry.register(identity);
            items.push((identity.clone(), handle));
        }

        let entry = Arc::new(SubscriptionEntry {
            id,
            request,
            items,
            state: Mutex::new(EntryState::default()),
            cancel: shared.shutdown.child_token(),
            stats: SubscriptionStats::new(),
            task: Mutex::new(None),
        });
        shared.subscriptions.write().insert(id, Arc::clone(&entry));

        tracing::debug!(
            subscription_id = %id,
            items = entry.items.len(),
            interval_ms = entry.request.interval.as_millis() as u64,
            "Subscribing"
        );
        shared.listener.on_state_change(id, SubscriptionState::Pending).await;

        match establish(shared, &entry).await {
            Ok(()) => {}
            Err(EstablishError::Cancelled) => {
                return Err(SubscriptionError::Cancelled { id }.into());
            }
            Err(EstablishError::Failed(error)) => {
                fail(shared, &entry, error.clone()).await;
                return Err(error);
            }
        }

        shared.stats.record_created();
        let task = tokio::spawn(run_poll_loop(Arc::clone(shared), Arc::clone(&entry)));
        *entry.task.lock() = Some(task);

        Ok(id)
    }

    /// Cancels a subscription.
    ///
    /// Safe while a poll is in flight: no poll is issued after this returns.
    /// A late poll reply is still reconciled into the cache but not
    /// forwarded. Cancelling a terminal subscription is a no-op.
    pub async fn cancel(&self, id: SubscriptionId) -> XmlDaResult<()> {
        let entry = self.entry(id)?;
        cancel_entry(&self.shared, &entry).await
    }

    /// Returns the state of a subscription.
    pub fn state(&self, id: SubscriptionId) -> XmlDaResult<SubscriptionState> {
        Ok(self.entry(id)?.state())
    }

    /// Returns a snapshot of a subscription.
    pub fn snapshot(&self, id: SubscriptionId) -> XmlDaResult<SubscriptionSnapshot> {
        Ok(self.entry(id)?.snapshot())
    }

    /// Returns the ids of all known subscriptions.
    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        let mut ids: Vec<_> = self.shared.subscriptions.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Returns the number of subscriptions that are not terminal.
    pub fn live_count(&self) -> usize {
        self.shared
            .subscriptions
            .read()
            .values()
            .filter(|e| !e.state().is_terminal())
            .count()
    }

    /// Drops terminal subscriptions from the table. Returns how many.
    pub fn cleanup(&self) -> usize {
        let mut subscriptions = self.shared.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|_, e| !e.state().is_terminal());
        before - subscriptions.len()
    }

    /// Cancels every live subscription and waits for their poll tasks.
    pub async fn shutdown(&self) {
        let entries: Vec<_> = self.shared.subscriptions.read().values().cloned().collect();

        for entry in &entries {
            if entry.state().is_terminal() {
                continue;
            }
            if let Err(e) = cancel_entry(&self.shared, entry).await {
                e.log("shutdown");
            }
        }
        self.shared.shutdown.cancel();

        for entry in &entries {
            let task = entry.task.lock().take();
            if let Some(task) = task {
                if let Err(e) = task.await {
                    tracing::warn!(subscription_id = %entry.id, error = %e, "Poll task ended abnormally");
                }
            }
        }

        tracing::info!(
            subscriptions = entries.len(),
            live = self.live_count(),
            "Subscription manager stopped"
        );
    }

    /// Returns manager statistics.
    pub fn stats(&self) -> SubscriptionManagerStatsSnapshot {
        self.shared.stats.snapshot()
    }

    fn entry(&self, id: SubscriptionId) -> XmlDaResult<Arc<SubscriptionEntry>> {
        self.shared
            .subscriptions
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| SubscriptionError::NotFound { id }.into())
    }
}

impl<T: XmlDaTransport + 'static> std::fmt::Debug for SubscriptionManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("endpoint", &self.shared.transport.endpoint())
            .field("subscriptions", &self.shared.subscriptions.read().len())
            .finish()
    }
}

// =============================================================================
// Establishing
// =============================================================================

fn request_options<T>(shared: &Shared<T>, handle: String) -> RequestOptions {
    RequestOptions::standard(shared.settings.locale_id.clone()).with_request_handle(handle)
}

fn build_subscribe_request<T>(shared: &Shared<T>, entry: &SubscriptionEntry) -> SubscribeRequest {
    let defaults = &shared.settings.defaults;
    SubscribeRequest {
        options: request_options(shared, format!("{}-subscribe", entry.id)),
        items: entry
            .items
            .iter()
            .map(|(identity, client)| SubscribeRequestItem {
                item: identity.clone(),
                client_item_handle: client.clone(),
                requested_sampling_rate: None,
                deadband: None,
                enable_buffering: None,
            })
            .collect(),
        requested_sampling_rate: entry.request.interval,
        deadband: entry.request.deadband.or(defaults.deadband),
        enable_buffering: entry.request.enable_buffering.unwrap_or(defaults.enable_buffering),
        subscription_ping_rate: entry.request.ping_rate.unwrap_or(defaults.ping_rate),
        return_values_on_reply: defaults.return_values_on_reply,
    }
}

/// Sends Subscribe with retry and moves the entry to `Active`.
async fn establish<T: XmlDaTransport + 'static>(
    shared: &Arc<Shared<T>>,
    entry: &Arc<SubscriptionEntry>,
) -> Result<(), EstablishError> {
    let timeout = shared.settings.request_timeout;
    let mut attempt = 0u32;

    let response = loop {
        attempt += 1;
        let request = Request::Subscribe(build_subscribe_request(shared, entry));

        let error = match invoke_with_timeout(shared.transport.as_ref(), request, timeout).await {
            Ok(response) => match SubscribeResponse::expect(response) {
                Ok(reply) => break reply,
                Err(violation) => return Err(EstablishError::Failed(violation.into())),
            },
            Err(error) => error,
        };

        if entry.state().is_cancelling() {
            finalize_cancelled(shared, entry).await;
            return Err(EstablishError::Cancelled);
        }

        match shared.recovery.on_subscribe_failure(&error, attempt) {
            SubscribeAction::RetryAfter(delay) => {
                tracing::debug!(
                    subscription_id = %entry.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Subscribe failed, retrying"
                );
                tokio::select! {
                    _ = entry.cancel.cancelled() => {
                        finalize_cancelled(shared, entry).await;
                        return Err(EstablishError::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            SubscribeAction::GiveUp => {
                let failure = match error {
                    InvokeError::Transport(e) => SubscriptionError::RetriesExhausted {
                        id: entry.id,
                        attempts: attempt,
                        last_error: e.to_string(),
                    }
                    .into(),
                    InvokeError::ServerFault { code, message } => SubscriptionError::Rejected {
                        id: entry.id,
                        reason: format!("{code}: {message}"),
                    }
                    .into(),
                    other => XmlDaError::from_invoke("Subscribe", other),
                };
                return Err(EstablishError::Failed(failure));
            }
        }
    };

    activate(shared, entry, response).await
}

/// Applies a Subscribe reply: binds items, records failures, goes `Active`.
async fn activate<T: XmlDaTransport + 'static>(
    shared: &Arc<Shared<T>>,
    entry: &Arc<SubscriptionEntry>,
    reply: SubscribeResponse,
) -> Result<(), EstablishError> {
    let id = entry.id;
    let reply_time = reply.reply.reply_time;

    let mut active = Vec::new();
    let mut failed = Vec::new();
    let mut initial = Vec::new();
    let mut answered: Vec<&ClientItemHandle> = Vec::new();

    for (position, result) in reply.items.iter().enumerate() {
        let value = &result.item_value;
        let client = match value.client_item_handle.as_ref() {
            Some(handle) => handle,
            None => match entry.items.get(position) {
                Some((_, handle)) => handle,
                None => continue,
            },
        };
        let Some((identity, client)) = entry.items.iter().find(|(_, c)| c == client) else {
            tracing::warn!(subscription_id = %id, client_handle = %client, "Subscribe reply names an unknown item");
            continue;
        };
        if answered.contains(&client) {
            tracing::warn!(
                subscription_id = %id,
                client_handle = %client,
                "Subscribe reply repeats an item, keeping the first result"
            );
            continue;
        }
        answered.push(client);

        if let Some(code) = value.failure() {
            failed.push(ItemError::new(
                identity.clone(),
                code.clone(),
                error_text(&reply.errors, code),
            ));
            continue;
        }

        let server = value
            .server_item_handle
            .clone()
            .unwrap_or_else(|| ServerItemHandle::new(client.as_str()));
        if value.value.is_some() {
            initial.push(ValueRecord::from_item_value(identity.clone(), value, reply_time));
        }
        active.push(ActiveItem {
            identity: identity.clone(),
            client: client.clone(),
            server,
        });
    }

    // Items the reply does not mention were accepted without comment.
    for (identity, client) in &entry.items {
        if !answered.contains(&client) {
            active.push(ActiveItem {
                identity: identity.clone(),
                client: client.clone(),
                server: ServerItemHandle::new(client.as_str()),
            });
        }
    }

    let Some(handle) = reply.server_sub_handle.clone() else {
        let error = if active.is_empty() {
            SubscriptionError::Rejected {
                id,
                reason: format!("all {} items failed", failed.len()),
            }
            .into()
        } else {
            ProtocolViolation::missing_field("Subscribe", "ServerSubHandle").into()
        };
        report_item_errors(shared, entry, failed).await;
        return Err(EstablishError::Failed(error));
    };

    if active.is_empty() {
        report_item_errors(shared, entry, failed).await;
        return Err(EstablishError::Failed(
            SubscriptionError::Rejected {
                id,
                reason: "no item could be subscribed".to_string(),
            }
            .into(),
        ));
    }

    for item in &active {
        if let Err(e) = shared.registry.bind(id, &item.client, &item.server) {
            shared.registry.unbind_all(id);
            return Err(EstablishError::Failed(e.into()));
        }
    }

    let active_items = active.len();
    let cancelled = {
        let mut state = entry.state.lock();
        if state.state.is_cancelling() {
            true
        } else {
            state.state = SubscriptionState::Active;
            state.server_handle = Some(handle.clone());
            state.revised_interval = reply.revised_sampling_rate;
            state.cursor.reset();
            state.active = active;
            state.failed = failed.clone();
            false
        }
    };

    if cancelled {
        // cancel() arrived while Subscribe was in flight; release the new handle.
        send_cancel(shared, id, handle).await;
        finalize_cancelled(shared, entry).await;
        return Err(EstablishError::Cancelled);
    }

    tracing::info!(
        subscription_id = %id,
        server_sub_handle = %handle,
        items = active_items,
        failed_items = failed.len(),
        interval_ms = entry.effective_interval().as_millis() as u64,
        "Subscription active"
    );

    report_item_errors(shared, entry, failed).await;
    shared.listener.on_state_change(id, SubscriptionState::Active).await;

    if !initial.is_empty() {
        let outcome = shared.reconciler.reconcile(Some(id), initial);
        entry.stats.record_changes(outcome.changes.len());
        shared.stats.record_changes(outcome.changes.len());
        deliver(shared, entry, outcome.changes).await;
    }

    Ok(())
}

async fn report_item_errors<T>(shared: &Shared<T>, entry: &SubscriptionEntry, errors: Vec<ItemError>) {
    if errors.is_empty() {
        return;
    }
    entry.stats.record_item_errors(errors.len());
    for error in errors {
        tracing::warn!(subscription_id = %entry.id, item = %error.item, code = %error.code, "Item failed");
        shared.listener.on_item_error(entry.id, error).await;
    }
}

/// Forwards changes while the subscription is still active.
///
/// Once it is not, each change goes to another active subscription that
/// covers the same item, if there is one. The cache already holds the value,
/// so that subscription would otherwise suppress it on its next poll.
async fn deliver<T>(shared: &Shared<T>, entry: &SubscriptionEntry, changes: Vec<ValueChange>) {
    if changes.is_empty() {
        return;
    }
    if entry.state().is_active() {
        for change in changes {
            shared.listener.on_value_changed(change).await;
        }
        return;
    }

    let total = changes.len();
    let rerouted: Vec<ValueChange> = {
        let subscriptions = shared.subscriptions.read();
        changes
            .into_iter()
            .filter_map(|change| {
                let owner = subscriptions
                    .values()
                    .find(|other| other.id != entry.id && other.covers(&change.item))?;
                Some(ValueChange {
                    subscription: Some(owner.id),
                    ..change
                })
            })
            .collect()
    };
    tracing::debug!(
        subscription_id = %entry.id,
        changes = total,
        rerouted = rerouted.len(),
        "Subscription no longer active, changes cached"
    );
    for change in rerouted {
        shared.listener.on_value_changed(change).await;
    }
}

// =============================================================================
// Polling
// =============================================================================

async fn run_poll_loop<T: XmlDaTransport + 'static>(
    shared: Arc<Shared<T>>,
    entry: Arc<SubscriptionEntry>,
) {
    let id = entry.id;
    let timeout = shared.settings.request_timeout;
    let mut tracker = PollFailureTracker::default();
    let mut delay = entry.effective_interval();

    loop {
        tokio::select! {
            biased;
            _ = entry.cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        let (handle, request) = {
            let state = entry.state.lock();
            match (&state.state, &state.server_handle) {
                (SubscriptionState::Active, Some(handle)) => (
                    handle.clone(),
                    PolledRefreshRequest {
                        options: request_options(
                            &shared,
                            format!("{}-poll-{}", id, state.cursor.sequence + 1),
                        ),
                        server_sub_handles: vec![handle.clone()],
                        hold_time: shared.settings.defaults.hold_time,
                        wait_time: shared.settings.defaults.wait_time,
                        return_all_items: state.cursor.is_initial(),
                    },
                ),
                _ => break,
            }
        };

        tracing::trace!(subscription_id = %id, "Polling");
        let result = invoke_with_timeout(
            shared.transport.as_ref(),
            Request::PolledRefresh(request),
            timeout,
        )
        .await;
        let interval = entry.effective_interval();

        match result {
            Ok(response) => match PolledRefreshResponse::expect(response) {
                Ok(reply) => {
                    shared.recovery.on_poll_success(&mut tracker);
                    match process_poll_reply(&shared, &entry, &handle, reply).await {
                        PollFlow::Continue => delay = entry.effective_interval(),
                        PollFlow::Stop => break,
                    }
                }
                Err(violation) => {
                    fail(&shared, &entry, violation.into()).await;
                    break;
                }
            },
            Err(InvokeError::Transport(error)) => {
                entry.stats.record_poll_failure();
                shared.stats.record_poll_failure();

                if !entry.state().is_active() {
                    break;
                }

                match shared.recovery.on_poll_failure(&mut tracker, &error, interval) {
                    PollAction::RepollAfter(next) => {
                        tracing::warn!(
                            subscription_id = %id,
                            failures = tracker.consecutive(),
                            delay_ms = next.as_millis() as u64,
                            error = %error,
                            "Poll failed, backing off"
                        );
                        delay = next;
                    }
                    PollAction::Resubscribe => {
                        if !resubscribe(&shared, &entry).await {
                            break;
                        }
                        delay = entry.effective_interval();
                    }
                }
            }
            Err(other) => {
                let error = match other {
                    InvokeError::ServerFault { code, .. } if code.contains(ResultCode::E_NOSUBSCRIPTION) => {
                        SubscriptionError::Invalidated {
                            id,
                            handle: handle.as_str().to_string(),
                        }
                        .into()
                    }
                    other => XmlDaError::from_invoke("SubscriptionPolledRefresh", other),
                };
                fail(&shared, &entry, error).await;
                break;
            }
        }
    }

    tracing::debug!(subscription_id = %id, state = %entry.state(), "Poll loop finished");
}

async fn process_poll_reply<T: XmlDaTransport + 'static>(
    shared: &Arc<Shared<T>>,
    entry: &Arc<SubscriptionEntry>,
    handle: &ServerSubHandle,
    reply: PolledRefreshResponse,
) -> PollFlow {
    let id = entry.id;
    let reply_time = reply.reply.reply_time;

    if reply.invalid_server_sub_handles.contains(handle) {
        fail(
            shared,
            entry,
            SubscriptionError::Invalidated {
                id,
                handle: handle.as_str().to_string(),
            }
            .into(),
        )
        .await;
        return PollFlow::Stop;
    }

    if reply.data_buffer_overflow {
        entry.stats.record_buffer_overflow();
        tracing::warn!(subscription_id = %id, server_sub_handle = %handle, "Server buffer overflow, values were lost");
    }

    {
        let mut state = entry.state.lock();
        if let Some(revised) = reply.revised_sampling_rate {
            if state.revised_interval != Some(revised) {
                tracing::info!(
                    subscription_id = %id,
                    revised_ms = revised.as_millis() as u64,
                    "Server revised polling interval"
                );
                state.revised_interval = Some(revised);
            }
        }
        state.cursor.advance(reply_time);
    }

    let mut records = Vec::new();
    let mut item_errors = Vec::new();

    let values = reply
        .item_lists
        .iter()
        .filter(|list| list.server_sub_handle.as_ref().map_or(true, |h| h == handle))
        .flat_map(|list| list.items.iter());

    for value in values {
        let Some(item) = correlate(&shared.registry, entry, value) else {
            tracing::warn!(
                subscription_id = %id,
                item = %value.item,
                server_handle = ?value.server_item_handle,
                client_handle = ?value.client_item_handle,
                "Uncorrelated poll item ignored"
            );
            continue;
        };

        match value.failure() {
            Some(code) => item_errors.push(ItemError::new(
                item.identity,
                code.clone(),
                error_text(&reply.errors, code),
            )),
            None => records.push(ValueRecord::from_item_value(item.identity, value, reply_time)),
        }
    }

    let outcome = shared.reconciler.reconcile(Some(id), records);
    entry.stats.record_poll(outcome.changes.len(), outcome.rejected);
    shared.stats.record_poll(outcome.changes.len());

    tracing::debug!(
        subscription_id = %id,
        accepted = outcome.accepted,
        changes = outcome.changes.len(),
        stale = outcome.rejected,
        "Poll completed"
    );

    if entry.state().is_active() {
        report_item_errors(shared, entry, item_errors).await;
    }
    deliver(shared, entry, outcome.changes).await;

    if entry.state().is_active() {
        PollFlow::Continue
    } else {
        PollFlow::Stop
    }
}

/// Finds the item a poll reply entry belongs to: by server handle first,
/// then by an echoed client handle or item name of this subscription. The
/// fallbacks still work after cancellation has unbound the server handles.
fn correlate(
    registry: &ItemRegistry,
    entry: &SubscriptionEntry,
    value: &ItemValue,
) -> Option<RegisteredItem> {
    if let Some(server) = &value.server_item_handle {
        if let Ok(item) = registry.lookup(entry.id, server) {
            return Some(item);
        }
    }
    let found = match value.client_item_handle.as_ref() {
        Some(client) => entry.items.iter().find(|(_, c)| c == client),
        None if !value.item.item_name.is_empty() => {
            entry.items.iter().find(|(identity, _)| identity == &value.item)
        }
        None => None,
    };
    found.map(|(identity, client)| RegisteredItem {
        identity: identity.clone(),
        client_handle: client.clone(),
    })
}

/// Discards the current handle and subscribes again. Returns `false` when
/// the poll loop must stop.
async fn resubscribe<T: XmlDaTransport + 'static>(
    shared: &Arc<Shared<T>>,
    entry: &Arc<SubscriptionEntry>,
) -> bool {
    let id = entry.id;
    let stale = {
        let mut state = entry.state.lock();
        if !state.state.is_active() {
            return false;
        }
        state.state = SubscriptionState::Pending;
        state.active.clear();
        state.failed.clear();
        state.cursor.reset();
        state.server_handle.take()
    };
    shared.registry.unbind_all(id);

    entry.stats.record_resubscription();
    shared.stats.record_resubscription();
    tracing::info!(
        subscription_id = %id,
        stale_handle = ?stale.as_ref().map(|h| h.as_str()),
        "Resubscribing after repeated poll failures"
    );
    shared.listener.on_state_change(id, SubscriptionState::Pending).await;

    match establish(shared, entry).await {
        Ok(()) => true,
        Err(EstablishError::Cancelled) => false,
        Err(EstablishError::Failed(error)) => {
            fail(shared, entry, error).await;
            false
        }
    }
}

// =============================================================================
// Cancellation and Failure
// =============================================================================

async fn cancel_entry<T: XmlDaTransport + 'static>(
    shared: &Arc<Shared<T>>,
    entry: &Arc<SubscriptionEntry>,
) -> XmlDaResult<()> {
    let id = entry.id;
    let (previous, handle) = {
        let mut state = entry.state.lock();
        match state.state {
            SubscriptionState::Cancelling
            | SubscriptionState::Cancelled
            | SubscriptionState::Failed => return Ok(()),
            previous => {
                state.state = SubscriptionState::Cancelling;
                (previous, state.server_handle.clone())
            }
        }
    };

    entry.cancel.cancel();
    tracing::debug!(subscription_id = %id, "Cancelling subscription");

    if previous == SubscriptionState::Pending {
        // Subscribe is in flight; establishing finishes the cancellation.
        shared.listener.on_state_change(id, SubscriptionState::Cancelling).await;
        return Ok(());
    }

    if let Some(handle) = handle {
        send_cancel(shared, id, handle).await;
    }
    shared.listener.on_state_change(id, SubscriptionState::Cancelling).await;
    finalize_cancelled(shared, entry).await;
    Ok(())
}

/// Sends SubscriptionCancel. The outcome does not change local state.
async fn send_cancel<T: XmlDaTransport + 'static>(
    shared: &Shared<T>,
    id: SubscriptionId,
    handle: ServerSubHandle,
) {
    let request = Request::Cancel(CancelRequest {
        server_sub_handle: handle.clone(),
        client_request_handle: Some(format!("{id}-cancel")),
    });

    match invoke_with_timeout(shared.transport.as_ref(), request, shared.settings.request_timeout).await {
        Ok(_) => tracing::debug!(subscription_id = %id, server_sub_handle = %handle, "Cancel acknowledged"),
        Err(e) => tracing::debug!(
            subscription_id = %id,
            server_sub_handle = %handle,
            error = %e,
            "Cancel not acknowledged, treating subscription as cancelled"
        ),
    }
}

async fn finalize_cancelled<T>(shared: &Shared<T>, entry: &SubscriptionEntry) {
    {
        let mut state = entry.state.lock();
        if state.state.is_terminal() {
            return;
        }
        state.state = SubscriptionState::Cancelled;
        state.server_handle = None;
        state.active.clear();
    }
    entry.cancel.cancel();
    shared.registry.unbind_all(entry.id);
    shared.stats.record_cancelled();

    tracing::info!(subscription_id = %entry.id, "Subscription cancelled");
    shared.listener.on_state_change(entry.id, SubscriptionState::Cancelled).await;
}

async fn fail<T>(shared: &Shared<T>, entry: &SubscriptionEntry, error: XmlDaError) {
    if entry.state().is_cancelling() {
        tracing::debug!(subscription_id = %entry.id, error = %error, "Failure after cancel request");
        finalize_cancelled(shared, entry).await;
        return;
    }
    {
        let mut state = entry.state.lock();
        if state.state.is_terminal() {
            return;
        }
        state.state = SubscriptionState::Failed;
        state.server_handle = None;
        state.active.clear();
    }
    entry.cancel.cancel();
    shared.registry.unbind_all(entry.id);
    shared.stats.record_failed();

    error.log(&format!("subscription {}", entry.id));
    shared.listener.on_state_change(entry.id, SubscriptionState::Failed).await;
    shared.listener.on_subscription_failed(entry.id, error).await;
}

// =============================================================================
// Tests
// =============================================================================
