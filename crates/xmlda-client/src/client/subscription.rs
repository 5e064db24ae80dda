// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription state, requests, listeners and statistics.
//!
//! # Lifecycle
//!
//! ```text
//!            Subscribe ok                 cancel()          Cancel reply / timeout
//! Pending ───────────────────► Active ─────────────► Cancelling ─────────────► Cancelled
//!    │  ▲                        │
//!    │  └──── resubscribe ───────┤ poll failure threshold
//!    │                           │
//!    └── fault / retries ──► Failed ◄── invalid handle / fault / bad reply
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use super::reconciler::ValueChange;
use crate::error::{ItemError, SubscriptionError, XmlDaError};
use crate::types::{ItemIdentity, ServerSubHandle, SubscriptionId};

// =============================================================================
// Subscription State
// =============================================================================

/// State of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Subscribe sent, awaiting the reply.
    #[default]
    Pending,

    /// Handle assigned, polling.
    Active,

    /// Cancel requested; no further polls.
    Cancelling,

    /// Cancelled.
    Cancelled,

    /// Rejected by the server, invalidated, or gave up retrying.
    Failed,
}

impl SubscriptionState {
    /// Returns `true` while polling.
    #[inline]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns `true` for `Cancelled` and `Failed`.
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Failed)
    }

    /// Returns `true` once cancellation was requested.
    #[inline]
    pub const fn is_cancelling(&self) -> bool {
        matches!(self, Self::Cancelling | Self::Cancelled)
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Active => write!(f, "Active"),
            Self::Cancelling => write!(f, "Cancelling"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Subscription Request
// =============================================================================

/// What to subscribe.
///
/// Unset options fall back to the client's
/// [`SubscriptionDefaults`](crate::types::SubscriptionDefaults).
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRequest {
    /// Items of the group.
    pub items: Vec<ItemIdentity>,
    /// Requested polling interval.
    pub interval: Duration,
    /// Percent deadband.
    pub deadband: Option<f32>,
    /// Server-side buffering.
    pub enable_buffering: Option<bool>,
    /// Ping rate sent on Subscribe.
    pub ping_rate: Option<Duration>,
}

impl SubscriptionRequest {
    /// Creates a request.
    pub fn new<I>(items: I, interval: Duration) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ItemIdentity>,
    {
        Self {
            items: items.into_iter().map(Into::into).collect(),
            interval,
            deadband: None,
            enable_buffering: None,
            ping_rate: None,
        }
    }

    /// Sets the deadband.
    pub fn with_deadband(mut self, percent: f32) -> Self {
        self.deadband = Some(percent);
        self
    }

    /// Enables or disables buffering.
    pub fn with_buffering(mut self, enabled: bool) -> Self {
        self.enable_buffering = Some(enabled);
        self
    }

    /// Sets the ping rate.
    pub fn with_ping_rate(mut self, rate: Duration) -> Self {
        self.ping_rate = Some(rate);
        self
    }

    /// Validates the request.
    pub fn validate(&self, min_interval: Duration) -> Result<(), SubscriptionError> {
        if self.items.is_empty() {
            return Err(SubscriptionError::NoItems);
        }
        if self.interval.is_zero() || self.interval < min_interval {
            return Err(SubscriptionError::InvalidInterval {
                interval: self.interval,
                reason: format!("must be at least {min_interval:?}"),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Poll Cursor
// =============================================================================

/// Position of a subscription's polling.
///
/// Only moves forward; reset when the subscription is re-established.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollCursor {
    /// Completed polls since the last Subscribe.
    pub sequence: u64,
    /// Latest reply time seen.
    pub last_reply_time: Option<DateTime<Utc>>,
}

impl PollCursor {
    /// Returns `true` before the first poll of a subscription.
    pub fn is_initial(&self) -> bool {
        self.sequence == 0
    }

    /// Records a completed poll.
    pub fn advance(&mut self, reply_time: DateTime<Utc>) {
        self.sequence += 1;
        self.last_reply_time = Some(match self.last_reply_time {
            Some(last) if last > reply_time => last,
            _ => reply_time,
        });
    }

    /// Starts over.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// =============================================================================
// Events and Listeners
// =============================================================================

/// Anything a listener can be told.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    /// An item changed.
    ValueChanged(ValueChange),
    /// An item failed.
    ItemError {
        /// Subscription.
        subscription: SubscriptionId,
        /// Failure.
        error: ItemError,
    },
    /// The subscription changed state.
    StateChanged {
        /// Subscription.
        subscription: SubscriptionId,
        /// New state.
        state: SubscriptionState,
    },
    /// The subscription failed.
    Failed {
        /// Subscription.
        subscription: SubscriptionId,
        /// Cause.
        error: XmlDaError,
    },
}

/// Observer of subscription activity.
#[async_trait]
pub trait SubscriptionListener: Send + Sync {
    /// Called for every genuine value or quality change.
    async fn on_value_changed(&self, change: ValueChange);

    /// Called when an item fails to subscribe or reports a failure in a poll.
    async fn on_item_error(&self, _subscription: SubscriptionId, _error: ItemError) {}

    /// Called on every state transition.
    async fn on_state_change(&self, _subscription: SubscriptionId, _state: SubscriptionState) {}

    /// Called once when a subscription enters `Failed`.
    async fn on_subscription_failed(&self, _subscription: SubscriptionId, _error: XmlDaError) {}
}

/// A listener that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

#[async_trait]
impl SubscriptionListener for NoopListener {
    async fn on_value_changed(&self, _change: ValueChange) {}
}

/// Forwards every event into an mpsc channel.
///
/// Value changes wait for room in the channel. State, item error and failure
/// events never wait: when the channel is full they are dropped and counted,
/// so a caller that drains the receiver itself cannot stall `cancel`.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    sender: mpsc::Sender<SubscriptionEvent>,
    dropped: Arc<AtomicU64>,
}

impl ChannelListener {
    /// Creates a listener around a sender.
    pub fn new(sender: mpsc::Sender<SubscriptionEvent>) -> Self {
        Self {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates a listener and its receiver.
    pub fn with_channel(capacity: usize) -> (Self, mpsc::Receiver<SubscriptionEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Returns the number of events dropped on a full channel.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    async fn forward(&self, event: SubscriptionEvent) {
        if self.sender.send(event).await.is_err() {
            tracing::trace!("Subscription event receiver dropped");
        }
    }

    fn offer(&self, event: SubscriptionEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(event = ?event, "Subscription event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!("Subscription event receiver dropped");
            }
        }
    }
}

#[async_trait]
impl SubscriptionListener for ChannelListener {
    async fn on_value_changed(&self, change: ValueChange) {
        self.forward(SubscriptionEvent::ValueChanged(change)).await;
    }

    async fn on_item_error(&self, subscription: SubscriptionId, error: ItemError) {
        self.offer(SubscriptionEvent::ItemError { subscription, error });
    }

    async fn on_state_change(&self, subscription: SubscriptionId, state: SubscriptionState) {
        self.offer(SubscriptionEvent::StateChanged { subscription, state });
    }

    async fn on_subscription_failed(&self, subscription: SubscriptionId, error: XmlDaError) {
        self.offer(SubscriptionEvent::Failed { subscription, error });
    }
}

/// Broadcasts every event to any number of receivers.
#[derive(Debug, Clone)]
pub struct BroadcastListener {
    sender: broadcast::Sender<SubscriptionEvent>,
}

impl BroadcastListener {
    /// Creates a broadcast listener.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Returns a new receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<SubscriptionEvent> {
        self.sender.subscribe()
    }

    fn forward(&self, event: SubscriptionEvent) {
        // No receivers is fine.
        let _ = self.sender.send(event);
    }
}

#[async_trait]
impl SubscriptionListener for BroadcastListener {
    async fn on_value_changed(&self, change: ValueChange) {
        self.forward(SubscriptionEvent::ValueChanged(change));
    }

    async fn on_item_error(&self, subscription: SubscriptionId, error: ItemError) {
        self.forward(SubscriptionEvent::ItemError { subscription, error });
    }

    async fn on_state_change(&self, subscription: SubscriptionId, state: SubscriptionState) {
        self.forward(SubscriptionEvent::StateChanged { subscription, state });
    }

    async fn on_subscription_failed(&self, subscription: SubscriptionId, error: XmlDaError) {
        self.forward(SubscriptionEvent::Failed { subscription, error });
    }
}

type ValueSlot = Box<dyn Fn(ValueChange) + Send + Sync>;
type ItemErrorSlot = Box<dyn Fn(SubscriptionId, ItemError) + Send + Sync>;
type StateSlot = Box<dyn Fn(SubscriptionId, SubscriptionState) + Send + Sync>;
type FailureSlot = Box<dyn Fn(SubscriptionId, XmlDaError) + Send + Sync>;

/// A listener made of optional closures.
///
/// ```
/// use xmlda_client::client::CallbackListener;
///
/// let listener = CallbackListener::new()
///     .with_value_changed(|change| println!("{} = {}", change.item, change.value))
///     .with_failure(|id, error| eprintln!("{id} failed: {error}"));
/// # drop(listener);
/// ```
#[derive(Default)]
pub struct CallbackListener {
    value_changed: Option<ValueSlot>,
    item_error: Option<ItemErrorSlot>,
    state_change: Option<StateSlot>,
    failure: Option<FailureSlot>,
}

impl CallbackListener {
    /// Creates a listener with no slots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value change slot.
    pub fn with_value_changed<F>(mut self, f: F) -> Self
    where
        F: Fn(ValueChange) + Send + Sync + 'static,
    {
        self.value_changed = Some(Box::new(f));
        self
    }

    /// Sets the item error slot.
    pub fn with_item_error<F>(mut self, f: F) -> Self
    where
        F: Fn(SubscriptionId, ItemError) + Send + Sync + 'static,
    {
        self.item_error = Some(Box::new(f));
        self
    }

    /// Sets the state change slot.
    pub fn with_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(SubscriptionId, SubscriptionState) + Send + Sync + 'static,
    {
        self.state_change = Some(Box::new(f));
        self
    }

    /// Sets the failure slot.
    pub fn with_failure<F>(mut self, f: F) -> Self
    where
        F: Fn(SubscriptionId, XmlDaError) + Send + Sync + 'static,
    {
        self.failure = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for CallbackListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackListener")
            .field("value_changed", &self.value_changed.is_some())
            .field("item_error", &self.item_error.is_some())
            .field("state_change", &self.state_change.is_some())
            .field("failure", &self.failure.is_some())
            .finish()
    }
}

#[async_trait]
impl SubscriptionListener for CallbackListener {
    async fn on_value_changed(&self, change: ValueChange) {
        if let Some(slot) = &self.value_changed {
            slot(change);
        }
    }

    async fn on_item_error(&self, subscription: SubscriptionId, error: ItemError) {
        if let Some(slot) = &self.item_error {
            slot(subscription, error);
        }
    }

    async fn on_state_change(&self, subscription: SubscriptionId, state: SubscriptionState) {
        if let Some(slot) = &self.state_change {
            slot(subscription, state);
        }
    }

    async fn on_subscription_failed(&self, subscription: SubscriptionId, error: XmlDaError) {
        if let Some(slot) = &self.failure {
            slot(subscription, error);
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters of one subscription.
#[derive(Debug, Default)]
pub struct SubscriptionStats {
    polls: AtomicU64,
    poll_failures: AtomicU64,
    resubscriptions: AtomicU64,
    changes: AtomicU64,
    stale_records: AtomicU64,
    item_errors: AtomicU64,
    buffer_overflows: AtomicU64,
}

impl SubscriptionStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed poll.
    pub fn record_poll(&self, changes: usize, stale: usize) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.changes.fetch_add(changes as u64, Ordering::Relaxed);
        self.stale_records.fetch_add(stale as u64, Ordering::Relaxed);
    }

    /// Records a failed poll.
    pub fn record_poll_failure(&self) {
        self.poll_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a resubscription.
    pub fn record_resubscription(&self) {
        self.resubscriptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records changes outside a poll (initial values).
    pub fn record_changes(&self, changes: usize) {
        self.changes.fetch_add(changes as u64, Ordering::Relaxed);
    }

    /// Records item failures.
    pub fn record_item_errors(&self, count: usize) {
        self.item_errors.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Records a server buffer overflow.
    pub fn record_buffer_overflow(&self) {
        self.buffer_overflows.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot.
    pub fn snapshot(&self) -> SubscriptionStatsSnapshot {
        SubscriptionStatsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
            resubscriptions: self.resubscriptions.load(Ordering::Relaxed),
            changes: self.changes.load(Ordering::Relaxed),
            stale_records: self.stale_records.load(Ordering::Relaxed),
            item_errors: self.item_errors.load(Ordering::Relaxed),
            buffer_overflows: self.buffer_overflows.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`SubscriptionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStatsSnapshot {
    /// Completed polls.
    pub polls: u64,
    /// Polls that failed at the transport level.
    pub poll_failures: u64,
    /// Fresh Subscribes after repeated poll failures.
    pub resubscriptions: u64,
    /// Changes emitted.
    pub changes: u64,
    /// Records discarded as older than the cache.
    pub stale_records: u64,
    /// Item failures reported.
    pub item_errors: u64,
    /// Buffer overflows reported by the server.
    pub buffer_overflows: u64,
}

/// Counters across all subscriptions of a manager.
#[derive(Debug, Default)]
pub struct SubscriptionManagerStats {
    created: AtomicU64,
    cancelled: AtomicU64,
    failed: AtomicU64,
    resubscriptions: AtomicU64,
    polls: AtomicU64,
    poll_failures: AtomicU64,
    changes: AtomicU64,
}

impl SubscriptionManagerStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_resubscription(&self) {
        self.resubscriptions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_poll(&self, changes: usize) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.changes.fetch_add(changes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_poll_failure(&self) {
        self.poll_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_changes(&self, changes: usize) {
        self.changes.fetch_add(changes as u64, Ordering::Relaxed);
    }

    /// Returns a snapshot.
    pub fn snapshot(&self) -> SubscriptionManagerStatsSnapshot {
        SubscriptionManagerStatsSnapshot {
            created: self.created.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            resubscriptions: self.resubscriptions.load(Ordering::Relaxed),
            polls: self.polls.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
            changes: self.changes.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`SubscriptionManagerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionManagerStatsSnapshot {
    /// Subscriptions that became active.
    pub created: u64,
    /// Subscriptions cancelled.
    pub cancelled: u64,
    /// Subscriptions failed.
    pub failed: u64,
    /// Resubscriptions.
    pub resubscriptions: u64,
    /// Completed polls.
    pub polls: u64,
    /// Failed polls.
    pub poll_failures: u64,
    /// Changes emitted.
    pub changes: u64,
}

// =============================================================================
// Snapshot
// =============================================================================

/// Point-in-time view of a subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionSnapshot {
    /// Subscription id.
    pub id: SubscriptionId,
    /// Current state.
    pub state: SubscriptionState,
    /// Current server handle.
    pub server_handle: Option<ServerSubHandle>,
    /// Interval the caller asked for.
    pub requested_interval: Duration,
    /// Interval actually used between polls.
    pub effective_interval: Duration,
    /// Items being polled.
    pub active_items: Vec<ItemIdentity>,
    /// Items the server refused.
    pub failed_items: Vec<ItemError>,
    /// Polling position.
    pub cursor: PollCursor,
    /// Counters.
    pub stats: SubscriptionStatsSnapshot,
}

// =============================================================================
// Tests
// =============================================================================
