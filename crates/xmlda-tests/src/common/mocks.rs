// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock Implementations
//!
//! - [`ScriptedTransport`]: an instrumented [`XmlDaTransport`] serving
//!   scripted steps per operation, recording every call with its virtual
//!   send time and detecting overlapping polls on one subscription handle.
//! - [`EventLog`]: a [`SubscriptionListener`] that keeps every event for
//!   later inspection.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::Instant;

use xmlda_client::client::messages::{
    CancelResponse, GetStatusResponse, ItemValue, PolledItemList, PolledRefreshResponse,
    ReplyBase, SubscribeItemResult, SubscribeResponse,
};
use xmlda_client::client::{
    Operation, Request, Response, ServerStatus, SubscriptionEvent, SubscriptionListener,
    SubscriptionState, ValueChange, XmlDaTransport,
};
use xmlda_client::{ItemError, ServerItemHandle, ServerSubHandle, SubscriptionId, XmlDaError};
use xmlda_core::{InvokeError, InvokeResult};

// =============================================================================
// Scripted Steps
// =============================================================================

/// Builds a response from the request it answers.
pub type Responder = Arc<dyn Fn(&Request) -> InvokeResult<Response> + Send + Sync>;

/// What the transport does with one call.
#[derive(Clone)]
pub enum Step {
    /// Reply immediately.
    Reply(Response),
    /// Fail immediately.
    Fail(InvokeError),
    /// Compute the reply from the request.
    Respond(Responder),
    /// Never reply; the engine's timeout ends the call.
    Hang,
    /// Wait, then run the inner step.
    Delay(Duration, Box<Step>),
}

impl Step {
    /// Creates a responder step.
    pub fn respond<F>(f: F) -> Self
    where
        F: Fn(&Request) -> InvokeResult<Response> + Send + Sync + 'static,
    {
        Step::Respond(Arc::new(f))
    }

    /// Wraps the step in a delay.
    pub fn after(self, delay: Duration) -> Self {
        Step::Delay(delay, Box::new(self))
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Reply(r) => write!(f, "Reply({:?})", r.operation()),
            Step::Fail(e) => write!(f, "Fail({e})"),
            Step::Respond(_) => f.write_str("Respond(..)"),
            Step::Hang => f.write_str("Hang"),
            Step::Delay(d, inner) => write!(f, "Delay({d:?}, {inner:?})"),
        }
    }
}

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Operation invoked.
    pub operation: Operation,
    /// Full request.
    pub request: Request,
    /// Virtual time since the transport was created.
    pub sent_at: Duration,
}

impl RecordedCall {
    /// Returns the subscription handles a poll or cancel names.
    pub fn sub_handles(&self) -> Vec<ServerSubHandle> {
        match &self.request {
            Request::PolledRefresh(r) => r.server_sub_handles.clone(),
            Request::Cancel(r) => vec![r.server_sub_handle.clone()],
            _ => Vec::new(),
        }
    }
}

// =============================================================================
// ScriptedTransport
// =============================================================================

/// Instrumented transport driven by per-operation scripts.
///
/// When an operation's script is empty the transport falls back to:
///
/// - `Subscribe`: accept every item, handle `sub-N` (N counts Subscribe
///   calls), item server handles from [`server_item_handle`]
/// - `SubscriptionPolledRefresh`: an empty reply
/// - `SubscriptionCancel`: acknowledge
/// - `GetStatus`: a running server
/// - anything else: an `E_FAIL` fault
pub struct ScriptedTransport {
    endpoint: String,
    origin: Instant,
    scripts: Mutex<HashMap<Operation, VecDeque<Step>>>,
    calls: Mutex<Vec<RecordedCall>>,
    polls_in_flight: Mutex<HashSet<ServerSubHandle>>,
    overlaps: Mutex<Vec<ServerSubHandle>>,
    subscribe_count: AtomicU64,
    revised_rate: Mutex<Option<Duration>>,
}

impl ScriptedTransport {
    /// Creates a transport. Recorded times are relative to now.
    pub fn new() -> Self {
        Self {
            endpoint: "mock://scripted".to_string(),
            origin: Instant::now(),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            polls_in_flight: Mutex::new(HashSet::new()),
            overlaps: Mutex::new(Vec::new()),
            subscribe_count: AtomicU64::new(0),
            revised_rate: Mutex::new(None),
        }
    }

    /// Sets the sampling rate the default Subscribe reply revises to.
    pub fn with_revised_rate(self, rate: Duration) -> Self {
        *self.revised_rate.lock() = Some(rate);
        self
    }

    /// Queues a step for `operation`.
    pub fn push(&self, operation: Operation, step: Step) -> &Self {
        self.scripts
            .lock()
            .entry(operation)
            .or_default()
            .push_back(step);
        self
    }

    /// Queues a reply.
    pub fn push_reply(&self, response: Response) -> &Self {
        self.push(response.operation(), Step::Reply(response))
    }

    /// Queues a poll reply carrying `items` for any handle.
    pub fn push_poll(&self, items: Vec<ItemValue>) -> &Self {
        self.push_reply(poll_reply(items))
    }

    /// Queues a failure.
    pub fn push_failure(&self, operation: Operation, error: InvokeError) -> &Self {
        self.push(operation, Step::Fail(error))
    }

    /// Queues `count` calls that never answer.
    pub fn push_hangs(&self, operation: Operation, count: usize) -> &Self {
        for _ in 0..count {
            self.push(operation, Step::Hang);
        }
        self
    }

    /// Returns every recorded call.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Returns the recorded calls of one operation.
    pub fn calls_for(&self, operation: Operation) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    /// Returns how often `operation` was invoked.
    pub fn count(&self, operation: Operation) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Returns the send times of `operation` in milliseconds.
    pub fn send_times_ms(&self, operation: Operation) -> Vec<u128> {
        self.calls_for(operation)
            .iter()
            .map(|c| c.sent_at.as_millis())
            .collect()
    }

    /// Returns the handles that saw a poll while another was in flight.
    pub fn overlaps(&self) -> Vec<ServerSubHandle> {
        self.overlaps.lock().clone()
    }

    /// Panics if two polls for the same handle were ever in flight together.
    pub fn assert_no_overlapping_polls(&self) {
        let overlaps = self.overlaps();
        assert!(
            overlaps.is_empty(),
            "overlapping SubscriptionPolledRefresh calls for {overlaps:?}"
        );
    }

    fn record(&self, request: &Request) {
        let sent_at = self.origin.elapsed();
        tracing::trace!(
            operation = request.operation().as_str(),
            sent_at_ms = sent_at.as_millis() as u64,
            "Scripted call"
        );
        self.calls.lock().push(RecordedCall {
            operation: request.operation(),
            request: request.clone(),
            sent_at,
        });
    }

    fn next_step(&self, operation: Operation) -> Option<Step> {
        self.scripts
            .lock()
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
    }

    fn fallback(&self, request: &Request) -> InvokeResult<Response> {
        match request {
            Request::Subscribe(_) => {
                let n = self.subscribe_count.load(Ordering::SeqCst);
                accept_all(request, &format!("sub-{n}"), *self.revised_rate.lock())
            }
            Request::PolledRefresh(_) => Ok(poll_reply(Vec::new())),
            Request::Cancel(r) => Ok(Response::Cancel(CancelResponse {
                client_request_handle: r.client_request_handle.clone(),
            })),
            Request::GetStatus(_) => Ok(Response::GetStatus(GetStatusResponse {
                reply: ReplyBase::at(Utc::now()),
                status: Some(ServerStatus {
                    product_version: Some("1.0".into()),
                    ..Default::default()
                }),
            })),
            other => Err(InvokeError::server_fault(
                "E_FAIL",
                format!("no script for {}", other.operation().as_str()),
            )),
        }
    }

    async fn run(&self, step: Step, request: &Request) -> InvokeResult<Response> {
        let mut step = step;
        loop {
            match step {
                Step::Reply(response) => return Ok(response),
                Step::Fail(error) => return Err(error),
                Step::Respond(responder) => return responder(request),
                Step::Hang => std::future::pending::<()>().await,
                Step::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    step = *inner;
                }
            }
        }
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("calls", &self.calls.lock().len())
            .field("overlaps", &self.overlaps.lock().len())
            .finish()
    }
}

/// Marks poll handles in flight until dropped, including when the engine's
/// timeout drops the call.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<ServerSubHandle>>,
    handles: Vec<ServerSubHandle>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut set = self.set.lock();
        for handle in &self.handles {
            set.remove(handle);
        }
    }
}

#[async_trait]
impl XmlDaTransport for ScriptedTransport {
    async fn invoke(&self, request: Request, _timeout: Duration) -> InvokeResult<Response> {
        self.record(&request);
        let operation = request.operation();
        if operation == Operation::Subscribe {
            self.subscribe_count.fetch_add(1, Ordering::SeqCst);
        }

        let _guard = match &request {
            Request::PolledRefresh(poll) => {
                let mut set = self.polls_in_flight.lock();
                let mut handles = Vec::new();
                for handle in &poll.server_sub_handles {
                    if set.insert(handle.clone()) {
                        handles.push(handle.clone());
                    } else {
                        self.overlaps.lock().push(handle.clone());
                    }
                }
                Some(InFlight {
                    set: &self.polls_in_flight,
                    handles,
                })
            }
            _ => None,
        };

        match self.next_step(operation) {
            Some(step) => self.run(step, &request).await,
            None => self.fallback(&request),
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

// =============================================================================
// Reply Helpers
// =============================================================================

/// Server item handle the default Subscribe reply assigns to `item_name`.
pub fn server_item_handle(item_name: &str) -> ServerItemHandle {
    ServerItemHandle::new(format!("srv:{item_name}"))
}

/// Accepts every item of a Subscribe request under `handle`.
pub fn accept_all(
    request: &Request,
    handle: &str,
    revised_rate: Option<Duration>,
) -> InvokeResult<Response> {
    accept_except(request, handle, revised_rate, &[])
}

/// Accepts a Subscribe request except for the `(item name, result code)`
/// pairs in `failures`.
pub fn accept_except(
    request: &Request,
    handle: &str,
    revised_rate: Option<Duration>,
    failures: &[(&str, &str)],
) -> InvokeResult<Response> {
    let Request::Subscribe(subscribe) = request else {
        return Err(InvokeError::decode("Subscribe", "not a Subscribe request"));
    };

    let items = subscribe
        .items
        .iter()
        .map(|item| {
            let name = item.item.item_name.as_str();
            let value = ItemValue::new(item.item.clone()).with_client_handle(item.client_item_handle.clone());
            let item_value = match failures.iter().find(|(failed, _)| *failed == name) {
                Some((_, code)) => value.with_result(*code),
                None => value.with_server_handle(server_item_handle(name)),
            };
            SubscribeItemResult {
                item_value,
                revised_sampling_rate: None,
            }
        })
        .collect();

    Ok(Response::Subscribe(SubscribeResponse {
        reply: ReplyBase::at(Utc::now()),
        server_sub_handle: Some(ServerSubHandle::new(handle)),
        items,
        revised_sampling_rate: revised_rate,
        errors: Vec::new(),
    }))
}

/// A poll reply carrying `items` in one list without a handle.
pub fn poll_reply(items: Vec<ItemValue>) -> Response {
    Response::PolledRefresh(PolledRefreshResponse {
        reply: ReplyBase::at(Utc::now()),
        invalid_server_sub_handles: Vec::new(),
        item_lists: vec![PolledItemList {
            server_sub_handle: None,
            items,
        }],
        errors: Vec::new(),
        data_buffer_overflow: false,
        revised_sampling_rate: None,
    })
}

/// A poll reply declaring `handle` invalid.
pub fn invalid_handle_reply(handle: &str) -> Response {
    Response::PolledRefresh(PolledRefreshResponse {
        reply: ReplyBase::at(Utc::now()),
        invalid_server_sub_handles: vec![ServerSubHandle::new(handle)],
        item_lists: Vec::new(),
        errors: Vec::new(),
        data_buffer_overflow: false,
        revised_sampling_rate: None,
    })
}

// =============================================================================
// EventLog
// =============================================================================

/// Listener that keeps every event.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<SubscriptionEvent>>,
}

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns every event so far.
    pub fn events(&self) -> Vec<SubscriptionEvent> {
        self.events.lock().clone()
    }

    /// Returns the value changes so far.
    pub fn changes(&self) -> Vec<ValueChange> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SubscriptionEvent::ValueChanged(change) => Some(change.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the item errors so far.
    pub fn item_errors(&self) -> Vec<ItemError> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SubscriptionEvent::ItemError { error, .. } => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the state transitions of one subscription in order.
    pub fn states(&self, id: SubscriptionId) -> Vec<SubscriptionState> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SubscriptionEvent::StateChanged { subscription, state } if *subscription == id => {
                    Some(*state)
                }
                _ => None,
            })
            .collect()
    }

    /// Returns the failures reported so far.
    pub fn failures(&self) -> Vec<XmlDaError> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SubscriptionEvent::Failed { error, .. } => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forgets every event.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn push(&self, event: SubscriptionEvent) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl SubscriptionListener for EventLog {
    async fn on_value_changed(&self, change: ValueChange) {
        self.push(SubscriptionEvent::ValueChanged(change));
    }

    async fn on_item_error(&self, subscription: SubscriptionId, error: ItemError) {
        self.push(SubscriptionEvent::ItemError { subscription, error });
    }

    async fn on_state_change(&self, subscription: SubscriptionId, state: SubscriptionState) {
        self.push(SubscriptionEvent::StateChanged { subscription, state });
    }

    async fn on_subscription_failed(&self, subscription: SubscriptionId, error: XmlDaError) {
        self.push(SubscriptionEvent::Failed { subscription, error });
    }
}
