// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Recovery Integration Tests
//!
//! Subscribe retries, poll backoff and resubscription after repeated poll
//! failures.

use std::time::Duration;

use tokio::time::sleep;

use xmlda_client::client::{Operation, Request, SubscriptionState};
use xmlda_client::{InvokeError, ResultCode, SubscriptionError, Value, XmlDaError};
use xmlda_tests::prelude::*;

fn subscribed_items(call: &RecordedCall) -> Vec<(String, String)> {
    match &call.request {
        Request::Subscribe(request) => request
            .items
            .iter()
            .map(|i| (i.item.item_name.clone(), i.client_item_handle.as_str().to_string()))
            .collect(),
        other => panic!("not a Subscribe: {:?}", other.operation()),
    }
}

// =============================================================================
// Subscribe Retries
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_subscribe_backs_off_on_transport_failure() {
    init_test_logging();
    let transport = ScriptedTransport::new();
    transport
        .push_failure(Operation::Subscribe, InvokeError::connection("Subscribe", "refused"))
        .push_failure(Operation::Subscribe, InvokeError::connection("Subscribe", "refused"));
    let t = TestClient::new(transport);

    let id = t.client.subscribe(["A"], Duration::from_secs(1)).await.unwrap();

    assert_eq!(t.transport.send_times_ms(Operation::Subscribe), vec![0, 500, 1500]);
    assert_eq!(t.client.subscription_state(id).unwrap(), SubscriptionState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_gives_up_after_max_attempts() {
    init_test_logging();
    let transport = ScriptedTransport::new();
    for _ in 0..3 {
        transport.push_failure(
            Operation::Subscribe,
            InvokeError::timeout("Subscribe", Duration::from_secs(30)),
        );
    }
    let t = TestClient::with_config(ConfigFixtures::with_subscribe_attempts(3), transport);

    let result = t.client.subscribe(["A"], Duration::from_secs(1)).await;

    assert!(matches!(
        result,
        Err(XmlDaError::Subscription(SubscriptionError::RetriesExhausted { attempts: 3, .. }))
    ));
    assert_eq!(t.transport.count(Operation::Subscribe), 3);
    let id = t.client.subscription_ids()[0];
    assert_eq!(t.client.subscription_state(id).unwrap(), SubscriptionState::Failed);
    assert_eq!(t.events.failures().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_fault_is_not_retried() {
    init_test_logging();
    let transport = ScriptedTransport::new();
    transport.push_failure(
        Operation::Subscribe,
        InvokeError::server_fault("E_FAIL", "subscription limit reached"),
    );
    let t = TestClient::new(transport);

    let result = t.client.subscribe(["A"], Duration::from_secs(1)).await;

    assert!(matches!(
        result,
        Err(XmlDaError::Subscription(SubscriptionError::Rejected { .. }))
    ));
    assert_eq!(t.transport.count(Operation::Subscribe), 1);
}

// =============================================================================
// Poll Recovery
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_three_poll_timeouts_force_resubscribe() {
    init_test_logging();
    let transport = ScriptedTransport::new();
    transport.push_hangs(Operation::SubscriptionPolledRefresh, 3);
    let t = TestClient::new(transport);

    let id = t.client.subscribe(["A", "B"], Duration::from_secs(1)).await.unwrap();

    // Timeouts end each hung poll after 30 s; the re-poll waits one interval.
    sleep(Duration::from_secs(92)).await;
    assert_eq!(t.transport.count(Operation::Subscribe), 1);
    assert_eq!(
        t.client.subscription_state(id).unwrap(),
        SubscriptionState::Active
    );

    sleep(Duration::from_secs(3)).await;
    let subscribes = t.transport.calls_for(Operation::Subscribe);
    assert_eq!(subscribes.len(), 2);
    assert_eq!(subscribes[1].sent_at.as_millis(), 93_000);
    assert_eq!(subscribed_items(&subscribes[0]), subscribed_items(&subscribes[1]));

    let snapshot = t.client.subscription_snapshot(id).unwrap();
    assert_eq!(snapshot.state, SubscriptionState::Active);
    assert_eq!(snapshot.server_handle.unwrap().as_str(), "sub-2");
    assert_eq!(snapshot.stats.resubscriptions, 1);
    assert_eq!(snapshot.stats.poll_failures, 3);

    let polls = t.transport.calls_for(Operation::SubscriptionPolledRefresh);
    assert_eq!(polls[3].sub_handles()[0].as_str(), "sub-2");
    assert_eq!(t.transport.count(Operation::SubscriptionCancel), 0);
    t.transport.assert_no_overlapping_polls();

    assert_eq!(
        t.events.states(id),
        vec![
            SubscriptionState::Pending,
            SubscriptionState::Active,
            SubscriptionState::Pending,
            SubscriptionState::Active,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_poll_failures_below_threshold_keep_subscription() {
    init_test_logging();
    let transport = ScriptedTransport::new();
    transport
        .push_failure(
            Operation::SubscriptionPolledRefresh,
            InvokeError::connection("SubscriptionPolledRefresh", "reset"),
        )
        .push_failure(
            Operation::SubscriptionPolledRefresh,
            InvokeError::connection("SubscriptionPolledRefresh", "reset"),
        )
        .push_poll(vec![polled("A", 3i32, 1)]);
    let t = TestClient::new(transport);

    let id = t.client.subscribe(["A"], Duration::from_secs(1)).await.unwrap();
    sleep(Duration::from_millis(3500)).await;

    // Backoff never polls faster than the interval.
    let times = t.transport.send_times_ms(Operation::SubscriptionPolledRefresh);
    assert_eq!(&times[..3], &[1000, 2000, 3000]);
    assert_eq!(t.transport.count(Operation::Subscribe), 1);
    let changes = t.events.changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].value, Value::Int32(3));

    let snapshot = t.client.subscription_snapshot(id).unwrap();
    assert_eq!(snapshot.stats.poll_failures, 2);
    assert_eq!(snapshot.stats.resubscriptions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_no_subscription_fault_invalidates() {
    init_test_logging();
    let transport = ScriptedTransport::new();
    transport.push_failure(
        Operation::SubscriptionPolledRefresh,
        InvokeError::server_fault(ResultCode::E_NOSUBSCRIPTION, "unknown handle"),
    );
    let t = TestClient::new(transport);

    let id = t.client.subscribe(["A"], Duration::from_secs(1)).await.unwrap();
    sleep(Duration::from_millis(1500)).await;

    assert_eq!(t.client.subscription_state(id).unwrap(), SubscriptionState::Failed);
    assert!(matches!(
        t.events.failures()[0],
        XmlDaError::Subscription(SubscriptionError::Invalidated { .. })
    ));
    assert_eq!(t.transport.count(Operation::Subscribe), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_failure_fails_subscription() {
    init_test_logging();
    let transport = ScriptedTransport::new();
    transport.push_hangs(Operation::SubscriptionPolledRefresh, 3);
    transport.push(Operation::Subscribe, Step::respond(|r| accept_all(r, "sub-1", None)));
    transport.push_failure(
        Operation::Subscribe,
        InvokeError::server_fault("E_FAIL", "server shutting down"),
    );
    let t = TestClient::new(transport);

    let id = t.client.subscribe(["A"], Duration::from_secs(1)).await.unwrap();
    sleep(Duration::from_secs(100)).await;

    assert_eq!(t.transport.count(Operation::Subscribe), 2);
    assert_eq!(t.client.subscription_state(id).unwrap(), SubscriptionState::Failed);
    assert_eq!(t.transport.count(Operation::SubscriptionPolledRefresh), 3);
}
