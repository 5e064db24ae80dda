// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Subscription Integration Tests
//!
//! Subscribe, poll cadence, change suppression, cancellation and item
//! failures, driven through `XmlDaClient` over a scripted transport in
//! virtual time.

use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;

use xmlda_client::client::messages::{
    CancelResponse, ItemValue, ReplyBase, SubscribeItemResult, SubscribeResponse,
};
use xmlda_client::client::{Operation, Request, Response, SubscriptionState};
use xmlda_client::{
    InvokeError, ItemIdentity, ProtocolViolation, Quality, ResultCode, ServerItemHandle,
    ServerSubHandle, SubscriptionError, Value, XmlDaError,
};
use xmlda_tests::prelude::*;

fn item(name: &str) -> ItemIdentity {
    ItemIdentity::named(name)
}

fn poll_handles(transport: &ScriptedTransport, handle: &str) -> Vec<u128> {
    transport
        .calls_for(Operation::SubscriptionPolledRefresh)
        .iter()
        .filter(|c| c.sub_handles().iter().any(|h| h.as_str() == handle))
        .map(|c| c.sent_at.as_millis())
        .collect()
}

// =============================================================================
// Cadence and Change Detection
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_revised_interval_drives_polls_and_suppresses_unchanged() {
    init_test_logging();
    let transport = ScriptedTransport::new().with_revised_rate(Duration::from_millis(2000));
    transport.push_poll(vec![polled("A", 10i32, 1), polled("B", 5i32, 1)]);
    transport.push_poll(vec![polled("A", 10i32, 3), polled("B", 7i32, 3)]);
    let t = TestClient::new(transport);

    let id = t
        .client
        .subscribe(["A", "B"], Duration::from_millis(1000))
        .await
        .unwrap();
    assert_eq!(
        t.client.subscription_snapshot(id).unwrap().effective_interval,
        Duration::from_millis(2000)
    );

    sleep(Duration::from_millis(2500)).await;
    let changes = t.events.changes();
    assert_eq!(changes.len(), 2);
    assert!(changes.iter().all(|c| c.subscription == Some(id)));

    sleep(Duration::from_millis(2000)).await;
    let changes = t.events.changes();
    assert_eq!(changes.len(), 3);
    let last = &changes[2];
    assert_eq!(last.item, item("B"));
    assert_eq!(last.value, Value::Int32(7));
    assert_eq!(
        last.previous.as_ref().map(|p| p.value.clone()),
        Some(Value::Int32(5))
    );

    let times = t.transport.send_times_ms(Operation::SubscriptionPolledRefresh);
    assert_eq!(&times[..2], &[2000, 4000]);

    let polls = t.transport.calls_for(Operation::SubscriptionPolledRefresh);
    match (&polls[0].request, &polls[1].request) {
        (Request::PolledRefresh(first), Request::PolledRefresh(second)) => {
            assert!(first.return_all_items);
            assert!(!second.return_all_items);
            assert_eq!(first.server_sub_handles[0].as_str(), "sub-1");
        }
        other => panic!("unexpected requests {other:?}"),
    }

    t.client.cancel(id).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stale_timestamp_is_discarded() {
    init_test_logging();
    let transport = ScriptedTransport::new();
    transport.push_poll(vec![polled("A", 10i32, 10)]);
    transport.push_poll(vec![polled("A", 11i32, 5)]);
    let t = TestClient::new(transport);

    let id = t.client.subscribe(["A"], Duration::from_secs(1)).await.unwrap();
    sleep(Duration::from_millis(2500)).await;

    assert_eq!(t.events.changes().len(), 1);
    let cached = t.client.last_value(&item("A")).unwrap();
    assert_eq!(cached.value, Value::Int32(10));
    assert_eq!(cached.source_timestamp, ts(10));

    let snapshot = t.client.subscription_snapshot(id).unwrap();
    assert_eq!(snapshot.stats.stale_records, 1);
    assert_eq!(snapshot.stats.polls, 2);
}

#[tokio::test(start_paused = true)]
async fn test_quality_change_with_same_value_is_emitted() {
    init_test_logging();
    let transport = ScriptedTransport::new();
    transport.push_poll(vec![polled("A", 1.5f64, 1)]);
    transport.push_poll(vec![polled_with_quality("A", 1.5f64, Quality::BAD, 2)]);
    transport.push_poll(vec![polled_with_quality("A", 1.5f64, Quality::BAD, 3)]);
    let t = TestClient::new(transport);

    t.client.subscribe(["A"], Duration::from_secs(1)).await.unwrap();
    sleep(Duration::from_millis(3500)).await;

    let changes = t.events.changes();
    assert_eq!(changes.len(), 2);
    assert!(changes[1].quality.is_bad());
    assert_eq!(t.client.last_value(&item("A")).unwrap().source_timestamp, ts(3));
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_polls_never_overlap() {
    init_test_logging();
    let transport = ScriptedTransport::new();
    for n in 0..6 {
        transport.push(
            Operation::SubscriptionPolledRefresh,
            Step::Reply(poll_reply(vec![polled("A", n as i32, n)])).after(Duration::from_millis(2500)),
        );
    }
    let t = TestClient::new(transport);

    t.client.subscribe(["A"], Duration::from_secs(1)).await.unwrap();
    t.client.subscribe(["B"], Duration::from_secs(1)).await.unwrap();
    sleep(Duration::from_secs(20)).await;

    t.transport.assert_no_overlapping_polls();
    for handle in ["sub-1", "sub-2"] {
        let times = poll_handles(&t.transport, handle);
        assert!(times.len() >= 3, "{handle} polled {times:?}");
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= 1000, "{handle} polled too early: {times:?}");
        }
    }
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_during_inflight_poll() {
    init_test_logging();
    let transport = ScriptedTransport::new();
    transport.push(
        Operation::SubscriptionPolledRefresh,
        Step::Reply(poll_reply(vec![polled("A", 1i32, 1)])).after(Duration::from_millis(3000)),
    );
    let t = TestClient::new(transport);

    let id = t.client.subscribe(["A"], Duration::from_secs(1)).await.unwrap();
    sleep(Duration::from_millis(2000)).await;
    assert_eq!(t.transport.count(Operation::SubscriptionPolledRefresh), 1);

    t.client.cancel(id).await.unwrap();
    assert_eq!(t.client.subscription_state(id).unwrap(), SubscriptionState::Cancelled);

    sleep(Duration::from_secs(10)).await;

    assert_eq!(t.transport.count(Operation::SubscriptionPolledRefresh), 1);
    assert_eq!(t.transport.count(Operation::SubscriptionCancel), 1);
    assert!(t.events.changes().is_empty());
    // The late reply still lands in the cache.
    assert_eq!(t.client.last_value(&item("A")).unwrap().value, Value::Int32(1));
    assert_eq!(
        t.events.states(id),
        vec![
            SubscriptionState::Pending,
            SubscriptionState::Active,
            SubscriptionState::Cancelling,
            SubscriptionState::Cancelled,
        ]
    );

    // A second cancel is a no-op.
    t.client.cancel(id).await.unwrap();
    assert_eq!(t.transport.count(Operation::SubscriptionCancel), 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_reaches_other_subscription_on_same_item() {
    init_test_logging();
    let transport = ScriptedTransport::new();
    transport.push(
        Operation::SubscriptionPolledRefresh,
        Step::Reply(poll_reply(vec![polled("A", 1i32, 1)])).after(Duration::from_millis(3000)),
    );
    transport.push_poll(vec![polled("A", 1i32, 2)]);
    let t = TestClient::new(transport);

    let first = t.client.subscribe(["A"], Duration::from_secs(1)).await.unwrap();
    let second = t.client.subscribe(["A"], Duration::from_secs(10)).await.unwrap();
    sleep(Duration::from_millis(2000)).await;
    t.client.cancel(first).await.unwrap();

    // The late reply lands at 4 s; the second subscription polls the same
    // reading at 10 s and suppresses it against the cache.
    sleep(Duration::from_secs(9)).await;

    let polls = t.transport.calls_for(Operation::SubscriptionPolledRefresh);
    assert_eq!(polls[1].sub_handles()[0].as_str(), "sub-2");
    let changes = t.events.changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].subscription, Some(second));
    assert_eq!(changes[0].value, Value::Int32(1));

    t.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_subscribe_in_flight() {
    init_test_logging();
    let transport = ScriptedTransport::new();
    transport.push(
        Operation::Subscribe,
        Step::respond(|r| accept_all(r, "slow", None)).after(Duration::from_secs(2)),
    );
    let t = TestClient::new(transport);
    let client = std::sync::Arc::new(t.client);

    let subscriber = {
        let client = std::sync::Arc::clone(&client);
        tokio::spawn(async move { client.subscribe(["A"], Duration::from_secs(1)).await })
    };
    sleep(Duration::from_millis(500)).await;

    let id = client.subscription_ids()[0];
    client.cancel(id).await.unwrap();

    let result = subscriber.await.unwrap();
    assert!(matches!(
        result,
        Err(XmlDaError::Subscription(SubscriptionError::Cancelled { .. }))
    ));
    assert_eq!(client.subscription_state(id).unwrap(), SubscriptionState::Cancelled);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(t.transport.count(Operation::SubscriptionPolledRefresh), 0);
    let cancels = t.transport.calls_for(Operation::SubscriptionCancel);
    assert_eq!(cancels.len(), 1);
    assert_eq!(cancels[0].sub_handles()[0].as_str(), "slow");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_every_subscription() {
    init_test_logging();
    let t = TestClient::new(ScriptedTransport::new());

    let first = t.client.subscribe(["A"], Duration::from_secs(1)).await.unwrap();
    let second = t.client.subscribe(["B", "C"], Duration::from_secs(2)).await.unwrap();
    sleep(Duration::from_millis(2500)).await;

    t.client.shutdown().await;
    let polls = t.transport.count(Operation::SubscriptionPolledRefresh);

    assert_eq!(t.transport.count(Operation::SubscriptionCancel), 2);
    let stats = t.client.subscription_stats();
    assert_eq!((stats.created, stats.cancelled), (2, 2));
    for id in [first, second] {
        assert_eq!(t.client.subscription_state(id).unwrap(), SubscriptionState::Cancelled);
    }

    sleep(Duration::from_secs(10)).await;
    assert_eq!(t.transport.count(Operation::SubscriptionPolledRefresh), polls);
    assert_eq!(t.client.cleanup_subscriptions(), 2);
    assert!(t.client.subscription_ids().is_empty());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_partial_item_failure_keeps_subscription() {
    init_test_logging();
    let transport = ScriptedTransport::new();
    transport.push(
        Operation::Subscribe,
        Step::respond(|r| accept_except(r, "sub-partial", None, &[("B", ResultCode::E_UNKNOWNITEMNAME)])),
    );
    transport.push_poll(vec![polled("A", 42i32, 1)]);
    let t = TestClient::new(transport);

    let id = t.client.subscribe(["A", "B"], Duration::from_secs(1)).await.unwrap();
    let snapshot = t.client.subscription_snapshot(id).unwrap();
    assert_eq!(snapshot.state, SubscriptionState::Active);
    assert_eq!(snapshot.active_items, vec![item("A")]);
    assert_eq!(snapshot.failed_items.len(), 1);
    assert_eq!(snapshot.failed_items[0].code.as_str(), ResultCode::E_UNKNOWNITEMNAME);

    let errors = t.events.item_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].item, item("B"));

    sleep(Duration::from_millis(1500)).await;
    let changes = t.events.changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].value, Value::Int32(42));
}

#[tokio::test(start_paused = true)]
async fn test_all_items_failing_rejects_subscription() {
    init_test_logging();
    let transport = ScriptedTransport::new();
    transport.push(
        Operation::Subscribe,
        Step::respond(|r| {
            accept_except(
                r,
                "sub-none",
                None,
                &[("A", ResultCode::E_UNKNOWNITEMNAME), ("B", ResultCode::E_INVALIDITEMPATH)],
            )
        }),
    );
    let t = TestClient::new(transport);

    let result = t.client.subscribe(["A", "B"], Duration::from_secs(1)).await;
    assert!(matches!(
        result,
        Err(XmlDaError::Subscription(SubscriptionError::Rejected { .. }))
    ));
    assert_eq!(t.events.item_errors().len(), 2);

    let id = t.client.subscription_ids()[0];
    assert_eq!(t.client.subscription_state(id).unwrap(), SubscriptionState::Failed);
    sleep(Duration::from_secs(5)).await;
    assert_eq!(t.transport.count(Operation::SubscriptionPolledRefresh), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_handle_fails_subscription() {
    init_test_logging();
    let transport = ScriptedTransport::new();
    transport.push_reply(invalid_handle_reply("sub-1"));
    let t = TestClient::new(transport);

    let id = t.client.subscribe(["A"], Duration::from_secs(1)).await.unwrap();
    sleep(Duration::from_millis(1500)).await;

    assert_eq!(t.client.subscription_state(id).unwrap(), SubscriptionState::Failed);
    let failures = t.events.failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0],
        XmlDaError::Subscription(SubscriptionError::Invalidated { .. })
    ));

    sleep(Duration::from_secs(5)).await;
    assert_eq!(t.transport.count(Operation::SubscriptionPolledRefresh), 1);
    assert_eq!(t.client.registry().bound_count(id), 0);

    // Cancelling a failed subscription changes nothing.
    t.client.cancel(id).await.unwrap();
    assert_eq!(t.transport.count(Operation::SubscriptionCancel), 0);
}

#[tokio::test(start_paused = true)]
async fn test_poll_item_failure_is_reported() {
    init_test_logging();
    let transport = ScriptedTransport::new();
    transport.push_poll(vec![polled("A", 1i32, 1), polled_failure("B", ResultCode::E_ACCESS_DENIED)]);
    let t = TestClient::new(transport);

    let id = t.client.subscribe(["A", "B"], Duration::from_secs(1)).await.unwrap();
    sleep(Duration::from_millis(1500)).await;

    assert_eq!(t.events.changes().len(), 1);
    let errors = t.events.item_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].item, item("B"));
    assert_eq!(t.client.subscription_state(id).unwrap(), SubscriptionState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_subscribe_results_are_ignored() {
    init_test_logging();
    let transport = ScriptedTransport::new();
    transport.push(
        Operation::Subscribe,
        Step::respond(|request| {
            let Request::Subscribe(subscribe) = request else {
                panic!("not a Subscribe: {:?}", request.operation());
            };
            let entry = |name: &str| {
                let item = subscribe
                    .items
                    .iter()
                    .find(|i| i.item.item_name == name)
                    .expect("item was requested");
                ItemValue::new(item.item.clone()).with_client_handle(item.client_item_handle.clone())
            };
            let missing = entry("B").with_result(ResultCode::E_UNKNOWNITEMNAME);
            let results = vec![
                entry("A").with_server_handle(server_item_handle("A")),
                entry("A").with_server_handle(ServerItemHandle::new("srv:A-again")),
                missing.clone(),
                missing.clone(),
                missing,
            ];
            Ok(Response::Subscribe(SubscribeResponse {
                reply: ReplyBase::at(Utc::now()),
                server_sub_handle: Some(ServerSubHandle::new("sub-1")),
                items: results
                    .into_iter()
                    .map(|item_value| SubscribeItemResult {
                        item_value,
                        revised_sampling_rate: None,
                    })
                    .collect(),
                revised_sampling_rate: None,
                errors: Vec::new(),
            }))
        }),
    );
    transport.push_poll(vec![polled("A", 4i32, 1)]);
    let t = TestClient::new(transport);

    let id = t.client.subscribe(["A", "B"], Duration::from_secs(1)).await.unwrap();

    let snapshot = t.client.subscription_snapshot(id).unwrap();
    assert_eq!(snapshot.state, SubscriptionState::Active);
    assert_eq!(snapshot.active_items, vec![item("A")]);
    assert_eq!(snapshot.failed_items.len(), 1);
    assert_eq!(t.events.item_errors().len(), 1);

    // The first result's server handle is the one bound.
    sleep(Duration::from_millis(1500)).await;
    let changes = t.events.changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].value, Value::Int32(4));

    t.client.shutdown().await;
}

// =============================================================================
// Protocol Violations
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_mismatched_poll_reply_fails_subscription() {
    init_test_logging();
    let transport = ScriptedTransport::new();
    transport.push(
        Operation::SubscriptionPolledRefresh,
        Step::Reply(Response::Cancel(CancelResponse::default())),
    );
    let t = TestClient::new(transport);

    let id = t.client.subscribe(["A"], Duration::from_secs(1)).await.unwrap();
    sleep(Duration::from_millis(1500)).await;

    assert_eq!(t.client.subscription_state(id).unwrap(), SubscriptionState::Failed);
    assert_eq!(t.events.states(id).last(), Some(&SubscriptionState::Failed));
    let failures = t.events.failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0],
        XmlDaError::Protocol(ProtocolViolation::UnexpectedResponse { .. })
    ));

    sleep(Duration::from_secs(10)).await;
    assert_eq!(t.transport.count(Operation::SubscriptionPolledRefresh), 1);
    assert_eq!(t.transport.count(Operation::Subscribe), 1);
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_poll_reply_fails_subscription() {
    init_test_logging();
    let transport = ScriptedTransport::new();
    transport.push_failure(
        Operation::SubscriptionPolledRefresh,
        InvokeError::decode("SubscriptionPolledRefresh", "truncated envelope"),
    );
    let t = TestClient::new(transport);

    let id = t.client.subscribe(["A"], Duration::from_secs(1)).await.unwrap();
    sleep(Duration::from_millis(1500)).await;

    assert_eq!(t.client.subscription_state(id).unwrap(), SubscriptionState::Failed);
    assert_eq!(t.events.states(id).last(), Some(&SubscriptionState::Failed));
    let failures = t.events.failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0],
        XmlDaError::Protocol(ProtocolViolation::Decode { .. })
    ));

    sleep(Duration::from_secs(10)).await;
    assert_eq!(t.transport.count(Operation::SubscriptionPolledRefresh), 1);
    assert_eq!(t.transport.count(Operation::Subscribe), 1);
}
