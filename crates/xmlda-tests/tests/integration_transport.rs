// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Transport Adapter Integration Tests
//!
//! Runs the same subscription lifecycle over a callback transport and a
//! codec transport. Both wrap the scripted transport, so cadence and events
//! must match what the direct tests observe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::sleep;

use xmlda_client::client::{
    CallbackInvoker, CallbackTransport, CodecTransport, DecodeError, Operation, ReplySender,
    Request, Response, RpcChannel, WireCodec,
};
use xmlda_client::{
    InvokeError, InvokeResult, ItemIdentity, SubscriptionState, Value, XmlDaClient, XmlDaTransport,
};
use xmlda_tests::prelude::*;

fn script() -> Arc<ScriptedTransport> {
    let transport = ScriptedTransport::new().with_revised_rate(Duration::from_millis(2000));
    transport.push_poll(vec![polled("A", 10i32, 1), polled("B", 5i32, 1)]);
    transport.push_poll(vec![polled("A", 10i32, 3), polled("B", 7i32, 3)]);
    Arc::new(transport)
}

fn client_over<T: XmlDaTransport + 'static>(transport: T) -> (XmlDaClient<T>, Arc<EventLog>) {
    let events = EventLog::new();
    let client = XmlDaClient::new(ConfigFixtures::default_client(), transport, events.clone())
        .expect("test configuration must be valid");
    (client, events)
}

/// Subscribe with a revised interval, two polls, then cancel.
async fn run_lifecycle<T: XmlDaTransport + 'static>(
    client: &XmlDaClient<T>,
    script: &ScriptedTransport,
    events: &EventLog,
) {
    let id = client
        .subscribe(["A", "B"], Duration::from_millis(1000))
        .await
        .unwrap();
    assert_eq!(
        client.subscription_snapshot(id).unwrap().effective_interval,
        Duration::from_millis(2000)
    );

    sleep(Duration::from_millis(2500)).await;
    assert_eq!(events.changes().len(), 2);

    sleep(Duration::from_millis(2000)).await;
    let changes = events.changes();
    assert_eq!(changes.len(), 3);
    assert_eq!(changes[2].item, ItemIdentity::named("B"));
    assert_eq!(changes[2].value, Value::Int32(7));
    assert_eq!(
        script.send_times_ms(Operation::SubscriptionPolledRefresh),
        vec![2000, 4000]
    );

    client.cancel(id).await.unwrap();
    assert_eq!(client.subscription_state(id).unwrap(), SubscriptionState::Cancelled);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(script.count(Operation::SubscriptionPolledRefresh), 2);
    assert_eq!(script.count(Operation::SubscriptionCancel), 1);
    assert_eq!(
        events.states(id),
        vec![
            SubscriptionState::Pending,
            SubscriptionState::Active,
            SubscriptionState::Cancelling,
            SubscriptionState::Cancelled,
        ]
    );
    script.assert_no_overlapping_polls();
}

// =============================================================================
// Callback Transport
// =============================================================================

/// Answers every request from a spawned task.
struct SpawningInvoker {
    script: Arc<ScriptedTransport>,
}

impl CallbackInvoker for SpawningInvoker {
    fn invoke(&self, request: Request, timeout: Duration, reply: ReplySender) {
        let script = Arc::clone(&self.script);
        tokio::spawn(async move {
            let result = script.invoke(request, timeout).await;
            let _ = reply.send(result);
        });
    }

    fn endpoint(&self) -> &str {
        "mock://callback"
    }
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_over_callback_transport() {
    init_test_logging();
    let script = script();
    let (client, events) = client_over(CallbackTransport::new(SpawningInvoker {
        script: Arc::clone(&script),
    }));

    run_lifecycle(&client, &script, &events).await;
    client.shutdown().await;
}

// =============================================================================
// Codec Transport
// =============================================================================

/// Bodies are tickets into a shared table of records.
#[derive(Default)]
struct Exchange {
    next: AtomicU64,
    requests: Mutex<HashMap<u64, Request>>,
    responses: Mutex<HashMap<u64, Response>>,
}

fn ticket(bytes: &[u8]) -> Result<u64, DecodeError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| DecodeError::new("body is not a ticket"))?;
    Ok(u64::from_be_bytes(raw))
}

struct TicketCodec(Arc<Exchange>);

impl WireCodec for TicketCodec {
    fn encode(&self, request: &Request) -> Vec<u8> {
        let id = self.0.next.fetch_add(1, Ordering::SeqCst);
        self.0.requests.lock().insert(id, request.clone());
        id.to_be_bytes().to_vec()
    }

    fn decode(&self, _operation: Operation, bytes: &[u8]) -> Result<Response, DecodeError> {
        let id = ticket(bytes)?;
        self.0
            .responses
            .lock()
            .remove(&id)
            .ok_or_else(|| DecodeError::new(format!("no reply for ticket {id}")))
    }
}

struct ScriptedChannel {
    exchange: Arc<Exchange>,
    script: Arc<ScriptedTransport>,
}

#[async_trait]
impl RpcChannel for ScriptedChannel {
    async fn call(
        &self,
        operation: Operation,
        body: Vec<u8>,
        timeout: Duration,
    ) -> InvokeResult<Vec<u8>> {
        let id = ticket(&body).map_err(|e| InvokeError::decode(operation.as_str(), e.message))?;
        let request = self.exchange.requests.lock().remove(&id);
        let request =
            request.ok_or_else(|| InvokeError::connection(operation.as_str(), "unknown ticket"))?;

        let response = self.script.invoke(request, timeout).await?;
        self.exchange.responses.lock().insert(id, response);
        Ok(body)
    }

    fn endpoint(&self) -> &str {
        "mock://codec"
    }
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_over_codec_transport() {
    init_test_logging();
    let script = script();
    let exchange = Arc::new(Exchange::default());
    let (client, events) = client_over(CodecTransport::new(
        TicketCodec(Arc::clone(&exchange)),
        ScriptedChannel {
            exchange,
            script: Arc::clone(&script),
        },
    ));

    run_lifecycle(&client, &script, &events).await;
    client.shutdown().await;
}
