// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transport boundary.
//!
//! The engine talks to the server through one capability,
//! [`XmlDaTransport::invoke`]. Three ways to provide it:
//!
//! - implement [`XmlDaTransport`] directly (async transports, test stubs),
//! - implement [`CallbackInvoker`] and wrap it in [`CallbackTransport`]
//!   (transports that complete through a callback),
//! - combine a [`WireCodec`] with a byte-level [`RpcChannel`] in
//!   [`CodecTransport`].
//!
//! Whatever the calling convention, the engine only ever awaits the result,
//! so the subscription state machine behaves the same under all three.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;
use xmlda_core::{InvokeError, InvokeResult};

use super::messages::{
    BrowseResponse, CancelResponse, GetPropertiesResponse, GetStatusResponse, Operation,
    PolledRefreshResponse, ReadResponse, Request, Response, SubscribeResponse, WriteResponse,
};
use crate::error::{ProtocolViolation, XmlDaError, XmlDaResult};

// =============================================================================
// XmlDaTransport
// =============================================================================

/// The request/response capability the engine is built on.
///
/// Implementations return [`InvokeError::Transport`] for network failures
/// and [`InvokeError::ServerFault`] for SOAP faults. They should honour
/// `timeout`, but the engine enforces it anyway through
/// [`invoke_with_timeout`].
#[async_trait]
pub trait XmlDaTransport: Send + Sync {
    /// Performs one request.
    async fn invoke(&self, request: Request, timeout: Duration) -> InvokeResult<Response>;

    /// Returns the endpoint this transport talks to.
    fn endpoint(&self) -> &str;
}

#[async_trait]
impl<T: XmlDaTransport + ?Sized> XmlDaTransport for Arc<T> {
    async fn invoke(&self, request: Request, timeout: Duration) -> InvokeResult<Response> {
        (**self).invoke(request, timeout).await
    }

    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }
}

/// Invokes `request`, converting an expired `timeout` into a transport timeout.
pub async fn invoke_with_timeout<T>(
    transport: &T,
    request: Request,
    timeout: Duration,
) -> InvokeResult<Response>
where
    T: XmlDaTransport + ?Sized,
{
    let operation = request.operation();
    match tokio::time::timeout(timeout, transport.invoke(request, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(InvokeError::timeout(operation.as_str(), timeout)),
    }
}

/// Invokes `request` and unwraps the expected response type.
pub async fn call<T, R>(transport: &T, request: Request, timeout: Duration) -> XmlDaResult<R>
where
    T: XmlDaTransport + ?Sized,
    R: OperationResponse,
{
    let response = invoke_with_timeout(transport, request, timeout)
        .await
        .map_err(|e| XmlDaError::from_invoke(R::OPERATION.as_str(), e))?;
    Ok(R::expect(response)?)
}

// =============================================================================
// Response Matching
// =============================================================================

/// A response record of one specific operation.
pub trait OperationResponse: Sized + Send {
    /// Operation this record answers.
    const OPERATION: Operation;

    /// Extracts the record, or returns `None` for any other variant.
    fn extract(response: Response) -> Option<Self>;

    /// Extracts the record or reports the mismatch.
    fn expect(response: Response) -> Result<Self, ProtocolViolation> {
        let actual = response.operation();
        Self::extract(response).ok_or_else(|| ProtocolViolation::UnexpectedResponse {
            expected: Self::OPERATION.to_string(),
            actual: actual.to_string(),
        })
    }
}

macro_rules! operation_response {
    ($ty:ty, $variant:ident, $operation:ident) => {
        impl OperationResponse for $ty {
            const OPERATION: Operation = Operation::$operation;

            fn extract(response: Response) -> Option<Self> {
                match response {
                    Response::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

operation_response!(ReadResponse, Read, Read);
operation_response!(WriteResponse, Write, Write);
operation_response!(SubscribeResponse, Subscribe, Subscribe);
operation_response!(PolledRefreshResponse, PolledRefresh, SubscriptionPolledRefresh);
operation_response!(CancelResponse, Cancel, SubscriptionCancel);
operation_response!(GetStatusResponse, GetStatus, GetStatus);
operation_response!(GetPropertiesResponse, GetProperties, GetProperties);
operation_response!(BrowseResponse, Browse, Browse);

// =============================================================================
// Callback Transports
// =============================================================================

/// One-shot slot a callback transport completes.
pub type ReplySender = oneshot::Sender<InvokeResult<Response>>;

/// A transport that reports completion through a callback.
///
/// The invoker must eventually send exactly one result on `reply`. Dropping
/// the sender without sending is reported as a connection failure.
pub trait CallbackInvoker: Send + Sync {
    /// Starts a request.
    fn invoke(&self, request: Request, timeout: Duration, reply: ReplySender);

    /// Returns the endpoint.
    fn endpoint(&self) -> &str;
}

/// Adapts a [`CallbackInvoker`] to [`XmlDaTransport`].
#[derive(Debug, Clone)]
pub struct CallbackTransport<C> {
    invoker: C,
}

impl<C: CallbackInvoker> CallbackTransport<C> {
    /// Wraps an invoker.
    pub fn new(invoker: C) -> Self {
        Self { invoker }
    }

    /// Returns the wrapped invoker.
    pub fn invoker(&self) -> &C {
        &self.invoker
    }
}

#[async_trait]
impl<C: CallbackInvoker> XmlDaTransport for CallbackTransport<C> {
    async fn invoke(&self, request: Request, timeout: Duration) -> InvokeResult<Response> {
        let operation = request.operation();
        let (tx, rx) = oneshot::channel();
        self.invoker.invoke(request, timeout, tx);

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(InvokeError::connection(
                operation.as_str(),
                "reply callback dropped without a result",
            )),
        }
    }

    fn endpoint(&self) -> &str {
        self.invoker.endpoint()
    }
}

// =============================================================================
// Codec Transports
// =============================================================================

/// A reply body the codec could not turn into a response record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DecodeError {
    /// Decoder message.
    pub message: String,
}

impl DecodeError {
    /// Creates a decode error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Converts request records to wire bytes and reply bytes to records.
pub trait WireCodec: Send + Sync {
    /// Encodes a request.
    fn encode(&self, request: &Request) -> Vec<u8>;

    /// Decodes the reply to `operation`.
    fn decode(&self, operation: Operation, bytes: &[u8]) -> Result<Response, DecodeError>;
}

/// Byte-level RPC channel, e.g. an HTTP POST of a SOAP envelope.
///
/// The channel reports network failures and SOAP faults itself; only
/// successful bodies reach the codec.
#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Sends `body` for `operation` and returns the reply body.
    async fn call(&self, operation: Operation, body: Vec<u8>, timeout: Duration)
        -> InvokeResult<Vec<u8>>;

    /// Returns the endpoint.
    fn endpoint(&self) -> &str;
}

/// A transport composed of a codec and a byte channel.
#[derive(Debug, Clone)]
pub struct CodecTransport<C, R> {
    codec: C,
    channel: R,
}

impl<C: WireCodec, R: RpcChannel> CodecTransport<C, R> {
    /// Creates a codec transport.
    pub fn new(codec: C, channel: R) -> Self {
        Self { codec, channel }
    }
}

#[async_trait]
impl<C: WireCodec, R: RpcChannel> XmlDaTransport for CodecTransport<C, R> {
    async fn invoke(&self, request: Request, timeout: Duration) -> InvokeResult<Response> {
        let operation = request.operation();
        let body = self.codec.encode(&request);
        let reply = self.channel.call(operation, body, timeout).await?;

        self.codec
            .decode(operation, &reply)
            .map_err(|e| InvokeError::decode(operation.as_str(), e.message))
    }

    fn endpoint(&self) -> &str {
        self.channel.endpoint()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::messages::{CancelRequest, GetStatusRequest, ReplyBase};
    use crate::types::ServerSubHandle;
    use chrono::Utc;
    use xmlda_core::TransportError;

    struct SlowTransport;

    #[async_trait]
    impl XmlDaTransport for SlowTransport {
        async fn invoke(&self, _request: Request, _timeout: Duration) -> InvokeResult<Response> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Response::Cancel(CancelResponse::default()))
        }

        fn endpoint(&self) -> &str {
            "mock://slow"
        }
    }

    struct CancelOnly;

    #[async_trait]
    impl XmlDaTransport for CancelOnly {
        async fn invoke(&self, _request: Request, _timeout: Duration) -> InvokeResult<Response> {
            Ok(Response::Cancel(CancelResponse::default()))
        }

        fn endpoint(&self) -> &str {
            "mock://cancel"
        }
    }

    fn status_request() -> Request {
        Request::GetStatus(GetStatusRequest::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_with_timeout_expires() {
        let result = invoke_with_timeout(&SlowTransport, status_request(), Duration::from_secs(2)).await;
        assert_eq!(
            result,
            Err(InvokeError::Transport(TransportError::timeout(
                "GetStatus",
                Duration::from_secs(2)
            )))
        );
    }

    #[tokio::test]
    async fn test_call_rejects_mismatched_response() {
        let result: XmlDaResult<GetStatusResponse> =
            call(&CancelOnly, status_request(), Duration::from_secs(1)).await;

        match result {
            Err(XmlDaError::Protocol(ProtocolViolation::UnexpectedResponse { expected, actual })) => {
                assert_eq!(expected, "GetStatus");
                assert_eq!(actual, "SubscriptionCancel");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    struct ImmediateInvoker;

    impl CallbackInvoker for ImmediateInvoker {
        fn invoke(&self, _request: Request, _timeout: Duration, reply: ReplySender) {
            let _ = reply.send(Ok(Response::GetStatus(GetStatusResponse {
                reply: ReplyBase::at(Utc::now()),
                status: None,
            })));
        }

        fn endpoint(&self) -> &str {
            "callback://immediate"
        }
    }

    struct ForgetfulInvoker;

    impl CallbackInvoker for ForgetfulInvoker {
        fn invoke(&self, _request: Request, _timeout: Duration, reply: ReplySender) {
            drop(reply);
        }

        fn endpoint(&self) -> &str {
            "callback://forgetful"
        }
    }

    #[tokio::test]
    async fn test_callback_transport_delivers_reply() {
        let transport = CallbackTransport::new(ImmediateInvoker);
        let status: GetStatusResponse = call(&transport, status_request(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(status.reply.server_state.is_running());
        assert_eq!(transport.endpoint(), "callback://immediate");
    }

    #[tokio::test]
    async fn test_callback_transport_dropped_sender() {
        let transport = CallbackTransport::new(ForgetfulInvoker);
        let result = transport.invoke(status_request(), Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(InvokeError::Transport(TransportError::Connection { .. }))
        ));
    }

    struct BrokenCodec;

    impl WireCodec for BrokenCodec {
        fn encode(&self, request: &Request) -> Vec<u8> {
            request.operation().as_str().as_bytes().to_vec()
        }

        fn decode(&self, _operation: Operation, bytes: &[u8]) -> Result<Response, DecodeError> {
            if bytes == b"ok" {
                Ok(Response::Cancel(CancelResponse::default()))
            } else {
                Err(DecodeError::new("unexpected element 'Fault'"))
            }
        }
    }

    struct EchoChannel;

    #[async_trait]
    impl RpcChannel for EchoChannel {
        async fn call(
            &self,
            _operation: Operation,
            body: Vec<u8>,
            _timeout: Duration,
        ) -> InvokeResult<Vec<u8>> {
            if body == b"SubscriptionCancel" {
                Ok(b"ok".to_vec())
            } else {
                Ok(body)
            }
        }

        fn endpoint(&self) -> &str {
            "http://echo"
        }
    }

    #[tokio::test]
    async fn test_codec_transport_maps_decode_error() {
        let transport = CodecTransport::new(BrokenCodec, EchoChannel);

        let cancel = Request::Cancel(CancelRequest {
            server_sub_handle: ServerSubHandle::from("S1"),
            client_request_handle: None,
        });
        assert!(transport.invoke(cancel, Duration::from_secs(1)).await.is_ok());

        let result: XmlDaResult<GetStatusResponse> =
            call(&transport, status_request(), Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(XmlDaError::Protocol(ProtocolViolation::Decode { .. }))
        ));
    }
}
