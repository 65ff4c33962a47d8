//! Outbound calls and their responses.
//!
//! An [`OutboundCall`] is shared between the caller (who awaits the
//! outcome) and the connection's awaiting-response table (which needs
//! it until a response arrives or the deadline fires). The table's
//! slot is nullable: a fired timeout releases the call and its payload
//! while the table entry lives on to recognize a late response.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{CallError, ConnError};
use crate::protocol::native;

/// Call id value meaning "not yet assigned". Real ids start at 1.
const CALL_ID_UNASSIGNED: i32 = 0;

/// Per-call options supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RpcController {
    timeout: Option<Duration>,
}

impl RpcController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Where an outbound call is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Constructed, not yet accepted by a connection.
    Ready,
    /// Accepted; its transfer sits on the outbound queue.
    Queued,
    /// Every byte of the request reached the socket.
    Sent,
    /// The controller deadline fired first.
    TimedOut,
    /// The connection failed or refused the call.
    Failed,
    /// A matching response was delivered.
    GotResponse,
}

impl CallState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::TimedOut | Self::Failed | Self::GotResponse)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::TimedOut => "timed out",
            Self::Failed => "failed",
            Self::GotResponse => "got response",
        }
    }
}

/// A parsed response to an outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResponse {
    pub call_id: i32,
    pub is_error: bool,
    pub payload: Bytes,
}

impl CallResponse {
    /// Parse a finished inbound transfer (full frame, prefix included)
    /// into a response.
    pub fn parse(frame: Bytes) -> Result<Self, ConnError> {
        let frame = native::parse_frame(frame)?;
        if !frame.is_response {
            return Err(ConnError::Protocol(format!(
                "expected a response frame for call id {}, got a request",
                frame.call_id
            )));
        }
        Ok(Self {
            call_id: frame.call_id,
            is_error: frame.is_error,
            payload: frame.payload,
        })
    }
}

/// The caller's end of a call: resolves once with the outcome.
pub type CallCompletion = oneshot::Receiver<Result<CallResponse, CallError>>;

/// An in-flight client call on a native-protocol connection.
pub struct OutboundCall {
    /// Remote method name, for logs and introspection only; on the
    /// wire it travels inside the payload envelope.
    method: String,
    payload: Bytes,
    controller: RpcController,
    created_at: Instant,
    /// Assigned exactly once, by the owning connection.
    call_id: AtomicI32,
    state: Mutex<CallState>,
    completion: Mutex<Option<oneshot::Sender<Result<CallResponse, CallError>>>>,
}

impl OutboundCall {
    /// Create a call and the completion handle its caller awaits.
    pub fn new(
        method: impl Into<String>,
        payload: Bytes,
        controller: RpcController,
    ) -> (Arc<Self>, CallCompletion) {
        let (tx, rx) = oneshot::channel();
        let call = Arc::new(Self {
            method: method.into(),
            payload,
            controller,
            created_at: Instant::now(),
            call_id: AtomicI32::new(CALL_ID_UNASSIGNED),
            state: Mutex::new(CallState::Ready),
            completion: Mutex::new(Some(tx)),
        });
        (call, rx)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.controller.timeout()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn call_id(&self) -> i32 {
        self.call_id.load(Ordering::Acquire)
    }

    pub fn call_id_assigned(&self) -> bool {
        self.call_id() != CALL_ID_UNASSIGNED
    }

    /// Assign the connection-scoped call id. Must happen exactly once.
    pub(crate) fn set_call_id(&self, call_id: i32) {
        debug_assert!(!self.call_id_assigned(), "call id assigned twice");
        self.call_id.store(call_id, Ordering::Release);
    }

    /// Serialize the request into wire slices. Requires an assigned id.
    pub(crate) fn serialize_to(&self, slices: &mut Vec<Bytes>) -> Result<(), ConnError> {
        debug_assert!(self.call_id_assigned());
        slices.extend(native::encode_request(self.call_id(), self.payload.clone())?);
        Ok(())
    }

    pub fn state(&self) -> CallState {
        *self.state.lock()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    pub(crate) fn set_queued(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(*state, CallState::Ready);
        *state = CallState::Queued;
    }

    /// The request's last byte reached the socket. A call that already
    /// finished (timed out before the transfer drained) stays put.
    pub(crate) fn set_sent(&self) {
        let mut state = self.state.lock();
        if state.is_finished() {
            debug_assert_eq!(*state, CallState::TimedOut);
            return;
        }
        *state = CallState::Sent;
    }

    pub(crate) fn set_timed_out(&self) {
        self.finish(CallState::TimedOut, Err(CallError::TimedOut));
    }

    pub(crate) fn set_failed(&self, err: CallError) {
        self.finish(CallState::Failed, Err(err));
    }

    pub(crate) fn set_response(&self, response: CallResponse) {
        self.finish(CallState::GotResponse, Ok(response));
    }

    fn finish(&self, state: CallState, outcome: Result<CallResponse, CallError>) {
        {
            let mut current = self.state.lock();
            if current.is_finished() {
                return;
            }
            *current = state;
        }
        if let Some(tx) = self.completion.lock().take() {
            // The caller may have dropped its completion handle.
            let _ = tx.send(outcome);
        }
    }
}

impl core::fmt::Debug for OutboundCall {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OutboundCall")
            .field("method", &self.method)
            .field("call_id", &self.call_id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn response_completes_the_call() {
        let (call, completion) = OutboundCall::new("Ping", Bytes::from_static(b"x"), RpcController::new());
        call.set_call_id(1);
        call.set_queued();
        call.set_sent();
        assert_eq!(call.state(), CallState::Sent);

        call.set_response(CallResponse {
            call_id: 1,
            is_error: false,
            payload: Bytes::from_static(b"pong"),
        });
        assert!(call.is_finished());

        let outcome = completion.await.unwrap().unwrap();
        assert_eq!(outcome.payload, Bytes::from_static(b"pong"));
    }

    #[tokio::test]
    async fn timeout_wins_over_late_response() {
        let (call, completion) = OutboundCall::new("Get", Bytes::new(), RpcController::new());
        call.set_call_id(2);
        call.set_queued();
        call.set_timed_out();
        assert_eq!(call.state(), CallState::TimedOut);

        // A late transfer-finished notification must not resurrect it.
        call.set_sent();
        assert_eq!(call.state(), CallState::TimedOut);

        assert_eq!(completion.await.unwrap(), Err(CallError::TimedOut));
    }

    #[tokio::test]
    async fn failure_reaches_the_caller() {
        let (call, completion) = OutboundCall::new("Put", Bytes::new(), RpcController::new());
        call.set_failed(CallError::Conn(ConnError::ShuttingDown));
        assert_eq!(
            completion.await.unwrap(),
            Err(CallError::Conn(ConnError::ShuttingDown))
        );
    }

    #[test]
    fn serializes_with_assigned_id() {
        let (call, _completion) =
            OutboundCall::new("Scan", Bytes::from_static(b"abc"), RpcController::new());
        call.set_call_id(9);
        let mut slices = Vec::new();
        call.serialize_to(&mut slices).unwrap();

        let mut wire = Vec::new();
        for s in &slices {
            wire.extend_from_slice(s);
        }
        let frame = native::parse_frame(Bytes::from(wire)).unwrap();
        assert_eq!(frame.call_id, 9);
        assert_eq!(frame.payload, Bytes::from_static(b"abc"));
    }
}
