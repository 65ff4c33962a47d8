//! Server-side inbound calls and the dispatch seam.
//!
//! The connection core parses frames into calls and hands them to an
//! [`InboundDispatcher`]; it never interprets payloads or routes to
//! handlers. Whichever worker thread finishes a call responds through
//! the call's [`Responder`], which schedules the serialized response
//! back onto the owning connection's driver.

use bytes::Bytes;

use crate::error::ConnError;
use crate::protocol::{cql, native};
use crate::reactor::Responder;
use crate::transfer::{OutboundTransfer, TransferCallback};

/// Receives parsed inbound calls, out of scope beyond this seam.
/// Implementations take ownership and respond later, from any thread.
pub trait InboundDispatcher: Send + Sync + 'static {
    fn queue_inbound_call(&self, call: InboundCall);
}

/// One parsed inbound call, tagged by protocol.
#[derive(Debug)]
pub enum InboundCall {
    Native(NativeInboundCall),
    Redis(RedisInboundCall),
    Cql(CqlInboundCall),
}

/// A native-protocol call being handled.
#[derive(Debug)]
pub struct NativeInboundCall {
    call_id: i32,
    payload: Bytes,
    responder: Responder,
}

impl NativeInboundCall {
    pub(crate) fn new(call_id: i32, payload: Bytes, responder: Responder) -> Self {
        Self {
            call_id,
            payload,
            responder,
        }
    }

    pub fn call_id(&self) -> i32 {
        self.call_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn remote(&self) -> std::net::SocketAddr {
        self.responder.remote()
    }

    /// Send a success response. Consumes the call; its table entry is
    /// dropped once the response finishes transmitting.
    pub fn respond_ok(self, payload: Bytes) -> Result<(), ConnError> {
        self.respond(false, payload)
    }

    /// Send an error response carrying a serialized failure payload.
    pub fn respond_error(self, payload: Bytes) -> Result<(), ConnError> {
        self.respond(true, payload)
    }

    fn respond(self, is_error: bool, payload: Bytes) -> Result<(), ConnError> {
        let slices = native::encode_response(self.call_id, is_error, payload)?;
        self.responder.submit_transfer(OutboundTransfer::new(
            slices,
            TransferCallback::NativeResponse {
                call_id: self.call_id,
            },
        ));
        Ok(())
    }
}

/// A redis-protocol call: the parsed argument vector of one request.
#[derive(Debug)]
pub struct RedisInboundCall {
    args: Vec<Bytes>,
    responder: Responder,
}

impl RedisInboundCall {
    pub(crate) fn new(args: Vec<Bytes>, responder: Responder) -> Self {
        Self { args, responder }
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn remote(&self) -> std::net::SocketAddr {
        self.responder.remote()
    }

    /// Send an already-encoded RESP response. The handler owns the
    /// encoding; the core only guarantees in-order delivery and the
    /// single-in-flight discipline.
    pub fn respond(self, encoded: Bytes) {
        self.responder.submit_transfer(OutboundTransfer::new(
            vec![encoded],
            TransferCallback::ProtocolResponse,
        ));
    }
}

/// A CQL-protocol call: one parsed frame.
#[derive(Debug)]
pub struct CqlInboundCall {
    stream_id: u16,
    opcode: u8,
    body: Bytes,
    responder: Responder,
}

impl CqlInboundCall {
    pub(crate) fn new(frame: cql::CqlFrame, responder: Responder) -> Self {
        Self {
            stream_id: frame.stream_id,
            opcode: frame.opcode,
            body: frame.body,
            responder,
        }
    }

    pub fn stream_id(&self) -> u16 {
        self.stream_id
    }

    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn remote(&self) -> std::net::SocketAddr {
        self.responder.remote()
    }

    /// Send a response frame built by the handler (header included).
    /// Correlation with the request is the peer's business via the
    /// stream id the handler echoes back.
    pub fn respond(self, frame: Bytes) {
        self.responder.submit_transfer(OutboundTransfer::new(
            vec![frame],
            TransferCallback::ProtocolResponse,
        ));
    }
}
