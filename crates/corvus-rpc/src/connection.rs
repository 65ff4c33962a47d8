//! The per-socket connection state machine.
//!
//! A `Connection` multiplexes many in-flight calls over one stream
//! socket. It is owned by exactly one driver task which runs the
//! event loop: socket readiness, reactor tasks submitted from other
//! threads, and per-call timeout timers all land here, so none of the
//! connection's state needs a lock.
//!
//! ```text
//!                       ┌──────────────────────────────────┐
//!                       │          Connection              │
//!                       ├──────────────────────────────────┤
//!                       │ inbound: Option<InboundTransfer> │
//!                       │ outbound: VecDeque<…>            │
//!                       │ awaiting_response: id → CAR      │
//!                       │ calls_being_handled: id → info   │
//!                       │ timeouts: BinaryHeap<TimerEntry> │
//!                       └───────────┬──────────────────────┘
//!                                   │
//!                             driver loop
//!                                   │
//!          ┌────────────────────────┼────────────────────────┐
//!          │                        │                        │
//!    socket readiness         reactor tasks            timer deadlines
//!          │                        │                        │
//!   read / write paths     queue transfer / call /    per-call timeouts
//!                          negotiation / shutdown
//! ```
//!
//! Lifecycle: `New → Negotiating → Open → ShuttingDown → Closed`.
//! The read watcher runs from registration; the write watcher waits
//! for negotiation to complete (client direction) or for the first
//! queued transfer after it (server direction). Shutdown is
//! idempotent and final: it fails every call awaiting a response,
//! aborts every queued transfer, then the driver drains and aborts
//! still-queued reactor tasks and returns, closing the socket.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::Interest;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::call::{CallResponse, OutboundCall};
use crate::error::{CallError, ConnError};
use crate::inbound::{
    CqlInboundCall, InboundCall, InboundDispatcher, NativeInboundCall, RedisInboundCall,
};
use crate::introspection::{CallInFlight, ConnState, ConnectionInfo};
use crate::metrics::RpcMetrics;
use crate::protocol::{cql, native, Protocol};
use crate::reactor::{
    task_channel, ConnectionHandle, ReactorTask, Responder, TaskReceiver, TaskSender,
    UserCredentials,
};
use crate::socket::StreamSocket;
use crate::transfer::{InboundTransfer, OutboundTransfer, TransferCallback};

/// Default cap on calls awaiting responses per connection, overridable
/// with `CORVUS_MAX_AWAITING_RESPONSE`.
const DEFAULT_MAX_AWAITING_RESPONSE: usize = 8192;

/// Sleep horizon used when no call timeout is armed.
const TIMER_BACKSTOP: Duration = Duration::from_secs(86400);

fn default_max_awaiting_response() -> usize {
    std::env::var("CORVUS_MAX_AWAITING_RESPONSE")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_MAX_AWAITING_RESPONSE)
}

/// Whether this end originates calls or receives them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Client,
    Server,
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Client => "client",
            Self::Server => "server",
        })
    }
}

/// Per-in-flight-call record on a client connection. The slot is
/// nullable: a fired timeout releases the call (and its payload)
/// while the entry stays behind to recognize a late response.
struct CallAwaitingResponse {
    call: Option<Arc<OutboundCall>>,
}

/// Server-side record of a native call being handled, kept for
/// duplicate-id detection and introspection.
struct HandledCall {
    received_at: Instant,
    payload_len: usize,
}

/// One armed call timeout. Min-heap by deadline via reversed `Ord`.
struct TimerEntry {
    deadline: Instant,
    call_id: i32,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline.eq(&other.deadline)
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.deadline.cmp(&self.deadline)
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// A single RPC connection and everything it owns.
pub struct Connection<S> {
    socket: S,
    remote: SocketAddr,
    direction: Direction,
    protocol: Protocol,
    dispatcher: Option<Arc<dyn InboundDispatcher>>,
    metrics: Arc<RpcMetrics>,

    task_tx: TaskSender,
    task_rx: TaskReceiver,

    inbound: Option<InboundTransfer>,
    outbound: VecDeque<OutboundTransfer>,
    awaiting_response: HashMap<i32, CallAwaitingResponse>,
    calls_being_handled: HashMap<i32, HandledCall>,
    timeouts: BinaryHeap<TimerEntry>,

    next_call_id: i32,
    max_awaiting_response: usize,
    negotiation_complete: bool,
    write_active: bool,
    is_registered: bool,
    shutdown_status: Option<ConnError>,
    credentials: Option<UserCredentials>,
    /// Redis only: a call is with the dispatcher and the next
    /// pipelined request must wait its turn.
    redis_processing_call: bool,
    last_activity: Instant,
}

impl<S: StreamSocket> Connection<S> {
    /// A client-direction connection. Clients speak the native
    /// protocol only.
    pub fn client(socket: S, remote: SocketAddr) -> Self {
        Self::new(socket, remote, Direction::Client, Protocol::Native, None)
    }

    /// A server-direction connection for an accepted socket.
    pub fn server(
        socket: S,
        remote: SocketAddr,
        protocol: Protocol,
        dispatcher: Arc<dyn InboundDispatcher>,
    ) -> Self {
        Self::new(
            socket,
            remote,
            Direction::Server,
            protocol,
            Some(dispatcher),
        )
    }

    fn new(
        socket: S,
        remote: SocketAddr,
        direction: Direction,
        protocol: Protocol,
        dispatcher: Option<Arc<dyn InboundDispatcher>>,
    ) -> Self {
        let (task_tx, task_rx) = task_channel();
        Self {
            socket,
            remote,
            direction,
            protocol,
            dispatcher,
            metrics: RpcMetrics::new(),
            task_tx,
            task_rx,
            inbound: None,
            outbound: VecDeque::new(),
            awaiting_response: HashMap::new(),
            calls_being_handled: HashMap::new(),
            timeouts: BinaryHeap::new(),
            next_call_id: 1,
            max_awaiting_response: default_max_awaiting_response(),
            negotiation_complete: false,
            write_active: false,
            is_registered: false,
            shutdown_status: None,
            credentials: None,
            redis_processing_call: false,
            last_activity: Instant::now(),
        }
    }

    /// Share a process-wide metrics sink instead of a private one.
    pub fn with_metrics(mut self, metrics: Arc<RpcMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Override the cap on calls awaiting responses.
    pub fn with_max_awaiting_response(mut self, max: usize) -> Self {
        self.max_awaiting_response = max;
        self
    }

    /// Split into the shared handle and the driver future. The driver
    /// must be spawned (or polled) by the caller and owns the
    /// connection until teardown.
    pub fn into_parts(self) -> (ConnectionHandle, impl std::future::Future<Output = ()> + Send) {
        let handle = ConnectionHandle::new(self.task_tx.clone(), self.remote, self.direction);
        (handle, self.run())
    }

    /// Convenience: spawn the driver on the current runtime.
    pub fn spawn(self) -> ConnectionHandle {
        let (handle, driver) = self.into_parts();
        tokio::spawn(driver);
        handle
    }

    async fn run(mut self) {
        self.is_registered = true;
        debug!(
            remote = %self.remote,
            direction = %self.direction,
            protocol = %self.protocol,
            "connection registered"
        );

        loop {
            if self.shutdown_status.is_some() {
                break;
            }

            let interest = if self.write_active {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            let timer_deadline = self.timeouts.peek().map(|t| t.deadline);
            let timer_wakeup = timer_deadline.unwrap_or_else(|| Instant::now() + TIMER_BACKSTOP);

            tokio::select! {
                task = self.task_rx.recv() => {
                    if let Some(task) = task {
                        self.run_task(task);
                    }
                }
                ready = self.socket.ready(interest) => match ready {
                    Ok(ready) => {
                        if ready.is_readable() || ready.is_read_closed() {
                            self.read_ready();
                        }
                        if self.shutdown_status.is_none()
                            && self.write_active
                            && (ready.is_writable() || ready.is_write_closed())
                        {
                            self.write_ready();
                        }
                    }
                    Err(err) => {
                        let status = ConnError::from_io(err);
                        warn!(remote = %self.remote, %status, "socket readiness error");
                        self.shutdown(status);
                    }
                },
                _ = tokio::time::sleep_until(timer_wakeup), if timer_deadline.is_some() => {
                    self.fire_timeouts();
                }
            }
        }

        self.drain_reactor_tasks();
        // The socket closes when the driver drops it.
    }

    fn run_task(&mut self, task: ReactorTask) {
        match task {
            ReactorTask::QueueTransfer(transfer) => self.queue_outbound(transfer),
            ReactorTask::QueueOutboundCall(call) => self.queue_outbound_call(call),
            ReactorTask::NegotiationComplete(outcome) => self.complete_negotiation(outcome),
            ReactorTask::Shutdown(status) => self.shutdown(status),
            ReactorTask::Dump(reply) => {
                let _ = reply.send(self.dump());
            }
        }
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    fn read_ready(&mut self) {
        self.last_activity = Instant::now();

        if self.inbound.is_none() {
            self.inbound = Some(self.new_inbound_transfer());
        }
        let Some(transfer) = self.inbound.as_mut() else {
            return;
        };

        match transfer.receive(&self.socket) {
            Ok(()) => {
                if transfer.finished() {
                    self.handle_finished_transfer();
                }
                // One finished transfer per readiness event. Looping
                // here for more measurably hurt throughput; revisit
                // only with benchmarks in hand.
            }
            Err(status) if status.is_peer_closed() => {
                debug!(remote = %self.remote, "connection shut down by remote end");
                self.shutdown(status);
            }
            Err(status) => {
                warn!(remote = %self.remote, %status, "recv error");
                self.shutdown(status);
            }
        }
    }

    fn new_inbound_transfer(&self) -> InboundTransfer {
        match self.protocol {
            Protocol::Native => InboundTransfer::native(),
            Protocol::Redis => InboundTransfer::redis(),
            Protocol::Cql => InboundTransfer::cql(),
        }
    }

    fn handle_finished_transfer(&mut self) {
        let Some(transfer) = self.inbound.take() else {
            return;
        };
        match (self.protocol, self.direction) {
            (Protocol::Native, Direction::Client) => self.handle_call_response(transfer),
            (Protocol::Native, Direction::Server) => self.handle_native_call(transfer),
            (Protocol::Redis, _) => self.handle_redis_transfer(transfer),
            (Protocol::Cql, _) => self.handle_cql_call(transfer),
        }
    }

    fn handle_call_response(&mut self, transfer: InboundTransfer) {
        let response = match CallResponse::parse(transfer.into_bytes()) {
            Ok(response) => response,
            Err(status) => {
                warn!(remote = %self.remote, %status, "received bad response data");
                self.shutdown(status);
                return;
            }
        };

        let Some(car) = self.awaiting_response.remove(&response.call_id) else {
            warn!(
                remote = %self.remote,
                call_id = response.call_id,
                "got a response for a call that was not pending; ignoring"
            );
            return;
        };
        let Some(call) = car.call else {
            // The call already timed out and the caller has moved on;
            // deliberately below warning level.
            debug!(
                call_id = response.call_id,
                "response arrived after the caller timed out"
            );
            return;
        };
        call.set_response(response);
    }

    fn handle_native_call(&mut self, transfer: InboundTransfer) {
        debug_assert_eq!(self.direction, Direction::Server);
        let frame = match native::parse_frame(transfer.into_bytes()) {
            Ok(frame) if !frame.is_response => frame,
            Ok(frame) => {
                let status = ConnError::Protocol(format!(
                    "response frame for call id {} on a server connection",
                    frame.call_id
                ));
                warn!(remote = %self.remote, %status, "received bad data");
                self.shutdown(status);
                return;
            }
            Err(status) => {
                warn!(remote = %self.remote, %status, "received bad data");
                self.shutdown(status);
                return;
            }
        };

        if self.calls_being_handled.contains_key(&frame.call_id) {
            warn!(
                remote = %self.remote,
                call_id = frame.call_id,
                "received a call id that is already being handled"
            );
            self.shutdown(ConnError::DuplicateCallId(frame.call_id));
            return;
        }
        self.calls_being_handled.insert(
            frame.call_id,
            HandledCall {
                received_at: Instant::now(),
                payload_len: frame.payload.len(),
            },
        );

        let call = NativeInboundCall::new(frame.call_id, frame.payload, self.responder());
        self.dispatch(InboundCall::Native(call));
    }

    fn handle_redis_transfer(&mut self, transfer: InboundTransfer) {
        debug_assert_eq!(self.direction, Direction::Server);
        if self.redis_processing_call {
            // Single-in-flight discipline: hold the finished request
            // until the dispatcher is done with the current one.
            self.inbound = Some(transfer);
            return;
        }

        let mut transfer = transfer;
        let excess = match transfer.take_excess() {
            Ok(excess) => excess,
            Err(status) => {
                warn!(remote = %self.remote, %status, "received bad data");
                self.shutdown(status);
                return;
            }
        };
        let args = transfer.into_redis_args();

        self.redis_processing_call = true;
        self.inbound = excess;
        let call = RedisInboundCall::new(args, self.responder());
        self.dispatch(InboundCall::Redis(call));
    }

    fn handle_cql_call(&mut self, transfer: InboundTransfer) {
        debug_assert_eq!(self.direction, Direction::Server);
        let frame = match cql::parse_frame(transfer.into_bytes()) {
            Ok(frame) => frame,
            Err(status) => {
                warn!(remote = %self.remote, %status, "received bad data");
                self.shutdown(status);
                return;
            }
        };
        let call = CqlInboundCall::new(frame, self.responder());
        self.dispatch(InboundCall::Cql(call));
    }

    fn dispatch(&self, call: InboundCall) {
        match &self.dispatcher {
            Some(dispatcher) => dispatcher.queue_inbound_call(call),
            None => {
                debug_assert!(false, "inbound call on a connection without a dispatcher");
            }
        }
    }

    fn responder(&self) -> Responder {
        Responder::new(self.task_tx.clone(), self.remote)
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    fn write_ready(&mut self) {
        if self.outbound.is_empty() {
            warn!(
                remote = %self.remote,
                "write readiness with nothing to write; stopping the write watcher"
            );
            self.write_active = false;
            return;
        }

        loop {
            let Some(transfer) = self.outbound.front_mut() else {
                break;
            };
            self.last_activity = Instant::now();
            match transfer.send(&self.socket) {
                Ok(()) => {
                    if !transfer.finished() {
                        // Partial write; wait for the next readiness.
                        return;
                    }
                }
                Err(status) => {
                    warn!(remote = %self.remote, %status, "send error");
                    self.shutdown(status);
                    return;
                }
            }
            if let Some(transfer) = self.outbound.pop_front() {
                self.metrics
                    .record_outbound_transfer(transfer.queued_at().elapsed());
                self.transfer_finished(transfer.into_callback());
                if self.shutdown_status.is_some() {
                    return;
                }
            }
        }

        self.write_active = false;
    }

    /// Driver-side queueing. Foreign threads submit a `QueueTransfer`
    /// task instead.
    fn queue_outbound(&mut self, transfer: OutboundTransfer) {
        if let Some(status) = self.shutdown_status.clone() {
            self.transfer_aborted(transfer.into_callback(), &status);
            return;
        }
        self.outbound.push_back(transfer);
        if self.negotiation_complete && !self.write_active {
            self.write_active = true;
        }
    }

    fn transfer_finished(&mut self, callback: TransferCallback) {
        match callback {
            TransferCallback::OutboundCall(call) => {
                // A call that finished before its bytes drained can
                // only have timed out; leave it be.
                if !call.is_finished() {
                    call.set_sent();
                }
            }
            TransferCallback::NativeResponse { call_id } => {
                self.calls_being_handled.remove(&call_id);
            }
            TransferCallback::ProtocolResponse => self.finished_handling_a_call(),
            TransferCallback::None => {}
        }
    }

    fn transfer_aborted(&mut self, callback: TransferCallback, status: &ConnError) {
        match callback {
            TransferCallback::OutboundCall(call) => {
                debug!(
                    method = call.method(),
                    %status,
                    "connection torn down before the call could be sent"
                );
            }
            TransferCallback::NativeResponse { call_id } => {
                warn!(
                    call_id,
                    %status,
                    "connection torn down before the response could be sent"
                );
                self.calls_being_handled.remove(&call_id);
            }
            TransferCallback::ProtocolResponse => {
                warn!(%status, "connection torn down before the response could be sent");
                self.finished_handling_a_call();
            }
            TransferCallback::None => {}
        }
    }

    /// A redis or CQL response finished (or was torn down); the next
    /// pipelined request, if already buffered, may now proceed.
    fn finished_handling_a_call(&mut self) {
        if self.protocol == Protocol::Redis {
            self.redis_processing_call = false;
        }
        if self.shutdown_status.is_some() {
            return;
        }
        if self.inbound.as_ref().is_some_and(|t| t.finished()) {
            self.handle_finished_transfer();
        }
    }

    // ------------------------------------------------------------------
    // Outbound call path (client direction)
    // ------------------------------------------------------------------

    fn queue_outbound_call(&mut self, call: Arc<OutboundCall>) {
        debug_assert_eq!(self.direction, Direction::Client);

        if let Some(status) = &self.shutdown_status {
            call.set_failed(CallError::Conn(status.clone()));
            return;
        }
        if self.awaiting_response.len() >= self.max_awaiting_response {
            warn!(
                remote = %self.remote,
                pending = self.awaiting_response.len(),
                "too many calls awaiting responses; refusing new call"
            );
            call.set_failed(CallError::CallsPending);
            return;
        }

        debug_assert!(!call.call_id_assigned());
        let call_id = self.next_call_id;
        self.next_call_id += 1;
        call.set_call_id(call_id);

        let mut slices = Vec::new();
        if let Err(status) = call.serialize_to(&mut slices) {
            call.set_failed(CallError::Conn(status));
            return;
        }
        call.set_queued();

        if let Some(timeout) = call.timeout() {
            self.timeouts.push(TimerEntry {
                deadline: Instant::now() + timeout,
                call_id,
            });
        }
        self.awaiting_response
            .insert(call_id, CallAwaitingResponse { call: Some(call.clone()) });

        self.queue_outbound(OutboundTransfer::new(
            slices,
            TransferCallback::OutboundCall(call),
        ));
    }

    fn fire_timeouts(&mut self) {
        let now = Instant::now();
        while let Some(entry) = self.timeouts.peek() {
            if entry.deadline > now {
                break;
            }
            let call_id = entry.call_id;
            self.timeouts.pop();
            self.handle_outbound_call_timeout(call_id);
        }
    }

    fn handle_outbound_call_timeout(&mut self, call_id: i32) {
        // The response may have arrived first, erasing the entry.
        let Some(car) = self.awaiting_response.get_mut(&call_id) else {
            return;
        };
        let Some(call) = car.call.take() else {
            return;
        };
        call.set_timed_out();
        // The entry stays in the map: a late response must find it and
        // be dropped without a spurious warning. It is reclaimed when
        // the response arrives or at shutdown.
    }

    // ------------------------------------------------------------------
    // Negotiation
    // ------------------------------------------------------------------

    fn complete_negotiation(&mut self, outcome: Result<UserCredentials, ConnError>) {
        if self.shutdown_status.is_some() {
            debug!(remote = %self.remote, "negotiation completed on a dead connection");
            return;
        }
        match outcome {
            Ok(credentials) => {
                debug!(remote = %self.remote, user = credentials.user(), "negotiation complete");
                self.credentials = Some(credentials);
                self.mark_negotiation_complete();
            }
            Err(status) => {
                warn!(remote = %self.remote, %status, "negotiation failed");
                self.shutdown(status);
            }
        }
    }

    fn mark_negotiation_complete(&mut self) {
        self.negotiation_complete = true;
        match self.direction {
            // The write watcher starts even with an empty queue; a
            // stale readiness event then stops it again in
            // `write_ready`.
            Direction::Client => self.write_active = true,
            Direction::Server => {
                if !self.outbound.is_empty() {
                    self.write_active = true;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    fn shutdown(&mut self, status: ConnError) {
        if self.shutdown_status.is_some() {
            return;
        }
        self.shutdown_status = Some(status.clone());
        self.metrics.record_connection_torn_down();
        debug!(remote = %self.remote, direction = %self.direction, %status, "connection shutting down");

        if let Some(transfer) = &self.inbound {
            if transfer.started() {
                warn!(
                    remote = %self.remote,
                    transfer_state = %transfer.state(),
                    idle_for = ?self.last_activity.elapsed(),
                    %status,
                    "shutting down with pending inbound data"
                );
            }
        }
        self.inbound = None;

        // Calls first, queued transfers second, watchers last.
        for (_, car) in self.awaiting_response.drain() {
            if let Some(call) = car.call {
                call.set_failed(CallError::Conn(status.clone()));
            }
        }
        self.timeouts.clear();

        while let Some(transfer) = self.outbound.pop_front() {
            self.transfer_aborted(transfer.into_callback(), &status);
        }

        self.write_active = false;
        self.is_registered = false;
    }

    /// After teardown: nothing already submitted may be dropped on the
    /// floor; every queued task gets its abort arm.
    fn drain_reactor_tasks(&mut self) {
        self.task_rx.close();
        let status = self
            .shutdown_status
            .clone()
            .unwrap_or(ConnError::ShuttingDown);
        while let Ok(task) = self.task_rx.try_recv() {
            task.abort(&status);
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Whether the reactor may reclaim this connection.
    fn idle(&self) -> bool {
        if self.shutdown_status.is_some() {
            return true;
        }
        !self.inbound.as_ref().is_some_and(|t| t.started())
            && self.outbound.is_empty()
            && self.awaiting_response.is_empty()
            && self.calls_being_handled.is_empty()
            && self.negotiation_complete
    }

    fn dump(&self) -> ConnectionInfo {
        let state = if self.negotiation_complete {
            ConnState::Open
        } else {
            ConnState::Negotiating
        };
        // Dumping credentials while negotiating is forbidden: the
        // connection is not exclusively reactor-owned yet.
        let credentials = if self.negotiation_complete {
            self.credentials.clone()
        } else {
            None
        };

        let mut calls_in_flight: Vec<CallInFlight> = match self.direction {
            Direction::Client => self
                .awaiting_response
                .iter()
                .filter_map(|(call_id, car)| {
                    let call = car.call.as_ref()?;
                    Some(CallInFlight {
                        call_id: *call_id,
                        method: Some(call.method().to_owned()),
                        state: Some(call.state()),
                        elapsed: call.created_at().elapsed(),
                        payload_len: None,
                    })
                })
                .collect(),
            Direction::Server => self
                .calls_being_handled
                .iter()
                .map(|(call_id, handled)| CallInFlight {
                    call_id: *call_id,
                    method: None,
                    state: None,
                    elapsed: handled.received_at.elapsed(),
                    payload_len: Some(handled.payload_len),
                })
                .collect(),
        };
        calls_in_flight.sort_by_key(|c| c.call_id);

        ConnectionInfo {
            remote: self.remote,
            direction: self.direction,
            state,
            idle: self.idle(),
            credentials,
            calls_in_flight,
        }
    }
}

impl<S> Drop for Connection<S> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(
                self.outbound.is_empty(),
                "connection dropped with queued outbound transfers"
            );
            debug_assert!(
                !self.is_registered,
                "connection dropped while still registered"
            );
        }
    }
}

// Note: connection-level tests live in corvus-testkit to avoid a
// circular dev-dependency on the in-memory socket there.
