//! Cross-thread entry into a connection's driver task.
//!
//! A connection is owned by exactly one driver task; nothing else
//! touches its state. Foreign threads (worker pools, the negotiation
//! thread, the SQL executor) submit [`ReactorTask`] values over an
//! MPSC queue instead. Every task either runs on the driver or is
//! aborted with the shutdown status: on the driver while it drains
//! its queue during teardown, or on the submitter's thread when the
//! driver is already gone.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::call::OutboundCall;
use crate::connection::Direction;
use crate::error::{CallError, ConnError};
use crate::introspection::ConnectionInfo;
use crate::transfer::OutboundTransfer;

/// Identity stamped on a connection by successful negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCredentials {
    user: String,
}

impl UserCredentials {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

impl core::fmt::Display for UserCredentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.user)
    }
}

/// A unit of work submitted from any thread, run on the driver.
#[derive(Debug)]
pub enum ReactorTask {
    /// Push a transfer onto the outbound queue.
    QueueTransfer(OutboundTransfer),
    /// Assign a call id, register the call for response matching, and
    /// queue its request (client direction).
    QueueOutboundCall(Arc<OutboundCall>),
    /// The off-driver handshake finished; open the connection or tear
    /// it down.
    NegotiationComplete(Result<UserCredentials, ConnError>),
    /// Tear the connection down with the given status.
    Shutdown(ConnError),
    /// Reply with an introspection record.
    Dump(oneshot::Sender<ConnectionInfo>),
}

impl ReactorTask {
    /// The not-run arm: the driver is shutting down or already gone.
    pub(crate) fn abort(self, status: &ConnError) {
        match self {
            Self::QueueTransfer(transfer) => transfer.into_callback().abort_detached(status),
            Self::QueueOutboundCall(call) => call.set_failed(CallError::Conn(status.clone())),
            Self::NegotiationComplete(_) => {
                debug!(%status, "negotiation completion discarded; connection is gone");
            }
            Self::Shutdown(_) => {}
            Self::Dump(_reply) => {
                // Dropping the sender resolves the dump with None.
            }
        }
    }
}

pub(crate) type TaskSender = mpsc::UnboundedSender<ReactorTask>;
pub(crate) type TaskReceiver = mpsc::UnboundedReceiver<ReactorTask>;

pub(crate) fn task_channel() -> (TaskSender, TaskReceiver) {
    mpsc::unbounded_channel()
}

/// Cheap-to-clone handle for poking a connection from any thread.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tasks: TaskSender,
    remote: SocketAddr,
    direction: Direction,
}

impl ConnectionHandle {
    pub(crate) fn new(tasks: TaskSender, remote: SocketAddr, direction: Direction) -> Self {
        Self {
            tasks,
            remote,
            direction,
        }
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Enqueue a call for transmission and response matching. The
    /// outcome arrives on the call's completion handle.
    pub fn queue_outbound_call(&self, call: Arc<OutboundCall>) {
        self.submit(ReactorTask::QueueOutboundCall(call));
    }

    /// Signal that the off-driver handshake finished.
    pub fn complete_negotiation(&self, outcome: Result<UserCredentials, ConnError>) {
        self.submit(ReactorTask::NegotiationComplete(outcome));
    }

    /// Ask the connection to tear down.
    pub fn shutdown(&self, status: ConnError) {
        self.submit(ReactorTask::Shutdown(status));
    }

    /// Dump the connection's live state. `None` if it is gone.
    pub async fn dump(&self) -> Option<ConnectionInfo> {
        let (tx, rx) = oneshot::channel();
        self.submit(ReactorTask::Dump(tx));
        rx.await.ok()
    }

    fn submit(&self, task: ReactorTask) {
        if let Err(mpsc::error::SendError(task)) = self.tasks.send(task) {
            task.abort(&ConnError::ShuttingDown);
        }
    }
}

/// The response path handed to inbound calls: lets whichever worker
/// thread finishes a call push its serialized response back onto the
/// owning connection.
#[derive(Debug, Clone)]
pub struct Responder {
    tasks: TaskSender,
    remote: SocketAddr,
}

impl Responder {
    pub(crate) fn new(tasks: TaskSender, remote: SocketAddr) -> Self {
        Self { tasks, remote }
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub(crate) fn submit_transfer(&self, transfer: OutboundTransfer) {
        if let Err(mpsc::error::SendError(task)) = self.tasks.send(ReactorTask::QueueTransfer(transfer)) {
            task.abort(&ConnError::ShuttingDown);
        }
    }
}
