//! Introspection records for the running-RPCs dump.

use std::net::SocketAddr;
use std::time::Duration;

use crate::call::CallState;
use crate::connection::Direction;
use crate::reactor::UserCredentials;

/// Connection state as exposed to the dump. Only two states are
/// visible externally; everything before negotiation completes is
/// `Negotiating`, everything after is `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Negotiating,
    Open,
}

/// One in-flight call, client or server side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInFlight {
    pub call_id: i32,
    /// Remote method name; known on the client side only.
    pub method: Option<String>,
    /// Call state; known on the client side only.
    pub state: Option<CallState>,
    pub elapsed: Duration,
    /// Request payload length; recorded on the server side only.
    pub payload_len: Option<usize>,
}

/// Snapshot of one connection's live state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub remote: SocketAddr,
    pub direction: Direction,
    pub state: ConnState,
    /// Whether the reactor may reclaim this connection.
    pub idle: bool,
    /// Stamped by negotiation; never exposed while negotiating, since
    /// the connection is not exclusively reactor-owned until then.
    pub credentials: Option<UserCredentials>,
    pub calls_in_flight: Vec<CallInFlight>,
}
