//! Connection- and call-level error types.

use core::fmt;
use std::io;

/// Why a connection was (or is being) torn down.
///
/// Cloneable so one status can fan out to every queued transfer and
/// every call awaiting a response when the connection shuts down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnError {
    /// Socket-level failure other than an orderly close by the peer.
    Network {
        kind: io::ErrorKind,
        message: String,
    },
    /// The remote end closed the connection.
    PeerClosed,
    /// An inbound frame failed to parse or violated the wire protocol.
    Protocol(String),
    /// A server-direction connection saw the same call id twice.
    /// The peer is misbehaving.
    DuplicateCallId(i32),
    /// Connection negotiation finished with an error.
    Negotiation(String),
    /// The connection was asked to shut down.
    ShuttingDown,
}

impl ConnError {
    /// Wrap an I/O error. Only an orderly end-of-stream counts as the
    /// peer closing; resets, broken pipes and the rest are network
    /// errors and tear the connection down loudly.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Self::PeerClosed,
            kind => Self::Network {
                kind,
                message: err.to_string(),
            },
        }
    }

    /// True for the quiet teardown path: the peer went away and there
    /// is nothing actionable to log above debug level.
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, Self::PeerClosed)
    }
}

impl fmt::Display for ConnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network { kind, message } => write!(f, "network error ({kind}): {message}"),
            Self::PeerClosed => write!(f, "connection closed by remote end"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::DuplicateCallId(id) => write!(f, "received duplicate call id {id}"),
            Self::Negotiation(msg) => write!(f, "negotiation failed: {msg}"),
            Self::ShuttingDown => write!(f, "connection shutting down"),
        }
    }
}

impl std::error::Error for ConnError {}

impl From<io::Error> for ConnError {
    fn from(err: io::Error) -> Self {
        Self::from_io(err)
    }
}

/// What a caller sees when an outbound call does not produce a
/// response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The controller deadline expired before a response arrived.
    TimedOut,
    /// Too many calls already awaiting responses on this connection.
    CallsPending,
    /// The connection failed or shut down before the call completed.
    Conn(ConnError),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut => write!(f, "call timed out"),
            Self::CallsPending => write!(f, "too many calls awaiting responses"),
            Self::Conn(e) => write!(f, "call failed: {e}"),
        }
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Conn(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConnError> for CallError {
    fn from(err: ConnError) -> Self {
        Self::Conn(err)
    }
}
