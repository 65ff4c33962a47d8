//! Wire protocols multiplexed over one connection lifecycle.
//!
//! Three protocols share the transfer and queue discipline of the
//! connection core and diverge at exactly three points: how an inbound
//! frame is delimited, how a finished frame becomes a call, and which
//! callback fires when an outbound response finishes transmitting.
//! Each submodule owns the byte-level rules for one protocol; the
//! connection state machine owns everything else.

pub mod cql;
pub mod native;
pub mod redis;

pub use cql::{CqlFrame, CQL_HEADER_LEN, CQL_MAX_BODY_LEN};
pub use native::{NativeFrame, NATIVE_MAX_FRAME_LEN};
pub use redis::REDIS_MAX_COMMAND_LEN;

/// Which wire protocol a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// The length-prefixed native protocol. The only protocol spoken
    /// on client-direction connections.
    Native,
    /// The Redis text protocol (inline and multi-bulk requests),
    /// server direction only.
    Redis,
    /// The CQL framed protocol, server direction only.
    Cql,
}

impl Protocol {
    pub fn name(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Redis => "redis",
            Self::Cql => "cql",
        }
    }
}

impl core::fmt::Display for Protocol {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
