//! Transfer buffers: one wire-level unit of work in each direction.
//!
//! An [`InboundTransfer`] accumulates the bytes of exactly one inbound
//! frame across however many readiness events it takes. An
//! [`OutboundTransfer`] drains one serialized call or response the
//! same way. Neither ever blocks; both stop at `WouldBlock` and resume
//! on the next event.

use std::collections::VecDeque;
use std::io::{self, IoSlice};
use std::sync::Arc;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::debug;

use crate::call::OutboundCall;
use crate::error::ConnError;
use crate::protocol::cql::{self, CQL_HEADER_LEN};
use crate::protocol::native::{self, NATIVE_PREFIX_LEN};
use crate::protocol::redis::{self, RedisParse, REDIS_MAX_BUFFER_LEN, REDIS_MAX_COMMAND_LEN};

/// Read granularity for protocols without a length prefix.
const REDIS_READ_CHUNK: usize = 4096;

/// Coarse progress of an inbound transfer, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Empty,
    HeaderPending,
    BodyPending,
    Finished,
}

impl core::fmt::Display for TransferState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::HeaderPending => "header pending",
            Self::BodyPending => "body pending",
            Self::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Protocol-specific framing progress.
#[derive(Debug)]
enum Framing {
    /// Length prefix, then exactly that many bytes.
    Native {
        /// Whole-frame length (prefix included) once the prefix is in.
        total_len: Option<usize>,
    },
    /// Fixed header carrying the body length.
    Cql { total_len: Option<usize> },
    /// Text protocol; a frame ends where the first complete request
    /// ends, and anything past it is pipelined excess.
    Redis {
        /// Offset past any blank inline lines already consumed.
        base: usize,
        /// The first complete request, once found.
        parsed: Option<ParsedCommand>,
    },
}

#[derive(Debug)]
struct ParsedCommand {
    args: Vec<Bytes>,
    /// Absolute buffer offset one past the request's last byte.
    end: usize,
}

/// Accumulates bytes for exactly one incoming frame.
#[derive(Debug)]
pub struct InboundTransfer {
    buf: Vec<u8>,
    framing: Framing,
}

enum ReadOutcome {
    Progress,
    WouldBlock,
}

impl InboundTransfer {
    pub fn native() -> Self {
        Self {
            buf: Vec::new(),
            framing: Framing::Native { total_len: None },
        }
    }

    pub fn cql() -> Self {
        Self {
            buf: Vec::new(),
            framing: Framing::Cql { total_len: None },
        }
    }

    pub fn redis() -> Self {
        Self {
            buf: Vec::new(),
            framing: Framing::Redis {
                base: 0,
                parsed: None,
            },
        }
    }

    /// Seed a redis transfer with excess bytes carried over from the
    /// previous one. The seed is scanned immediately, so the transfer
    /// may already be finished without touching the socket.
    pub(crate) fn redis_seeded(data: Vec<u8>) -> Result<Self, ConnError> {
        let mut transfer = Self::redis();
        transfer.buf = data;
        transfer.scan_redis()?;
        Ok(transfer)
    }

    /// True once any byte of the next frame has been read.
    pub fn started(&self) -> bool {
        !self.buf.is_empty()
    }

    pub fn finished(&self) -> bool {
        match &self.framing {
            Framing::Native { total_len } | Framing::Cql { total_len } => {
                total_len.is_some_and(|t| self.buf.len() >= t)
            }
            Framing::Redis { parsed, .. } => parsed.is_some(),
        }
    }

    pub fn state(&self) -> TransferState {
        if self.finished() {
            return TransferState::Finished;
        }
        match &self.framing {
            Framing::Native { total_len } | Framing::Cql { total_len } => {
                if total_len.is_none() {
                    if self.buf.is_empty() {
                        TransferState::Empty
                    } else {
                        TransferState::HeaderPending
                    }
                } else {
                    TransferState::BodyPending
                }
            }
            Framing::Redis { .. } => {
                if self.buf.is_empty() {
                    TransferState::Empty
                } else {
                    TransferState::BodyPending
                }
            }
        }
    }

    /// Pull bytes from the socket until the frame is complete or the
    /// socket has nothing more to give.
    ///
    /// For the length-delimited protocols this never reads past the
    /// frame boundary. For redis there is no boundary to respect
    /// before parsing, so the socket is drained and over-read bytes
    /// accumulate as excess (a finished redis transfer keeps
    /// accepting bytes while the adapter is busy with the previous
    /// call, bounded by [`REDIS_MAX_BUFFER_LEN`]).
    pub fn receive<S: crate::socket::StreamSocket>(&mut self, socket: &S) -> Result<(), ConnError> {
        loop {
            let want = self.bytes_wanted()?;
            if want == 0 {
                return Ok(());
            }
            match self.read_into(socket, want)? {
                ReadOutcome::WouldBlock => return Ok(()),
                ReadOutcome::Progress => self.advance_framing()?,
            }
        }
    }

    /// How many more bytes to request from the socket right now.
    /// Zero means stop (frame boundary reached).
    fn bytes_wanted(&self) -> Result<usize, ConnError> {
        match &self.framing {
            Framing::Native { total_len: None } => Ok(NATIVE_PREFIX_LEN - self.buf.len()),
            Framing::Cql { total_len: None } => Ok(CQL_HEADER_LEN - self.buf.len()),
            Framing::Native {
                total_len: Some(total),
            }
            | Framing::Cql {
                total_len: Some(total),
            } => Ok(total - self.buf.len()),
            Framing::Redis { .. } => {
                let room = REDIS_MAX_BUFFER_LEN.saturating_sub(self.buf.len());
                if room == 0 {
                    return Err(ConnError::Protocol(
                        "redis pipeline buffer exceeded".to_owned(),
                    ));
                }
                Ok(room.min(REDIS_READ_CHUNK))
            }
        }
    }

    fn read_into<S: crate::socket::StreamSocket>(
        &mut self,
        socket: &S,
        want: usize,
    ) -> Result<ReadOutcome, ConnError> {
        let old_len = self.buf.len();
        self.buf.resize(old_len + want, 0);
        let result = socket.try_read(&mut self.buf[old_len..]);
        match result {
            Ok(0) => {
                self.buf.truncate(old_len);
                Err(ConnError::PeerClosed)
            }
            Ok(n) => {
                self.buf.truncate(old_len + n);
                Ok(ReadOutcome::Progress)
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.buf.truncate(old_len);
                Ok(ReadOutcome::WouldBlock)
            }
            Err(e) => {
                self.buf.truncate(old_len);
                Err(ConnError::from_io(e))
            }
        }
    }

    fn advance_framing(&mut self) -> Result<(), ConnError> {
        match &mut self.framing {
            Framing::Native { total_len } => {
                if total_len.is_none() && self.buf.len() >= NATIVE_PREFIX_LEN {
                    let mut prefix = [0u8; NATIVE_PREFIX_LEN];
                    prefix.copy_from_slice(&self.buf[..NATIVE_PREFIX_LEN]);
                    *total_len = Some(NATIVE_PREFIX_LEN + native::frame_len(prefix)?);
                }
                Ok(())
            }
            Framing::Cql { total_len } => {
                if total_len.is_none() && self.buf.len() >= CQL_HEADER_LEN {
                    let mut header = [0u8; CQL_HEADER_LEN];
                    header.copy_from_slice(&self.buf[..CQL_HEADER_LEN]);
                    *total_len = Some(CQL_HEADER_LEN + cql::body_len(header)?);
                }
                Ok(())
            }
            Framing::Redis { .. } => self.scan_redis(),
        }
    }

    fn scan_redis(&mut self) -> Result<(), ConnError> {
        let Framing::Redis { base, parsed } = &mut self.framing else {
            return Ok(());
        };
        while parsed.is_none() {
            match redis::parse_request(&self.buf[*base..])? {
                RedisParse::Incomplete => break,
                RedisParse::Complete { args, consumed } if args.is_empty() => {
                    // Blank inline line; skip it like the real server.
                    *base += consumed;
                }
                RedisParse::Complete { args, consumed } => {
                    *parsed = Some(ParsedCommand {
                        args,
                        end: *base + consumed,
                    });
                }
            }
        }
        if parsed.is_none() && self.buf.len() - *base > REDIS_MAX_COMMAND_LEN {
            return Err(ConnError::Protocol(format!(
                "redis request exceeds {REDIS_MAX_COMMAND_LEN} bytes"
            )));
        }
        Ok(())
    }

    /// Split off the pipelined bytes past the first complete redis
    /// request, seeding the next transfer with them. Must only be
    /// called on a finished redis transfer.
    pub fn take_excess(&mut self) -> Result<Option<InboundTransfer>, ConnError> {
        let Framing::Redis {
            parsed: Some(parsed),
            ..
        } = &self.framing
        else {
            return Ok(None);
        };
        if parsed.end >= self.buf.len() {
            return Ok(None);
        }
        let excess = self.buf.split_off(parsed.end);
        Ok(Some(Self::redis_seeded(excess)?))
    }

    /// Consume a finished length-delimited transfer as one frame.
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buf)
    }

    /// Consume a finished redis transfer as its argument vector.
    pub fn into_redis_args(self) -> Vec<Bytes> {
        match self.framing {
            Framing::Redis {
                parsed: Some(parsed),
                ..
            } => parsed.args,
            _ => {
                debug_assert!(false, "into_redis_args on a non-finished redis transfer");
                Vec::new()
            }
        }
    }
}

/// What to do when an outbound transfer finishes or is torn down.
///
/// A tagged value instead of a callback object: the connection owns
/// the tables these variants touch, so the handlers live there.
#[derive(Debug)]
pub enum TransferCallback {
    /// A client call's request: flips Queued to Sent on completion.
    OutboundCall(Arc<OutboundCall>),
    /// A native server response: drops the call from the
    /// being-handled table once transmitted (or aborted).
    NativeResponse { call_id: i32 },
    /// A redis or CQL server response: tells the adapter one call
    /// finished so the next pipelined request may proceed.
    ProtocolResponse,
    /// Nothing to notify.
    None,
}

impl TransferCallback {
    /// Abort arm for use off the driver task (the connection and its
    /// tables are already gone).
    pub(crate) fn abort_detached(self, status: &ConnError) {
        match self {
            Self::OutboundCall(call) => {
                debug!(method = call.method(), %status, "connection gone before call could be sent");
            }
            Self::NativeResponse { call_id } => {
                debug!(call_id, %status, "connection gone before response could be sent");
            }
            Self::ProtocolResponse => {
                debug!(%status, "connection gone before response could be sent");
            }
            Self::None => {}
        }
    }
}

/// One serialized call or response being drained to the socket.
#[derive(Debug)]
pub struct OutboundTransfer {
    slices: VecDeque<Bytes>,
    callback: TransferCallback,
    queued_at: Instant,
}

impl OutboundTransfer {
    pub fn new(slices: Vec<Bytes>, callback: TransferCallback) -> Self {
        Self {
            slices: slices.into_iter().filter(|s| !s.is_empty()).collect(),
            callback,
            queued_at: Instant::now(),
        }
    }

    pub fn finished(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn queued_at(&self) -> Instant {
        self.queued_at
    }

    pub(crate) fn into_callback(self) -> TransferCallback {
        self.callback
    }

    /// Push bytes at the socket until done or it stops accepting.
    pub fn send<S: crate::socket::StreamSocket>(&mut self, socket: &S) -> Result<(), ConnError> {
        while !self.slices.is_empty() {
            let bufs: Vec<IoSlice<'_>> = self.slices.iter().map(|s| IoSlice::new(s)).collect();
            match socket.try_write_vectored(&bufs) {
                Ok(0) => return Ok(()),
                Ok(n) => self.consume(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(ConnError::from_io(e)),
            }
        }
        Ok(())
    }

    fn consume(&mut self, mut n: usize) {
        while n > 0 {
            let Some(front) = self.slices.front_mut() else {
                debug_assert!(false, "socket accepted more bytes than were offered");
                return;
            };
            if n >= front.len() {
                n -= front.len();
                self.slices.pop_front();
            } else {
                *front = front.slice(n..);
                n = 0;
            }
        }
    }
}
