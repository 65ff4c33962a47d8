//! The CQL framed protocol.
//!
//! Every message starts with a fixed 9-byte header:
//!
//! ```text
//! [version: u8] [flags: u8] [stream: u16 BE] [opcode: u8] [body_len: u32 BE]
//! ```
//!
//! followed by `body_len` bytes of body. The core does not interpret
//! opcodes or bodies; request/response correlation is the peer's
//! business via the stream id, so no per-call table is kept for CQL
//! connections.

use bytes::Bytes;

use crate::error::ConnError;

/// Fixed header length.
pub const CQL_HEADER_LEN: usize = 9;

/// Bodies longer than this are a protocol error.
pub const CQL_MAX_BODY_LEN: usize = 256 << 20;

/// One parsed CQL frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CqlFrame {
    pub version: u8,
    pub flags: u8,
    pub stream_id: u16,
    pub opcode: u8,
    pub body: Bytes,
}

/// Decode the body length from a complete header, validating it
/// against the frame limit.
pub fn body_len(header: [u8; CQL_HEADER_LEN]) -> Result<usize, ConnError> {
    let len = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as usize;
    if len > CQL_MAX_BODY_LEN {
        return Err(ConnError::Protocol(format!(
            "cql body too long: {len} > {CQL_MAX_BODY_LEN}"
        )));
    }
    Ok(len)
}

/// Parse a complete frame, header included.
pub fn parse_frame(frame: Bytes) -> Result<CqlFrame, ConnError> {
    if frame.len() < CQL_HEADER_LEN {
        return Err(ConnError::Protocol(format!(
            "truncated cql frame: {} bytes",
            frame.len()
        )));
    }
    let mut header = [0u8; CQL_HEADER_LEN];
    header.copy_from_slice(&frame[..CQL_HEADER_LEN]);
    let len = body_len(header)?;
    if frame.len() != CQL_HEADER_LEN + len {
        return Err(ConnError::Protocol(format!(
            "cql frame length mismatch: header says {}, got {}",
            len,
            frame.len() - CQL_HEADER_LEN
        )));
    }
    Ok(CqlFrame {
        version: header[0],
        flags: header[1],
        stream_id: u16::from_be_bytes([header[2], header[3]]),
        opcode: header[4],
        body: frame.slice(CQL_HEADER_LEN..),
    })
}

/// Build a complete frame for transmission. Used by response paths
/// and tests; the core itself never originates CQL frames.
pub fn encode_frame(
    version: u8,
    flags: u8,
    stream_id: u16,
    opcode: u8,
    body: Bytes,
) -> Result<Vec<Bytes>, ConnError> {
    if body.len() > CQL_MAX_BODY_LEN {
        return Err(ConnError::Protocol(format!(
            "cql body too long to send: {} > {CQL_MAX_BODY_LEN}",
            body.len()
        )));
    }
    let mut header = Vec::with_capacity(CQL_HEADER_LEN);
    header.push(version);
    header.push(flags);
    header.extend_from_slice(&stream_id.to_be_bytes());
    header.push(opcode);
    header.extend_from_slice(&(body.len() as u32).to_be_bytes());
    Ok(vec![Bytes::from(header), body])
}
