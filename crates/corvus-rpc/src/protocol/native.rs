//! The native framed protocol.
//!
//! Wire format:
//!
//! ```text
//! [len: u32 BE] [call_id: i32 BE] [flags: u8] [payload: len - 5 bytes]
//! ```
//!
//! `len` counts everything after itself. Bit 0 of `flags` marks a
//! response, bit 1 marks an error response. The method being invoked
//! travels inside the payload envelope and is opaque to this layer;
//! correlation between a request and its response is by `call_id`
//! alone.

use bytes::Bytes;

use crate::error::ConnError;

/// Length of the frame-length prefix.
pub const NATIVE_PREFIX_LEN: usize = 4;

/// Header bytes following the prefix: call id plus flags.
pub const NATIVE_HEADER_LEN: usize = 5;

/// Frames longer than this (excluding the prefix) are a protocol
/// error; the peer is either corrupt or hostile.
pub const NATIVE_MAX_FRAME_LEN: usize = 32 << 20;

const FLAG_RESPONSE: u8 = 0x01;
const FLAG_ERROR: u8 = 0x02;

/// One parsed native frame, request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeFrame {
    pub call_id: i32,
    pub is_response: bool,
    pub is_error: bool,
    pub payload: Bytes,
}

/// Decode the length prefix and validate it against the frame limit.
///
/// Returns the number of bytes that follow the prefix.
pub fn frame_len(prefix: [u8; NATIVE_PREFIX_LEN]) -> Result<usize, ConnError> {
    let len = u32::from_be_bytes(prefix) as usize;
    if len < NATIVE_HEADER_LEN {
        return Err(ConnError::Protocol(format!(
            "native frame too short: {len} < {NATIVE_HEADER_LEN}"
        )));
    }
    if len > NATIVE_MAX_FRAME_LEN {
        return Err(ConnError::Protocol(format!(
            "native frame too long: {len} > {NATIVE_MAX_FRAME_LEN}"
        )));
    }
    Ok(len)
}

/// Parse a complete frame, prefix included.
pub fn parse_frame(frame: Bytes) -> Result<NativeFrame, ConnError> {
    if frame.len() < NATIVE_PREFIX_LEN + NATIVE_HEADER_LEN {
        return Err(ConnError::Protocol(format!(
            "truncated native frame: {} bytes",
            frame.len()
        )));
    }
    let mut prefix = [0u8; NATIVE_PREFIX_LEN];
    prefix.copy_from_slice(&frame[..NATIVE_PREFIX_LEN]);
    let len = frame_len(prefix)?;
    if frame.len() != NATIVE_PREFIX_LEN + len {
        return Err(ConnError::Protocol(format!(
            "native frame length mismatch: prefix says {}, got {}",
            len,
            frame.len() - NATIVE_PREFIX_LEN
        )));
    }

    let mut id = [0u8; 4];
    id.copy_from_slice(&frame[NATIVE_PREFIX_LEN..NATIVE_PREFIX_LEN + 4]);
    let call_id = i32::from_be_bytes(id);
    let flags = frame[NATIVE_PREFIX_LEN + 4];

    Ok(NativeFrame {
        call_id,
        is_response: flags & FLAG_RESPONSE != 0,
        is_error: flags & FLAG_ERROR != 0,
        payload: frame.slice(NATIVE_PREFIX_LEN + NATIVE_HEADER_LEN..),
    })
}

fn encode_header(call_id: i32, flags: u8, payload_len: usize) -> Result<Bytes, ConnError> {
    let len = NATIVE_HEADER_LEN + payload_len;
    if len > NATIVE_MAX_FRAME_LEN {
        return Err(ConnError::Protocol(format!(
            "native frame too long to send: {len} > {NATIVE_MAX_FRAME_LEN}"
        )));
    }
    let mut header = Vec::with_capacity(NATIVE_PREFIX_LEN + NATIVE_HEADER_LEN);
    header.extend_from_slice(&(len as u32).to_be_bytes());
    header.extend_from_slice(&call_id.to_be_bytes());
    header.push(flags);
    Ok(Bytes::from(header))
}

/// Serialize a request into wire slices. The payload slice is shared,
/// not copied.
pub fn encode_request(call_id: i32, payload: Bytes) -> Result<Vec<Bytes>, ConnError> {
    let header = encode_header(call_id, 0, payload.len())?;
    Ok(vec![header, payload])
}

/// Serialize a response into wire slices.
pub fn encode_response(call_id: i32, is_error: bool, payload: Bytes) -> Result<Vec<Bytes>, ConnError> {
    let flags = FLAG_RESPONSE | if is_error { FLAG_ERROR } else { 0 };
    let header = encode_header(call_id, flags, payload.len())?;
    Ok(vec![header, payload])
}
