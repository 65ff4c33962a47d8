//! The Redis text protocol, request side.
//!
//! Two request shapes arrive on the same socket:
//!
//! - inline commands: one `\r\n`-terminated line of
//!   whitespace-separated arguments (`PING\r\n`, `SET k v\r\n`);
//! - multi-bulk requests: `*<argc>\r\n` followed by `argc` bulk
//!   strings, each `$<len>\r\n<bytes>\r\n`.
//!
//! A single read may carry several pipelined requests back to back;
//! the parser reports how many bytes the first complete request
//! consumed so the remainder can seed the next inbound transfer.

use bytes::Bytes;

use crate::error::ConnError;

/// A request that has not completed within this many bytes is a
/// protocol error.
pub const REDIS_MAX_COMMAND_LEN: usize = 1 << 20;

/// Cap on a redis inbound transfer's whole buffer, pipelined excess
/// included. A client that outruns the server by more than this gets
/// disconnected instead of growing the buffer without bound.
pub const REDIS_MAX_BUFFER_LEN: usize = 8 << 20;

/// Outcome of scanning a buffer for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisParse {
    /// The buffer does not yet hold a full request.
    Incomplete,
    /// One full request: its arguments and how many bytes it took.
    /// An empty inline line parses as zero arguments and must simply
    /// be consumed, the way the real server skips blank lines.
    Complete { args: Vec<Bytes>, consumed: usize },
}

/// Scan `buf` for the first complete request starting at offset 0.
pub fn parse_request(buf: &[u8]) -> Result<RedisParse, ConnError> {
    match buf.first() {
        None => Ok(RedisParse::Incomplete),
        Some(b'*') => parse_multibulk(buf),
        Some(_) => parse_inline(buf),
    }
}

fn parse_inline(buf: &[u8]) -> Result<RedisParse, ConnError> {
    let Some(nl) = buf.iter().position(|&b| b == b'\n') else {
        return Ok(RedisParse::Incomplete);
    };
    let mut line = &buf[..nl];
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }
    let args = line
        .split(|&b| b == b' ' || b == b'\t')
        .filter(|part| !part.is_empty())
        .map(Bytes::copy_from_slice)
        .collect();
    Ok(RedisParse::Complete {
        args,
        consumed: nl + 1,
    })
}

fn parse_multibulk(buf: &[u8]) -> Result<RedisParse, ConnError> {
    let mut pos = 1; // past '*'
    let argc = match parse_integer_line(buf, &mut pos)? {
        Some(argc) => argc,
        None => return Ok(RedisParse::Incomplete),
    };
    if argc < 0 {
        return Err(ConnError::Protocol(format!(
            "negative multibulk argument count {argc}"
        )));
    }
    if argc > 1024 * 1024 {
        return Err(ConnError::Protocol(format!(
            "multibulk argument count {argc} too large"
        )));
    }

    let mut args = Vec::with_capacity(argc as usize);
    for _ in 0..argc {
        if pos >= buf.len() {
            return Ok(RedisParse::Incomplete);
        }
        if buf[pos] != b'$' {
            return Err(ConnError::Protocol(format!(
                "expected bulk string marker '$', got {:#04x}",
                buf[pos]
            )));
        }
        pos += 1;
        let len = match parse_integer_line(buf, &mut pos)? {
            Some(len) => len,
            None => return Ok(RedisParse::Incomplete),
        };
        if len < 0 || len as usize > REDIS_MAX_COMMAND_LEN {
            return Err(ConnError::Protocol(format!("bad bulk string length {len}")));
        }
        let len = len as usize;
        if buf.len() < pos + len + 2 {
            return Ok(RedisParse::Incomplete);
        }
        if &buf[pos + len..pos + len + 2] != b"\r\n" {
            return Err(ConnError::Protocol(
                "bulk string not terminated by CRLF".to_owned(),
            ));
        }
        args.push(Bytes::copy_from_slice(&buf[pos..pos + len]));
        pos += len + 2;
    }

    Ok(RedisParse::Complete {
        args,
        consumed: pos,
    })
}

/// Parse a decimal integer terminated by CRLF at `*pos`, advancing
/// `*pos` past the terminator. `Ok(None)` means the line is not
/// complete yet.
fn parse_integer_line(buf: &[u8], pos: &mut usize) -> Result<Option<i64>, ConnError> {
    let Some(rel) = buf[*pos..].iter().position(|&b| b == b'\n') else {
        return Ok(None);
    };
    let line_end = *pos + rel;
    if line_end == *pos || buf[line_end - 1] != b'\r' {
        return Err(ConnError::Protocol(
            "protocol line not terminated by CRLF".to_owned(),
        ));
    }
    let digits = &buf[*pos..line_end - 1];
    let text = std::str::from_utf8(digits)
        .map_err(|_| ConnError::Protocol("non-ASCII protocol integer".to_owned()))?;
    let value = text
        .parse::<i64>()
        .map_err(|_| ConnError::Protocol(format!("bad protocol integer {text:?}")))?;
    *pos = line_end + 1;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parse: RedisParse) -> (Vec<Bytes>, usize) {
        match parse {
            RedisParse::Complete { args, consumed } => (args, consumed),
            RedisParse::Incomplete => panic!("expected a complete request"),
        }
    }

    #[test]
    fn inline_command() {
        let (args, consumed) = args(parse_request(b"SET key value\r\n").unwrap());
        assert_eq!(args, vec!["SET", "key", "value"]);
        assert_eq!(consumed, 15);
    }

    #[test]
    fn inline_command_with_excess() {
        let buf = b"PING\r\nGET k\r\n";
        let (args, consumed) = args(parse_request(buf).unwrap());
        assert_eq!(args, vec!["PING"]);
        assert_eq!(&buf[consumed..], b"GET k\r\n");
    }

    #[test]
    fn blank_inline_line_consumes_without_args() {
        let (args, consumed) = args(parse_request(b"\r\nPING\r\n").unwrap());
        assert!(args.is_empty());
        assert_eq!(consumed, 2);
    }

    #[test]
    fn multibulk_command() {
        let buf = b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n";
        let (args, consumed) = args(parse_request(buf).unwrap());
        assert_eq!(args, vec!["GET", "k"]);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn multibulk_incomplete() {
        assert_eq!(
            parse_request(b"*2\r\n$3\r\nGET\r\n$1\r\n").unwrap(),
            RedisParse::Incomplete
        );
        assert_eq!(parse_request(b"*2\r").unwrap(), RedisParse::Incomplete);
    }

    #[test]
    fn multibulk_binary_safe() {
        let buf = b"*1\r\n$4\r\na\r\nb\r\n";
        let (args, _) = args(parse_request(buf).unwrap());
        assert_eq!(args, vec![Bytes::from_static(b"a\r\nb")]);
    }

    #[test]
    fn rejects_bad_bulk_marker() {
        assert!(parse_request(b"*1\r\n#3\r\nGET\r\n").is_err());
    }

    #[test]
    fn rejects_negative_argc() {
        assert!(parse_request(b"*-1\r\n").is_err());
    }

    #[test]
    fn rejects_unterminated_bulk() {
        assert!(parse_request(b"*1\r\n$3\r\nGETXX").is_err());
    }

    #[test]
    fn rejects_bare_lf_integer_line() {
        assert!(parse_request(b"*2\n$3\r\nGET\r\n$1\r\nk\r\n").is_err());
    }
}
