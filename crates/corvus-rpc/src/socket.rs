//! The non-blocking stream socket seam.
//!
//! The connection core never performs blocking I/O. It waits for
//! readiness, then moves as many bytes as the socket will take with
//! `try_read` / `try_write_vectored`, and returns to the event loop on
//! `WouldBlock`. Abstracting the socket behind a trait keeps the core
//! testable: production uses [`tokio::net::TcpStream`], tests use the
//! in-memory socket from `corvus-testkit`.

use std::future::Future;
use std::io;

pub use tokio::io::{Interest, Ready};

/// A non-blocking, readiness-driven stream socket.
///
/// All methods take `&self`; the connection driver is the only caller
/// and serializes access.
pub trait StreamSocket: Send + Sync + 'static {
    /// Wait until the socket is ready for any of the requested
    /// interests. May return a readiness set that is a superset or a
    /// stale subset of reality; callers must treat `WouldBlock` from
    /// the try-methods as the ground truth.
    fn ready(&self, interest: Interest) -> impl Future<Output = io::Result<Ready>> + Send;

    /// Try to read into `buf`. `Ok(0)` means the peer closed the
    /// stream. `ErrorKind::WouldBlock` means no bytes are available.
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Try to write from a slice vector. `ErrorKind::WouldBlock` means
    /// the send buffer is full.
    fn try_write_vectored(&self, bufs: &[io::IoSlice<'_>]) -> io::Result<usize>;
}

impl StreamSocket for tokio::net::TcpStream {
    fn ready(&self, interest: Interest) -> impl Future<Output = io::Result<Ready>> + Send {
        tokio::net::TcpStream::ready(self, interest)
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        tokio::net::TcpStream::try_read(self, buf)
    }

    fn try_write_vectored(&self, bufs: &[io::IoSlice<'_>]) -> io::Result<usize> {
        tokio::net::TcpStream::try_write_vectored(self, bufs)
    }
}
