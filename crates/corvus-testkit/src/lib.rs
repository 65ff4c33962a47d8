//! corvus-testkit: shared test harness for the corvus RPC core.
//!
//! Provides an in-memory [`MemSocket`] implementing the core's
//! readiness-driven socket seam, dispatcher fakes, and a small driver
//! harness. Connection-level tests live in this crate's `tests/`
//! directory so `corvus-rpc` needs no dev-dependency back on the
//! testkit.
//!
//! ```ignore
//! let (socket, peer) = MemSocket::pair();
//! let conn = Connection::client(socket, test_addr());
//! let test_conn = TestConnection::start(conn);
//! test_conn.handle.complete_negotiation(Ok(UserCredentials::new("tester")));
//! // drive `peer` to script the remote end...
//! test_conn.stop().await;
//! ```

use std::collections::VecDeque;
use std::io::{self, IoSlice};
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{Interest, Ready};
use tokio::sync::{mpsc, Notify};

use corvus_rpc::{
    ConnError, Connection, ConnectionHandle, InboundCall, InboundDispatcher, StreamSocket,
};

/// A fixed peer address for tests.
pub fn test_addr() -> SocketAddr {
    "10.0.0.1:7100".parse().unwrap()
}

/// Default per-direction buffer capacity. Tests that want partial
/// writes shrink it with [`MemSocket::set_send_capacity`].
const DEFAULT_CAPACITY: usize = 64 * 1024;

struct HalfInner {
    buf: VecDeque<u8>,
    capacity: usize,
    /// Writer side closed; readers see EOF once the buffer drains.
    closed: bool,
    read_error: Option<io::ErrorKind>,
    write_error: Option<io::ErrorKind>,
}

/// One direction of the pair: a byte queue plus wakeups for whoever
/// is waiting to read from it or write into it.
struct HalfState {
    inner: Mutex<HalfInner>,
    readable: Notify,
    writable: Notify,
}

impl HalfState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HalfInner {
                buf: VecDeque::new(),
                capacity: DEFAULT_CAPACITY,
                closed: false,
                read_error: None,
                write_error: None,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
        })
    }

    fn close(&self) {
        self.inner.lock().closed = true;
        self.readable.notify_one();
        self.writable.notify_one();
    }
}

/// An in-memory, readiness-driven stream socket.
///
/// Implements the same contract as a non-blocking TCP stream: `ready`
/// waits, `try_read` / `try_write_vectored` move bytes or return
/// `WouldBlock`, writes see `BrokenPipe` after the reader is gone, and
/// dropping a socket delivers EOF to its peer.
pub struct MemSocket {
    /// Bytes flowing to this socket (the peer writes here).
    rx: Arc<HalfState>,
    /// Bytes flowing from this socket.
    tx: Arc<HalfState>,
}

impl MemSocket {
    /// A connected pair. Bytes written to one side are read by the
    /// other.
    pub fn pair() -> (MemSocket, MemSocket) {
        let a_to_b = HalfState::new();
        let b_to_a = HalfState::new();
        (
            MemSocket {
                rx: b_to_a.clone(),
                tx: a_to_b.clone(),
            },
            MemSocket {
                rx: a_to_b,
                tx: b_to_a,
            },
        )
    }

    /// Keep a fault-injection handle before moving the socket into a
    /// connection.
    pub fn fault_handle(&self) -> FaultHandle {
        FaultHandle {
            rx: self.rx.clone(),
            tx: self.tx.clone(),
        }
    }

    /// Shrink this side's send buffer to force partial writes.
    pub fn set_send_capacity(&self, capacity: usize) {
        self.tx.inner.lock().capacity = capacity;
        self.tx.writable.notify_one();
    }

    /// Half-close: the peer sees EOF once it drains what was written.
    pub fn close(&self) {
        self.tx.close();
    }

    /// Write the whole buffer, waiting for capacity as needed.
    pub async fn write_all(&self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            StreamSocket::ready(self, Interest::WRITABLE).await?;
            match self.try_write_vectored(&[IoSlice::new(data)]) {
                Ok(n) => data = &data[n..],
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Read exactly `n` bytes, waiting as needed.
    pub async fn read_exact(&self, n: usize) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            StreamSocket::ready(self, Interest::READABLE).await?;
            let mut chunk = vec![0u8; n - out.len()];
            match self.try_read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("eof after {} of {} bytes", out.len(), n),
                    ))
                }
                Ok(read) => out.extend_from_slice(&chunk[..read]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Wait until the peer closes, asserting no further bytes arrive.
    pub async fn expect_eof(&self) -> io::Result<()> {
        loop {
            StreamSocket::ready(self, Interest::READABLE).await?;
            let mut probe = [0u8; 64];
            match self.try_read(&mut probe) {
                Ok(0) => return Ok(()),
                Ok(n) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("expected eof, read {n} bytes"),
                    ))
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Everything buffered right now, without waiting.
    pub fn drain(&self) -> Vec<u8> {
        let mut g = self.rx.inner.lock();
        let out: Vec<u8> = g.buf.drain(..).collect();
        drop(g);
        self.rx.writable.notify_one();
        out
    }
}

impl StreamSocket for MemSocket {
    async fn ready(&self, interest: Interest) -> io::Result<Ready> {
        loop {
            let readable_wait = self.rx.readable.notified();
            let writable_wait = self.tx.writable.notified();

            let mut ready = Ready::EMPTY;
            if interest.is_readable() {
                let g = self.rx.inner.lock();
                if !g.buf.is_empty() || g.closed || g.read_error.is_some() {
                    ready |= Ready::READABLE;
                }
            }
            if interest.is_writable() {
                let g = self.tx.inner.lock();
                if g.buf.len() < g.capacity || g.closed || g.write_error.is_some() {
                    ready |= Ready::WRITABLE;
                }
            }
            if !ready.is_empty() {
                return Ok(ready);
            }

            if interest.is_readable() && interest.is_writable() {
                tokio::select! {
                    _ = readable_wait => {}
                    _ = writable_wait => {}
                }
            } else if interest.is_readable() {
                readable_wait.await;
            } else {
                writable_wait.await;
            }
        }
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut g = self.rx.inner.lock();
        if let Some(kind) = g.read_error.take() {
            return Err(kind.into());
        }
        if g.buf.is_empty() {
            return if g.closed {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(g.buf.len());
        for (slot, byte) in buf.iter_mut().zip(g.buf.drain(..n)) {
            *slot = byte;
        }
        drop(g);
        self.rx.writable.notify_one();
        Ok(n)
    }

    fn try_write_vectored(&self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let total: usize = bufs.iter().map(|b| b.len()).sum();
        if total == 0 {
            return Ok(0);
        }
        let mut g = self.tx.inner.lock();
        if let Some(kind) = g.write_error.take() {
            return Err(kind.into());
        }
        if g.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let space = g.capacity.saturating_sub(g.buf.len());
        if space == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let mut written = 0;
        for buf in bufs {
            let take = (space - written).min(buf.len());
            g.buf.extend(&buf[..take]);
            written += take;
            if written == space {
                break;
            }
        }
        drop(g);
        self.tx.readable.notify_one();
        Ok(written)
    }
}

impl Drop for MemSocket {
    fn drop(&mut self) {
        // EOF for the peer's reads, BrokenPipe for its writes.
        self.tx.close();
        self.rx.close();
    }
}

/// Injects socket failures after the socket has moved into a
/// connection.
#[derive(Clone)]
pub struct FaultHandle {
    rx: Arc<HalfState>,
    tx: Arc<HalfState>,
}

impl FaultHandle {
    /// The socket's next `try_read` fails with `kind`.
    pub fn fail_next_read(&self, kind: io::ErrorKind) {
        self.rx.inner.lock().read_error = Some(kind);
        self.rx.readable.notify_one();
    }

    /// The socket's next `try_write_vectored` fails with `kind`.
    pub fn fail_next_write(&self, kind: io::ErrorKind) {
        self.tx.inner.lock().write_error = Some(kind);
        self.tx.writable.notify_one();
    }
}

/// Dispatcher that forwards every inbound call to a channel for the
/// test to consume at its own pace.
pub struct RecordingDispatcher {
    tx: mpsc::UnboundedSender<InboundCall>,
}

impl RecordingDispatcher {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<InboundCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl InboundDispatcher for RecordingDispatcher {
    fn queue_inbound_call(&self, call: InboundCall) {
        // The test may have dropped its receiver; nothing to do then.
        let _ = self.tx.send(call);
    }
}

/// A spawned connection driver plus its handle, with orderly teardown
/// so the connection's drop assertions always run on a quiesced
/// driver.
pub struct TestConnection {
    pub handle: ConnectionHandle,
    driver: tokio::task::JoinHandle<()>,
}

impl TestConnection {
    pub fn start<S: StreamSocket>(conn: Connection<S>) -> Self {
        let (handle, driver) = conn.into_parts();
        Self {
            handle,
            driver: tokio::spawn(driver),
        }
    }

    /// Ask the connection to shut down and wait for the driver to
    /// finish.
    pub async fn stop(self) {
        self.handle.shutdown(ConnError::ShuttingDown);
        let _ = self.driver.await;
    }

    /// Wait for a driver that is expected to exit on its own (socket
    /// error, protocol error, peer close).
    pub async fn join(self) {
        let _ = self.driver.await;
    }
}

/// Install a test subscriber honoring `RUST_LOG`; safe to call from
/// every test, first caller wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bytes_flow_both_ways() {
        let (a, b) = MemSocket::pair();
        a.write_all(b"ping").await.unwrap();
        assert_eq!(b.read_exact(4).await.unwrap(), b"ping");

        b.write_all(b"pong").await.unwrap();
        assert_eq!(a.read_exact(4).await.unwrap(), b"pong");
    }

    #[tokio::test]
    async fn close_delivers_eof_after_drain() {
        let (a, b) = MemSocket::pair();
        a.write_all(b"last").await.unwrap();
        a.close();

        assert_eq!(b.read_exact(4).await.unwrap(), b"last");
        b.expect_eof().await.unwrap();
    }

    #[tokio::test]
    async fn drop_breaks_the_peer_pipe() {
        let (a, b) = MemSocket::pair();
        drop(b);

        a.expect_eof().await.unwrap();
        let err = a
            .try_write_vectored(&[IoSlice::new(b"x")])
            .expect_err("write after peer drop");
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn capacity_limits_a_single_write() {
        let (a, b) = MemSocket::pair();
        a.set_send_capacity(3);

        let n = a
            .try_write_vectored(&[IoSlice::new(b"abc"), IoSlice::new(b"def")])
            .unwrap();
        assert_eq!(n, 3);
        assert!(matches!(
            a.try_write_vectored(&[IoSlice::new(b"def")]),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock
        ));

        assert_eq!(b.read_exact(3).await.unwrap(), b"abc");
        // Draining frees capacity again.
        let n = a.try_write_vectored(&[IoSlice::new(b"def")]).unwrap();
        assert_eq!(n, 3);
    }

    #[tokio::test]
    async fn injected_read_error_surfaces_once() {
        let (a, _b) = MemSocket::pair();
        let faults = a.fault_handle();
        faults.fail_next_read(io::ErrorKind::ConnectionRefused);

        let ready = StreamSocket::ready(&a, Interest::READABLE).await.unwrap();
        assert!(ready.is_readable());
        let mut buf = [0u8; 8];
        assert_eq!(
            a.try_read(&mut buf).expect_err("injected error").kind(),
            io::ErrorKind::ConnectionRefused
        );
    }
}
