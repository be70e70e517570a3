//! Handle to the client connection a request arrived on.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Shared liveness flag for one client connection
///
/// The transport clones it into every request read from the connection and
/// flips it off from [`TrackedIo`] as soon as the socket reports EOF or an
/// error. The dispatcher only reads it on the error path, where a dead
/// connection means nothing is written.
///
/// When the peer hangs up while a request is being served, hyper drops the
/// in-flight dispatch future, so no error page is attempted at all. The flag
/// is what work that outlives the dispatch (anything holding a clone) sees.
#[derive(Debug, Clone)]
pub struct Connection {
    remote_addr: Option<SocketAddr>,
    active: Arc<AtomicBool>,
}

impl Connection {
    /// Create an active connection handle
    #[must_use]
    pub fn new(remote_addr: Option<SocketAddr>) -> Self {
        Self {
            remote_addr,
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Connection with no peer, for tests and in-process dispatch
    #[must_use]
    pub fn detached() -> Self {
        Self::new(None)
    }

    /// Peer address, when known
    #[must_use]
    pub const fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Whether the peer can still receive a response
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Mark the connection closed. Idempotent.
    pub fn close(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::detached()
    }
}

/// Socket wrapper that closes its [`Connection`] on EOF or IO failure
#[derive(Debug)]
pub struct TrackedIo<S> {
    inner: S,
    connection: Connection,
}

impl<S> TrackedIo<S> {
    /// Wrap `inner`, reporting its end to `connection`
    pub fn new(inner: S, connection: Connection) -> Self {
        Self { inner, connection }
    }

    fn observe<T>(&self, poll: &Poll<io::Result<T>>) {
        if let Poll::Ready(Err(_)) = poll {
            self.connection.close();
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TrackedIo<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let wanted = buf.remaining() > 0;
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        self.observe(&poll);
        if matches!(poll, Poll::Ready(Ok(()))) && wanted && buf.filled().len() == before {
            self.connection.close();
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TrackedIo<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        self.observe(&poll);
        poll
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write_vectored(cx, bufs);
        self.observe(&poll);
        poll
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let poll = Pin::new(&mut self.inner).poll_flush(cx);
        self.observe(&poll);
        poll
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let poll = Pin::new(&mut self.inner).poll_shutdown(cx);
        self.connection.close();
        poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_close_is_shared_between_clones() {
        let conn = Connection::new(Some(([127, 0, 0, 1], 9000).into()));
        let other = conn.clone();
        assert!(other.is_active());
        conn.close();
        conn.close();
        assert!(!other.is_active());
        assert_eq!(other.remote_addr().map(|a| a.port()), Some(9000));
    }

    #[tokio::test]
    async fn test_peer_hangup_closes_connection() {
        let (client, server) = tokio::io::duplex(64);
        let conn = Connection::detached();
        let mut io = TrackedIo::new(server, conn.clone());

        let mut client = client;
        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = io.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"GET / HTTP/1.1\r\n");
        assert!(conn.is_active());

        drop(client);
        assert_eq!(io.read(&mut buf).await.unwrap(), 0);
        assert!(!conn.is_active());
    }

    #[tokio::test]
    async fn test_failed_write_closes_connection() {
        let (client, server) = tokio::io::duplex(64);
        let conn = Connection::detached();
        let mut io = TrackedIo::new(server, conn.clone());

        drop(client);
        assert!(io.write_all(b"HTTP/1.1 500").await.is_err());
        assert!(!conn.is_active());
    }
}
