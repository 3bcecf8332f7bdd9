//! Connection stream abstractions.
//!
//! Handlers receive connections as [`BoxedStream`] trait objects so the
//! router can hand them a raw socket, a peek-replaying decorator, or a
//! terminated TLS stream through one type.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// The capability set the router requires from an accepted connection.
///
/// Write half-close goes through `poll_shutdown`.
pub trait WriteCloser: AsyncRead + AsyncWrite + Send + Unpin {
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// An owned, type-erased connection stream.
pub type BoxedStream = Box<dyn WriteCloser>;

impl WriteCloser for TcpStream {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }
}

impl WriteCloser for Box<dyn WriteCloser> {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        (**self).peer_addr()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        (**self).local_addr()
    }
}

impl WriteCloser for tokio_rustls::server::TlsStream<BoxedStream> {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.get_ref().0.peer_addr()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.get_ref().0.local_addr()
    }
}

/// A stream that replays already-read-but-unconsumed bytes before
/// reading from the underlying connection.
///
/// Replay is byte-exact: reading a peeked prefix and then the decorated
/// stream yields the same sequence the peer sent.
pub struct PeekedStream<S> {
    peeked: Bytes,
    inner: S,
}

impl<S> PeekedStream<S> {
    #[must_use]
    pub fn new(peeked: Bytes, inner: S) -> Self {
        Self { peeked, inner }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PeekedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.peeked.is_empty() {
            let n = this.peeked.len().min(buf.remaining());
            buf.put_slice(&this.peeked.split_to(n));
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PeekedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}

impl<S: WriteCloser> WriteCloser for PeekedStream<S> {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn test_replay_then_live_reads() {
        let live: &[u8] = b" world";
        let mut stream = PeekedStream::new(Bytes::from_static(b"hello"), live);

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn test_replay_respects_small_buffers() {
        let live: &[u8] = b"cd";
        let mut stream = PeekedStream::new(Bytes::from_static(b"ab"), live);

        let mut byte = [0u8; 1];
        let mut out = Vec::new();
        for _ in 0..4 {
            stream.read_exact(&mut byte).await.unwrap();
            out.push(byte[0]);
        }
        assert_eq!(out, b"abcd");
        assert_eq!(stream.read(&mut byte).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_peek_is_transparent() {
        let live: &[u8] = b"data";
        let mut stream = PeekedStream::new(Bytes::new(), live);

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"data");
    }
}
