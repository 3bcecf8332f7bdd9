//! Raw TCP backend forwarding.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::stream::BoxedStream;
use super::TcpHandler;

const COPY_BUFFER_SIZE: usize = 8192;

/// A handler that pipes the connection to a fixed backend address,
/// byte for byte, in both directions.
pub struct TcpForwarder {
    backend: SocketAddr,
}

impl TcpForwarder {
    #[must_use]
    pub fn new(backend: SocketAddr) -> Self {
        Self { backend }
    }
}

#[async_trait::async_trait]
impl TcpHandler for TcpForwarder {
    async fn serve(&self, conn: BoxedStream) {
        let peer = conn.peer_addr().ok();

        let backend = match TcpStream::connect(self.backend).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    backend = %self.backend,
                    error = %e,
                    "failed to connect to backend"
                );
                return;
            },
        };

        let (mut client_read, mut client_write) = tokio::io::split(conn);
        let (mut backend_read, mut backend_write) = backend.into_split();

        let to_backend = copy_stream(&mut client_read, &mut backend_write);
        let to_client = copy_stream(&mut backend_read, &mut client_write);
        let (sent, received) = tokio::join!(to_backend, to_client);

        debug!(
            backend = %self.backend,
            peer = ?peer,
            bytes_sent = sent,
            bytes_received = received,
            "forwarding finished"
        );
    }
}

/// Copy until EOF or error, then half-close the destination. Returns
/// the number of bytes moved.
async fn copy_stream<R, W>(src: &mut R, dst: &mut W) -> u64
where
    R: AsyncReadExt + Unpin,
    W: AsyncWriteExt + Unpin,
{
    let mut buf = [0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        match src.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if dst.write_all(&buf[..n]).await.is_err() {
                    break;
                }
                total += n as u64;
            },
            Err(_) => break,
        }
    }

    let _ = dst.shutdown().await;
    total
}
