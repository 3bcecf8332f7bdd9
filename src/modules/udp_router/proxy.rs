//! Bidirectional UDP relay.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, warn};

use super::conn::UdpConn;
use super::error::is_transient;
use super::listener::MAX_DATAGRAM_SIZE;
use super::UdpHandler;

/// Relays a session's datagrams to a fixed backend and back.
///
/// Each served session gets its own connected backend socket, so
/// backend responses demultiplex onto the right client for free.
pub struct UdpProxy {
    target: SocketAddr,
}

impl UdpProxy {
    #[must_use]
    pub fn new(target: SocketAddr) -> Self {
        Self { target }
    }
}

#[async_trait::async_trait]
impl UdpHandler for UdpProxy {
    async fn serve(&self, conn: UdpConn) {
        let peer = conn.peer_addr();

        let bind_addr = if self.target.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let backend = match UdpSocket::bind(bind_addr).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!(target = %self.target, error = %e, "failed to bind relay socket");
                conn.close();
                return;
            },
        };
        if let Err(e) = backend.connect(self.target).await {
            warn!(target = %self.target, error = %e, "failed to connect relay socket");
            conn.close();
            return;
        }
        let backend = Arc::new(backend);

        let mut session_reader = conn.clone();
        let to_backend = {
            let backend = Arc::clone(&backend);
            async move {
                let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
                loop {
                    let n = match session_reader.read(&mut buf).await {
                        Ok(n) => n,
                        Err(_) => break,
                    };
                    // One read is one datagram is one send.
                    match backend.send(&buf[..n]).await {
                        Ok(_) => {},
                        Err(e) if is_transient(e.kind()) => {},
                        Err(e) => {
                            debug!(error = %e, "relay send to backend failed");
                            break;
                        },
                    }
                }
            }
        };

        let writer = conn.clone();
        let to_client = {
            let backend = Arc::clone(&backend);
            async move {
                let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
                loop {
                    let n = match backend.recv(&mut buf).await {
                        Ok(n) => n,
                        Err(e) if is_transient(e.kind()) => continue,
                        Err(e) => {
                            debug!(error = %e, "relay receive from backend failed");
                            break;
                        },
                    };
                    if writer.write(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        };

        // Either direction ending ends the relay.
        tokio::select! {
            () = to_backend => {},
            () = to_client => {},
        }

        conn.close();
        debug!(peer = %peer, target = %self.target, "relay finished");
    }
}
