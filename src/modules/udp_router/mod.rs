//! Session-oriented UDP relaying.
//!
//! UDP has no connections, so the listener synthesizes them: datagrams
//! sharing a source address belong to one session until it idles out,
//! exhausts its quotas, or is closed. Each session is served by a
//! handler on its own task, like a TCP connection would be.

pub mod config;
pub mod conn;
pub mod error;
pub mod listener;
pub mod proxy;

use async_trait::async_trait;

pub use config::{UdpRouterConfig, UdpSessionConfig};
pub use conn::{SessionSettings, UdpConn};
pub use error::{UdpError, UdpResult};
pub use listener::{UdpListener, MAX_DATAGRAM_SIZE};
pub use proxy::UdpProxy;

/// An asynchronous handler for one UDP session.
#[async_trait]
pub trait UdpHandler: Send + Sync {
    async fn serve(&self, conn: UdpConn);
}
