//! Rule-based TCP routing.
//!
//! Accepted connections are classified by a non-destructive ClientHello
//! peek, matched against `HostSNI`/`ClientIP` rule trees in priority
//! order, and handed to the winning handler with the peeked bytes
//! replayed in front of the live stream.

pub mod config;
pub mod error;
pub mod forwarder;
pub mod muxer;
pub mod router;
pub mod rule;
pub mod sniff;
pub mod stream;

use async_trait::async_trait;

pub use config::{HostTlsConfig, TcpRouteConfig, TcpRouterConfig, TlsFilesConfig};
pub use error::{RuleError, RuleResult};
pub use forwarder::TcpForwarder;
pub use muxer::Muxer;
pub use router::{RouterHandle, TcpRouter};
pub use rule::{parse, parse_host_sni, ConnData, MatchersTree};
pub use sniff::{sniff_client_hello, SniffResult};
pub use stream::{BoxedStream, PeekedStream, WriteCloser};

/// An asynchronous handler for one accepted TCP connection.
///
/// Serving consumes the connection; dropping it closes both directions.
#[async_trait]
pub trait TcpHandler: Send + Sync {
    async fn serve(&self, conn: BoxedStream);
}
