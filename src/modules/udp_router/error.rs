//! Error types for the UDP router.

use std::io;

use thiserror::Error;

/// Result alias for UDP listener and session operations.
pub type UdpResult<T> = Result<T, UdpError>;

/// Errors raised by the UDP listener and its sessions.
#[derive(Debug, Error)]
pub enum UdpError {
    /// The listener has been shut down; no further sessions will be
    /// accepted.
    #[error("udp listener closed")]
    ListenerClosed,

    /// The session is closed and its datagram queue is drained.
    #[error("udp session closed")]
    SessionClosed,

    /// A session timeout of zero would never reclaim idle sessions.
    #[error("udp session timeout must be greater than zero")]
    InvalidTimeout,

    /// An underlying socket operation failed.
    #[error("udp {context} failed: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Errors worth retrying in place rather than tearing a relay down.
pub(crate) fn is_transient(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
