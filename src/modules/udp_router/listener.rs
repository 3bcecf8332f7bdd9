//! Session-demuxing UDP listener.
//!
//! One task reads the shared socket and routes each datagram to the
//! session registered for its source address, creating sessions on
//! demand and publishing them through `accept`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::conn::{self, ConnShared, SessionSettings, UdpConn};
use super::error::{is_transient, UdpError, UdpResult};

/// Largest datagram a single receive can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// How often a draining shutdown re-checks the session count.
const CLOSE_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// A UDP listener producing one [`UdpConn`] per client session.
pub struct UdpListener {
    shared: Arc<ListenerShared>,
    accept_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<UdpConn>>,
    read_task: JoinHandle<()>,
}

impl UdpListener {
    /// Bind the socket and start the shared read loop.
    ///
    /// # Errors
    ///
    /// [`UdpError::InvalidTimeout`] when the idle timeout is zero, or
    /// an I/O error from binding.
    pub async fn bind(addr: &str, settings: SessionSettings) -> UdpResult<Self> {
        if settings.timeout.is_zero() {
            return Err(UdpError::InvalidTimeout);
        }

        let socket = UdpSocket::bind(addr).await.map_err(|e| UdpError::Io {
            context: "bind",
            source: e,
        })?;
        let local = socket.local_addr().map_err(|e| UdpError::Io {
            context: "local_addr",
            source: e,
        })?;

        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ListenerShared {
            socket: Arc::new(socket),
            settings,
            registry: Mutex::new(Registry {
                accepting: true,
                sessions: HashMap::new(),
                accept_tx: Some(accept_tx),
            }),
        });

        let read_task = tokio::spawn(read_loop(Arc::clone(&shared)));
        info!(addr = %local, "udp listener started");

        Ok(Self {
            shared,
            accept_rx: tokio::sync::Mutex::new(accept_rx),
            read_task,
        })
    }

    /// # Errors
    ///
    /// An I/O error from the socket.
    pub fn local_addr(&self) -> UdpResult<SocketAddr> {
        self.shared.socket.local_addr().map_err(|e| UdpError::Io {
            context: "local_addr",
            source: e,
        })
    }

    /// Wait for the next new session.
    ///
    /// # Errors
    ///
    /// [`UdpError::ListenerClosed`] once shutdown has completed.
    pub async fn accept(&self) -> UdpResult<UdpConn> {
        self.accept_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(UdpError::ListenerClosed)
    }

    /// Sessions currently registered.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.shared.active_sessions()
    }

    /// Stop admitting sessions, give existing ones up to `grace` to
    /// finish, then force-close everything. Idempotent; concurrent
    /// calls after the first return immediately.
    pub async fn shutdown(&self, grace: Duration) {
        {
            let mut registry = self.shared.lock_registry();
            if !registry.accepting {
                return;
            }
            registry.accepting = false;
        }

        debug!(grace_ms = grace.as_millis() as u64, "udp listener draining");

        let deadline = Instant::now() + grace;
        let step = grace.min(CLOSE_RETRY_INTERVAL);
        while self.shared.active_sessions() > 0 && Instant::now() < deadline {
            tokio::time::sleep(step).await;
        }

        self.read_task.abort();
        for session in self.shared.all_sessions() {
            session.close();
        }

        let mut registry = self.shared.lock_registry();
        registry.sessions.clear();
        // Dropping the sender closes the accept channel.
        registry.accept_tx = None;
        drop(registry);

        info!("udp listener closed");
    }

    /// Immediate shutdown without a drain period.
    pub async fn close(&self) {
        self.shutdown(Duration::ZERO).await;
    }
}

pub(crate) struct ListenerShared {
    socket: Arc<UdpSocket>,
    settings: SessionSettings,
    registry: Mutex<Registry>,
}

struct Registry {
    accepting: bool,
    sessions: HashMap<SocketAddr, Vec<Arc<ConnShared>>>,
    accept_tx: Option<mpsc::UnboundedSender<UdpConn>>,
}

impl ListenerShared {
    fn lock_registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route one datagram: reuse a live session for the source address
    /// if it may still receive, else admit a fresh one.
    fn dispatch(self: &Arc<Self>, peer: SocketAddr, datagram: Bytes) {
        let mut registry = self.lock_registry();

        if let Some(sessions) = registry.sessions.get(&peer) {
            if let Some(session) = sessions.iter().find(|s| s.can_receive()) {
                session.enqueue(datagram);
                return;
            }
        }

        if !registry.accepting {
            debug!(peer = %peer, "listener not accepting, dropping datagram");
            return;
        }

        let session = Arc::new(ConnShared::new(
            peer,
            Arc::clone(&self.socket),
            self.settings,
            Arc::downgrade(self),
        ));
        session.enqueue(datagram);
        registry
            .sessions
            .entry(peer)
            .or_default()
            .push(Arc::clone(&session));

        conn::spawn_watchdog(Arc::clone(&session));
        if let Some(tx) = &registry.accept_tx {
            let _ = tx.send(UdpConn::from_shared(session));
        }
        debug!(peer = %peer, "new udp session");
    }

    /// Remove one closed session from the registry.
    pub(crate) fn deregister(&self, peer: SocketAddr, session: &ConnShared) {
        let mut registry = self.lock_registry();
        if let Some(sessions) = registry.sessions.get_mut(&peer) {
            sessions.retain(|s| !std::ptr::eq(Arc::as_ptr(s), session));
            if sessions.is_empty() {
                registry.sessions.remove(&peer);
            }
        }
    }

    fn active_sessions(&self) -> usize {
        self.lock_registry().sessions.values().map(Vec::len).sum()
    }

    fn all_sessions(&self) -> Vec<Arc<ConnShared>> {
        self.lock_registry()
            .sessions
            .values()
            .flatten()
            .map(Arc::clone)
            .collect()
    }
}

async fn read_loop(shared: Arc<ListenerShared>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        match shared.socket.recv_from(&mut buf).await {
            Ok((n, peer)) => {
                shared.dispatch(peer, Bytes::copy_from_slice(&buf[..n]));
            },
            Err(e) if is_transient(e.kind()) => {},
            Err(e) => {
                warn!(error = %e, "udp receive failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            },
        }
    }
}
