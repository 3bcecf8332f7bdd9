//! Per-client UDP sessions.
//!
//! Each session owns a FIFO queue of datagrams delivered by the shared
//! listener read loop. The queue keeps datagram boundaries: one read
//! returns at most one datagram, and bytes that do not fit the caller's
//! buffer are discarded rather than carried into the next read.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use super::error::{UdpError, UdpResult};
use super::listener::ListenerShared;

/// Session lifecycle bounds. Zero counters mean unlimited.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Idle time after which the session is reclaimed.
    pub timeout: Duration,

    /// Client datagrams accepted before the session stops receiving.
    pub max_requests: u64,

    /// Response datagrams sent before the session closes.
    pub max_responses: u64,
}

/// A handle to one UDP session.
///
/// Cloning shares the session; reads are single-consumer by convention
/// (one task owns the reading side).
#[derive(Clone)]
pub struct UdpConn {
    shared: Arc<ConnShared>,
}

impl UdpConn {
    pub(crate) fn from_shared(shared: Arc<ConnShared>) -> Self {
        Self { shared }
    }

    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Receive the next datagram from the client.
    ///
    /// Copies at most `buf.len()` bytes of one datagram; the remainder
    /// of an oversized datagram is discarded. Returns once a datagram
    /// is available.
    ///
    /// # Errors
    ///
    /// [`UdpError::SessionClosed`] once the session is closed and the
    /// queue is drained; queued datagrams are still delivered after
    /// close.
    pub async fn read(&mut self, buf: &mut [u8]) -> UdpResult<usize> {
        loop {
            let notified = self.shared.wake.notified();
            tokio::pin!(notified);
            // Register interest before the queue check so an enqueue
            // between check and await is not lost.
            notified.as_mut().enable();

            if let Some(datagram) = self.shared.pop_datagram() {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                if datagram.len() > n {
                    trace!(
                        peer = %self.shared.peer,
                        discarded = datagram.len() - n,
                        "datagram larger than read buffer"
                    );
                }
                return Ok(n);
            }

            if self.shared.is_closed() {
                return Err(UdpError::SessionClosed);
            }

            notified.await;
        }
    }

    /// Send one datagram back to the client.
    ///
    /// # Errors
    ///
    /// [`UdpError::SessionClosed`] when the session is already closed,
    /// or an I/O error from the socket.
    pub async fn write(&self, buf: &[u8]) -> UdpResult<usize> {
        if self.shared.is_closed() {
            return Err(UdpError::SessionClosed);
        }

        let n = self
            .shared
            .socket
            .send_to(buf, self.shared.peer)
            .await
            .map_err(|e| UdpError::Io {
                context: "send",
                source: e,
            })?;

        if self.shared.record_send() {
            debug!(peer = %self.shared.peer, "response quota reached, closing session");
            self.shared.close();
        }

        Ok(n)
    }

    /// Close the session. Idempotent; queued datagrams remain readable.
    pub fn close(&self) {
        self.shared.close();
    }
}

pub(crate) struct ConnShared {
    peer: SocketAddr,
    socket: Arc<UdpSocket>,
    settings: SessionSettings,
    listener: Weak<ListenerShared>,

    queue: Mutex<VecDeque<Bytes>>,
    wake: Notify,
    closed: AtomicBool,
    activity: Mutex<Activity>,
}

struct Activity {
    last_activity: Instant,
    received: u64,
    sent: u64,
}

impl ConnShared {
    pub(crate) fn new(
        peer: SocketAddr,
        socket: Arc<UdpSocket>,
        settings: SessionSettings,
        listener: Weak<ListenerShared>,
    ) -> Self {
        Self {
            peer,
            socket,
            settings,
            listener,
            queue: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            closed: AtomicBool::new(false),
            activity: Mutex::new(Activity {
                last_activity: Instant::now(),
                received: 0,
                sent: 0,
            }),
        }
    }

    /// Queue a datagram delivered by the listener read loop. Never
    /// blocks: a slow or closing session cannot stall the shared loop.
    pub(crate) fn enqueue(&self, datagram: Bytes) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(datagram);

        let mut activity = self.activity.lock().unwrap_or_else(PoisonError::into_inner);
        activity.last_activity = Instant::now();
        activity.received += 1;
        drop(activity);

        self.wake.notify_one();
    }

    /// Whether the listener may still route datagrams here.
    pub(crate) fn can_receive(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        if self.settings.max_requests == 0 {
            return true;
        }
        let activity = self.activity.lock().unwrap_or_else(PoisonError::into_inner);
        activity.received < self.settings.max_requests
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn pop_datagram(&self) -> Option<Bytes> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Record an outbound datagram; true when the response quota is now
    /// exhausted.
    fn record_send(&self) -> bool {
        let mut activity = self.activity.lock().unwrap_or_else(PoisonError::into_inner);
        activity.last_activity = Instant::now();
        activity.sent += 1;
        self.settings.max_responses != 0 && activity.sent >= self.settings.max_responses
    }

    fn last_activity(&self) -> Instant {
        self.activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_activity
    }

    /// Close once: mark, wake readers, deregister from the listener.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.wake.notify_waiters();
        if let Some(listener) = self.listener.upgrade() {
            listener.deregister(self.peer, self);
        }
        trace!(peer = %self.peer, "session closed");
    }
}

/// Watch a session for inactivity, checking ten times per timeout
/// window.
pub(crate) fn spawn_watchdog(shared: Arc<ConnShared>) {
    let timeout = shared.settings.timeout;
    let tick = (timeout / 10).max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if shared.is_closed() {
                break;
            }
            if shared.last_activity().elapsed() > timeout {
                debug!(peer = %shared.peer, "session idle timeout");
                shared.close();
                break;
            }
        }
    });
}
