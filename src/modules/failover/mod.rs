//! Health-driven primary/failover dispatch.
//!
//! A [`Failover`] pair serves connections through its primary handler
//! while it is reported up, falls back to the secondary otherwise, and
//! closes the connection when neither is healthy. Health is reported
//! from outside; the pair only aggregates and propagates it.

pub mod config;
pub mod error;

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info};

use crate::modules::tcp_router::{BoxedStream, TcpHandler};

pub use config::HealthCheckConfig;
pub use error::{FailoverError, FailoverResult};

/// Callback invoked with the pair's combined status whenever it
/// changes.
pub type StatusUpdater = Box<dyn Fn(bool) + Send + Sync>;

struct Slot {
    handler: Option<Arc<dyn TcpHandler>>,
    up: bool,
}

/// A primary/secondary handler pair with deduplicated status
/// propagation.
///
/// The two slots are locked independently; aggregation reads the
/// sibling slot only after releasing the written one, so the locks
/// never nest.
pub struct Failover {
    wants_health_check: bool,
    primary: RwLock<Slot>,
    fallback: RwLock<Slot>,
    updaters: Mutex<Vec<StatusUpdater>>,
}

impl Failover {
    #[must_use]
    pub fn new(health_check: Option<&HealthCheckConfig>) -> Self {
        Self {
            wants_health_check: health_check.is_some(),
            primary: RwLock::new(Slot {
                handler: None,
                up: false,
            }),
            fallback: RwLock::new(Slot {
                handler: None,
                up: false,
            }),
            updaters: Mutex::new(Vec::new()),
        }
    }

    /// Install the primary handler and mark it up.
    pub fn set_handler(&self, handler: Arc<dyn TcpHandler>) {
        let mut slot = self.primary.write().unwrap_or_else(PoisonError::into_inner);
        slot.handler = Some(handler);
        slot.up = true;
    }

    /// Install the failover handler and mark it up.
    pub fn set_failover_handler(&self, handler: Arc<dyn TcpHandler>) {
        let mut slot = self
            .fallback
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        slot.handler = Some(handler);
        slot.up = true;
    }

    /// Report the primary handler's health. Repeated reports of the
    /// same status are absorbed without propagation.
    pub fn set_handler_status(&self, up: bool) {
        {
            let mut slot = self.primary.write().unwrap_or_else(PoisonError::into_inner);
            if slot.up == up {
                debug!(up, "primary status unchanged");
                return;
            }
            slot.up = up;
        }

        let fallback_up = self
            .fallback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .up;
        info!(up, "primary status changed");
        self.propagate(up || fallback_up);
    }

    /// Report the failover handler's health, with the same
    /// deduplication as [`set_handler_status`](Self::set_handler_status).
    pub fn set_failover_handler_status(&self, up: bool) {
        {
            let mut slot = self
                .fallback
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.up == up {
                debug!(up, "failover status unchanged");
                return;
            }
            slot.up = up;
        }

        let primary_up = self
            .primary
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .up;
        info!(up, "failover status changed");
        self.propagate(primary_up || up);
    }

    /// Register a callback for combined-status changes.
    ///
    /// # Errors
    ///
    /// [`FailoverError::HealthCheckDisabled`] when the pair was built
    /// without health-check configuration.
    pub fn register_status_updater(&self, updater: StatusUpdater) -> FailoverResult<()> {
        if !self.wants_health_check {
            return Err(FailoverError::HealthCheckDisabled);
        }
        self.updaters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(updater);
        Ok(())
    }

    fn propagate(&self, combined_up: bool) {
        let updaters = self.updaters.lock().unwrap_or_else(PoisonError::into_inner);
        for updater in updaters.iter() {
            updater(combined_up);
        }
    }

    fn healthy_handler(slot: &RwLock<Slot>) -> Option<Arc<dyn TcpHandler>> {
        let slot = slot.read().unwrap_or_else(PoisonError::into_inner);
        if slot.up {
            slot.handler.clone()
        } else {
            None
        }
    }
}

#[async_trait::async_trait]
impl TcpHandler for Failover {
    async fn serve(&self, conn: BoxedStream) {
        if let Some(handler) = Self::healthy_handler(&self.primary) {
            handler.serve(conn).await;
            return;
        }

        if let Some(handler) = Self::healthy_handler(&self.fallback) {
            debug!("primary down, serving through failover");
            handler.serve(conn).await;
            return;
        }

        // Dropping the connection is the layer-4 refusal.
        debug!("no healthy handler, closing connection");
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::net::SocketAddr;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

    use crate::modules::tcp_router::WriteCloser;

    use super::*;

    struct TestStream(DuplexStream);

    impl AsyncRead for TestStream {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().0).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for TestStream {
        fn poll_write(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.get_mut().0).poll_write(cx, buf)
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().0).poll_flush(cx)
        }

        fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().0).poll_shutdown(cx)
        }
    }

    impl WriteCloser for TestStream {
        fn peer_addr(&self) -> io::Result<SocketAddr> {
            Ok("127.0.0.1:1".parse().unwrap())
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok("127.0.0.1:2".parse().unwrap())
        }
    }

    fn test_conn() -> BoxedStream {
        let (near, _far) = tokio::io::duplex(16);
        Box::new(TestStream(near))
    }

    struct CountingHandler {
        hits: AtomicUsize,
    }

    impl CountingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                hits: AtomicUsize::new(0),
            })
        }

        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl TcpHandler for CountingHandler {
        async fn serve(&self, _conn: BoxedStream) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn health_checked() -> Failover {
        Failover::new(Some(&HealthCheckConfig::default()))
    }

    #[tokio::test]
    async fn test_serves_primary_while_up() {
        let failover = health_checked();
        let primary = CountingHandler::new();
        let secondary = CountingHandler::new();
        failover.set_handler(primary.clone());
        failover.set_failover_handler(secondary.clone());

        failover.serve(test_conn()).await;
        assert_eq!(primary.hits(), 1);
        assert_eq!(secondary.hits(), 0);
    }

    #[tokio::test]
    async fn test_falls_back_when_primary_down() {
        let failover = health_checked();
        let primary = CountingHandler::new();
        let secondary = CountingHandler::new();
        failover.set_handler(primary.clone());
        failover.set_failover_handler(secondary.clone());

        failover.set_handler_status(false);
        failover.serve(test_conn()).await;
        assert_eq!(primary.hits(), 0);
        assert_eq!(secondary.hits(), 1);
    }

    #[tokio::test]
    async fn test_closes_when_both_down() {
        let failover = health_checked();
        let primary = CountingHandler::new();
        let secondary = CountingHandler::new();
        failover.set_handler(primary.clone());
        failover.set_failover_handler(secondary.clone());

        failover.set_handler_status(false);
        failover.set_failover_handler_status(false);
        failover.serve(test_conn()).await;
        assert_eq!(primary.hits(), 0);
        assert_eq!(secondary.hits(), 0);
    }

    #[tokio::test]
    async fn test_recovery_restores_primary() {
        let failover = health_checked();
        let primary = CountingHandler::new();
        let secondary = CountingHandler::new();
        failover.set_handler(primary.clone());
        failover.set_failover_handler(secondary.clone());

        failover.set_handler_status(false);
        failover.set_handler_status(true);
        failover.serve(test_conn()).await;
        assert_eq!(primary.hits(), 1);
    }

    #[test]
    fn test_updater_requires_health_check() {
        let failover = Failover::new(None);
        let result = failover.register_status_updater(Box::new(|_| {}));
        assert!(matches!(result, Err(FailoverError::HealthCheckDisabled)));
    }

    #[test]
    fn test_repeated_status_is_not_propagated() {
        let failover = health_checked();
        failover.set_handler(CountingHandler::new());
        failover.set_failover_handler(CountingHandler::new());

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        failover
            .register_status_updater(Box::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        failover.set_handler_status(true); // already up, absorbed
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        failover.set_handler_status(false);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        failover.set_handler_status(false); // absorbed again
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_combined_status_is_an_or() {
        let failover = health_checked();
        failover.set_handler(CountingHandler::new());
        failover.set_failover_handler(CountingHandler::new());

        let last = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&last);
        failover
            .register_status_updater(Box::new(move |up| {
                sink.lock().unwrap().push(up);
            }))
            .unwrap();

        // Primary goes down but the pair stays up through the fallback.
        failover.set_handler_status(false);
        // Fallback follows; now the whole pair is down.
        failover.set_failover_handler_status(false);
        // Fallback recovers; the pair is reachable again.
        failover.set_failover_handler_status(true);

        assert_eq!(*last.lock().unwrap(), vec![true, false, true]);
    }
}
