//! Connection classification and dispatch.
//!
//! A [`TcpRouter`] is immutable once built: configuration reloads build
//! a fresh router and swap it through a [`RouterHandle`], so accept
//! loops never observe a half-updated route set.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::net::TcpStream;
use tokio_rustls::rustls::server::Acceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::{LazyConfigAcceptor, TlsAcceptor};
use tracing::debug;

use super::error::RuleResult;
use super::muxer::Muxer;
use super::rule::ConnData;
use super::sniff::sniff_client_hello;
use super::stream::{BoxedStream, PeekedStream};
use super::TcpHandler;

/// Routes accepted TCP connections to handlers.
///
/// Plain and TLS routes live in separate muxers; TLS connections are
/// matched on the SNI extracted by a non-destructive ClientHello peek,
/// and the peeked bytes are replayed to whichever handler wins.
#[derive(Default)]
pub struct TcpRouter {
    muxer: Muxer,
    muxer_tls: Muxer,

    /// Default TLS configuration for terminated fallback traffic.
    tls_config: Option<Arc<ServerConfig>>,

    /// Per-SNI configuration overrides, exact-match on the lowercased
    /// host name.
    host_tls_config: HashMap<String, Arc<ServerConfig>>,

    /// Fallback for plain connections no route claims.
    http_forwarder: Option<Arc<dyn TcpHandler>>,

    /// Fallback for TLS connections no route claims; served through
    /// TLS termination with per-SNI configuration resolution.
    https_forwarder: Option<Arc<dyn TcpHandler>>,
}

impl TcpRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plain-TCP route.
    ///
    /// # Errors
    ///
    /// Fails when the rule does not parse.
    pub fn add_route(
        &mut self,
        rule: &str,
        priority: i32,
        handler: Arc<dyn TcpHandler>,
    ) -> RuleResult<()> {
        self.muxer.add_route(rule, priority, handler)
    }

    /// Register a TLS route. The connection is terminated with `config`
    /// before `handler` sees it.
    ///
    /// # Errors
    ///
    /// Fails when the rule does not parse.
    pub fn add_route_tls(
        &mut self,
        rule: &str,
        priority: i32,
        handler: Arc<dyn TcpHandler>,
        config: Arc<ServerConfig>,
    ) -> RuleResult<()> {
        let terminating = Arc::new(TlsHandler {
            next: handler,
            config,
        });
        self.muxer_tls.add_route(rule, priority, terminating)
    }

    pub fn set_tls_config(&mut self, config: Arc<ServerConfig>) {
        self.tls_config = Some(config);
    }

    /// Override the TLS configuration used for `host` during fallback
    /// termination. Lookup is exact-match on the lowercased name.
    pub fn add_host_tls_config(&mut self, host: &str, config: Arc<ServerConfig>) {
        self.host_tls_config
            .insert(host.to_ascii_lowercase(), config);
    }

    pub fn set_http_forwarder(&mut self, handler: Arc<dyn TcpHandler>) {
        self.http_forwarder = Some(handler);
    }

    pub fn set_https_forwarder(&mut self, handler: Arc<dyn TcpHandler>) {
        self.https_forwarder = Some(handler);
    }

    /// Classify and dispatch one accepted connection.
    ///
    /// Dropping the stream without serving it is the rejection path;
    /// nothing is ever written to an unrouted connection.
    pub async fn serve(&self, stream: TcpStream) {
        let peer = match stream.peer_addr() {
            Ok(peer) => peer,
            Err(e) => {
                debug!(error = %e, "connection lost before routing");
                return;
            },
        };

        // With only plain routes registered there is nothing to learn
        // from the handshake peek; match on the client IP alone.
        if self.muxer.has_routes()
            && !self.muxer_tls.has_routes()
            && self.https_forwarder.is_none()
        {
            let meta = ConnData::new("", peer);
            if let Some(handler) = self.muxer.match_conn(&meta) {
                handler.serve(Box::new(stream)).await;
            } else if let Some(forwarder) = &self.http_forwarder {
                forwarder.serve(Box::new(stream)).await;
            } else {
                debug!(peer = %peer, "no matching route, closing");
            }
            return;
        }

        let mut stream = stream;
        let sniffed = match sniff_client_hello(&mut stream).await {
            Ok(sniffed) => sniffed,
            Err(e) => {
                debug!(peer = %peer, error = %e, "peer hung up during peek");
                return;
            },
        };

        let server_name = sniffed.server_name.as_deref().unwrap_or_default();
        let meta = ConnData::new(server_name, peer);
        let conn: BoxedStream = Box::new(PeekedStream::new(sniffed.peeked, stream));

        if !sniffed.is_tls {
            if let Some(handler) = self.muxer.match_conn(&meta) {
                handler.serve(conn).await;
            } else if let Some(forwarder) = &self.http_forwarder {
                forwarder.serve(conn).await;
            } else {
                debug!(peer = %peer, "no matching plain route, closing");
            }
            return;
        }

        if let Some(handler) = self.muxer_tls.match_conn(&meta) {
            handler.serve(conn).await;
            return;
        }

        if let Some(forwarder) = &self.https_forwarder {
            let forwarder = Arc::clone(forwarder);
            self.terminate_and_serve(forwarder, conn).await;
            return;
        }

        debug!(
            peer = %peer,
            server_name = %meta.server_name(),
            "no matching TLS route, closing"
        );
    }

    /// Terminate TLS for fallback traffic, resolving the configuration
    /// from the handshake's SNI before completing it.
    async fn terminate_and_serve(&self, next: Arc<dyn TcpHandler>, conn: BoxedStream) {
        let Some(default_config) = self.tls_config.clone() else {
            debug!("no TLS configuration for fallback termination, closing");
            return;
        };

        let acceptor = LazyConfigAcceptor::new(Acceptor::default(), conn);
        let start = match acceptor.await {
            Ok(start) => start,
            Err(e) => {
                debug!(error = %e, "TLS handshake rejected");
                return;
            },
        };

        let config = start
            .client_hello()
            .server_name()
            .and_then(|name| self.host_tls_config.get(&name.to_ascii_lowercase()))
            .cloned()
            .unwrap_or(default_config);

        match start.into_stream(config).await {
            Ok(tls) => next.serve(Box::new(tls)).await,
            Err(e) => debug!(error = %e, "TLS handshake failed"),
        }
    }
}

/// Wraps a handler with TLS termination under a fixed configuration.
struct TlsHandler {
    next: Arc<dyn TcpHandler>,
    config: Arc<ServerConfig>,
}

#[async_trait::async_trait]
impl TcpHandler for TlsHandler {
    async fn serve(&self, conn: BoxedStream) {
        let acceptor = TlsAcceptor::from(Arc::clone(&self.config));
        match acceptor.accept(conn).await {
            Ok(tls) => self.next.serve(Box::new(tls)).await,
            Err(e) => debug!(error = %e, "TLS handshake failed"),
        }
    }
}

/// Shared, atomically swappable reference to the current router.
#[derive(Clone)]
pub struct RouterHandle {
    inner: Arc<RwLock<Arc<TcpRouter>>>,
}

impl RouterHandle {
    #[must_use]
    pub fn new(router: TcpRouter) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(router))),
        }
    }

    /// The router serving new connections right now. Connections
    /// already dispatched keep the router they started with.
    #[must_use]
    pub fn current(&self) -> Arc<TcpRouter> {
        let guard = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Replace the routing table in one step.
    pub fn swap(&self, router: TcpRouter) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(router);
    }
}
