//! Gateway orchestration.
//!
//! Builds routers and listeners from a [`GatewayConfig`], runs the
//! accept loops (one task per TCP connection and per UDP session), and
//! drains UDP sessions on shutdown.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{tls, ConfigError, GatewayConfig};
use crate::modules::failover::Failover;
use crate::modules::tcp_router::{
    RouterHandle, RuleError, TcpForwarder, TcpHandler, TcpRouter, TcpRouterConfig,
};
use crate::modules::udp_router::{UdpError, UdpHandler, UdpListener, UdpProxy};

/// Result alias for gateway setup and runtime.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors raised while assembling or running the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid route: {0}")]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Udp(#[from] UdpError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// The running gateway: entrypoint tasks plus the swappable routing
/// table.
pub struct Gateway {
    config: GatewayConfig,
    router: Option<RouterHandle>,
    udp_listener: Option<Arc<UdpListener>>,
}

impl Gateway {
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            router: None,
            udp_listener: None,
        }
    }

    /// The live TCP routing handle, once the gateway is running.
    #[must_use]
    pub fn router(&self) -> Option<RouterHandle> {
        self.router.clone()
    }

    /// Rebuild the TCP routing table from a new configuration and swap
    /// it in atomically. In-flight connections keep the table they were
    /// dispatched with.
    ///
    /// # Errors
    ///
    /// Validation or build errors; the running table is untouched on
    /// failure.
    pub fn reload_tcp(&self, config: &TcpRouterConfig) -> GatewayResult<()> {
        config
            .validate()
            .map_err(|message| ConfigError::Validation { message })?;

        let Some(handle) = &self.router else {
            return Err(GatewayError::Config(ConfigError::Validation {
                message: "tcp entrypoint is not running".to_string(),
            }));
        };

        handle.swap(build_tcp_router(config)?);
        info!("tcp routing table reloaded");
        Ok(())
    }

    /// Bind the configured entrypoints and serve until interrupted,
    /// then drain UDP sessions within the configured grace period.
    ///
    /// # Errors
    ///
    /// Build or bind errors during startup; the serve loops themselves
    /// only log.
    pub async fn run(&mut self) -> GatewayResult<()> {
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        if let Some(tcp_config) = self.config.tcp.clone() {
            let handle = RouterHandle::new(build_tcp_router(&tcp_config)?);
            self.router = Some(handle.clone());

            let addr = tcp_config.socket_addr();
            let listener = TcpListener::bind(addr.as_str())
                .await
                .map_err(|e| GatewayError::Bind {
                    addr: addr.clone(),
                    source: e,
                })?;
            info!(addr = %addr, "tcp listener started");

            tasks.push(tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, peer)) => {
                            debug!(peer = %peer, "accepted tcp connection");
                            let router = handle.current();
                            tokio::spawn(async move {
                                router.serve(stream).await;
                            });
                        },
                        Err(e) => {
                            warn!(error = %e, "tcp accept failed");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        },
                    }
                }
            }));
        }

        if let Some(udp_config) = self.config.udp.clone() {
            let listener = Arc::new(
                UdpListener::bind(&udp_config.socket_addr(), udp_config.session.settings())
                    .await?,
            );
            self.udp_listener = Some(Arc::clone(&listener));
            let proxy: Arc<dyn UdpHandler> = Arc::new(UdpProxy::new(udp_config.backend));

            tasks.push(tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok(conn) => {
                            debug!(peer = %conn.peer_addr(), "accepted udp session");
                            let handler = Arc::clone(&proxy);
                            tokio::spawn(async move {
                                handler.serve(conn).await;
                            });
                        },
                        // The listener reports closed exactly once the
                        // shutdown below completes.
                        Err(_) => break,
                    }
                }
            }));
        }

        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutting down");

        if let Some(udp) = &self.udp_listener {
            udp.shutdown(Duration::from_millis(self.config.shutdown_grace_ms))
                .await;
        }
        for task in tasks {
            task.abort();
        }
        Ok(())
    }
}

/// Assemble a TCP router from configuration: forwarder (or failover
/// pair) per route, TLS termination where requested, and the fallback
/// forwarders.
///
/// # Errors
///
/// Rule parse errors or unreadable TLS material.
pub fn build_tcp_router(config: &TcpRouterConfig) -> GatewayResult<TcpRouter> {
    let mut router = TcpRouter::new();

    for route in &config.routes {
        let primary: Arc<dyn TcpHandler> = Arc::new(TcpForwarder::new(route.backend));

        let handler: Arc<dyn TcpHandler> = match route.fallback_backend {
            Some(fallback) => {
                let pair = Failover::new(route.health_check.as_ref());
                pair.set_handler(primary);
                pair.set_failover_handler(Arc::new(TcpForwarder::new(fallback)));
                Arc::new(pair)
            },
            None => primary,
        };

        match &route.tls {
            Some(files) => {
                let tls_config = tls::load_server_config(files)?;
                router.add_route_tls(&route.rule, route.priority, handler, tls_config)?;
            },
            None => router.add_route(&route.rule, route.priority, handler)?,
        }
    }

    if let Some(files) = &config.tls {
        router.set_tls_config(tls::load_server_config(files)?);
    }
    for host_tls in &config.host_tls {
        router.add_host_tls_config(&host_tls.host, tls::load_server_config(&host_tls.tls)?);
    }

    if let Some(addr) = config.http_forward {
        router.set_http_forwarder(Arc::new(TcpForwarder::new(addr)));
    }
    if let Some(addr) = config.https_forward {
        router.set_https_forwarder(Arc::new(TcpForwarder::new(addr)));
    }

    Ok(router)
}
