//! TCP router configuration types.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::modules::failover::HealthCheckConfig;

use super::rule;

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8443
}

/// Configuration for one TCP entrypoint and its routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpRouterConfig {
    /// Address to bind the listener to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Routes evaluated in priority order.
    #[serde(default)]
    pub routes: Vec<TcpRouteConfig>,

    /// Backend for plain connections no route claims.
    #[serde(default)]
    pub http_forward: Option<SocketAddr>,

    /// Backend for TLS connections no route claims; terminated with the
    /// default (or per-host) TLS material before forwarding.
    #[serde(default)]
    pub https_forward: Option<SocketAddr>,

    /// Default TLS certificate and key.
    #[serde(default)]
    pub tls: Option<TlsFilesConfig>,

    /// Per-SNI TLS material overriding the default during fallback
    /// termination.
    #[serde(default)]
    pub host_tls: Vec<HostTlsConfig>,
}

impl Default for TcpRouterConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            routes: Vec::new(),
            http_forward: None,
            https_forward: None,
            tls: None,
            host_tls: Vec::new(),
        }
    }
}

impl TcpRouterConfig {
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    #[must_use]
    pub fn with_route(mut self, route: TcpRouteConfig) -> Self {
        self.routes.push(route);
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Check the configuration before any socket is bound.
    ///
    /// # Errors
    ///
    /// Returns a message describing the first problem found: a rule that
    /// does not parse, a TLS route without certificate material, or a
    /// per-host override with an empty host.
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("tcp port must be non-zero".to_string());
        }

        for route in &self.routes {
            rule::parse(&route.rule)
                .map_err(|e| format!("route {:?}: {e}", route.rule))?;

            if let Some(tls) = &route.tls {
                tls.validate()
                    .map_err(|e| format!("route {:?}: {e}", route.rule))?;
            }
        }

        if let Some(tls) = &self.tls {
            tls.validate()?;
        }

        for host_tls in &self.host_tls {
            if host_tls.host.is_empty() {
                return Err("host_tls entry with empty host".to_string());
            }
            host_tls.tls.validate()?;
        }

        if self.https_forward.is_some() && self.tls.is_none() {
            return Err("https_forward requires default tls material".to_string());
        }

        Ok(())
    }
}

/// One routing rule bound to a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpRouteConfig {
    /// Rule expression, e.g. ``HostSNI(`api.example`)``.
    pub rule: String,

    /// Explicit priority; zero or negative means "derive from rule
    /// length".
    #[serde(default)]
    pub priority: i32,

    /// Backend address connections are forwarded to.
    pub backend: SocketAddr,

    /// Secondary backend taking over when the primary is reported
    /// down.
    #[serde(default)]
    pub fallback_backend: Option<SocketAddr>,

    /// Arms status propagation for the primary/fallback pair.
    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,

    /// When set, the route terminates TLS with this material before
    /// forwarding.
    #[serde(default)]
    pub tls: Option<TlsFilesConfig>,
}

/// PEM certificate chain and private key locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsFilesConfig {
    pub cert_file: String,
    pub key_file: String,
}

impl TlsFilesConfig {
    fn validate(&self) -> Result<(), String> {
        if self.cert_file.is_empty() || self.key_file.is_empty() {
            return Err("tls material requires both cert_file and key_file".to_string());
        }
        Ok(())
    }
}

/// TLS material served for one exact SNI host name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostTlsConfig {
    pub host: String,

    #[serde(flatten)]
    pub tls: TlsFilesConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TcpRouterConfig::default();
        assert_eq!(config.socket_addr(), "0.0.0.0:8443");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parses_minimal_json() {
        let config: TcpRouterConfig = serde_json::from_str(
            r#"{
                "port": 9443,
                "routes": [
                    { "rule": "HostSNI(`api.example`)", "backend": "127.0.0.1:6000" }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.port, 9443);
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].priority, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_rule() {
        let config = TcpRouterConfig::default().with_route(TcpRouteConfig {
            rule: "HostSNI(`*.bad`)".to_string(),
            priority: 0,
            backend: "127.0.0.1:6000".parse().unwrap(),
            fallback_backend: None,
            health_check: None,
            tls: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_tls_for_https_forward() {
        let mut config = TcpRouterConfig::default();
        config.https_forward = Some("127.0.0.1:6443".parse().unwrap());
        assert!(config.validate().is_err());
    }
}
