//! UDP router configuration types.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::conn::SessionSettings;

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8053
}

fn default_timeout_ms() -> u64 {
    3000
}

/// Configuration for one UDP entrypoint relaying to a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpRouterConfig {
    /// Address to bind the listener to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Backend address datagrams are relayed to.
    pub backend: SocketAddr,

    /// Session lifecycle settings.
    #[serde(default)]
    pub session: UdpSessionConfig,
}

impl UdpRouterConfig {
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Check the configuration before any socket is bound.
    ///
    /// # Errors
    ///
    /// Returns a message describing the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("udp port must be non-zero".to_string());
        }
        if self.session.timeout_ms == 0 {
            return Err("udp session timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Session lifecycle settings.
///
/// A session always expires after `timeout_ms` of inactivity. The two
/// counters are optional bounds: zero means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpSessionConfig {
    /// Idle timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Datagrams a session accepts from the client before a fresh
    /// session takes over the address.
    #[serde(default)]
    pub max_requests: u64,

    /// Datagrams a session sends back before closing.
    #[serde(default)]
    pub max_responses: u64,
}

impl Default for UdpSessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_requests: 0,
            max_responses: 0,
        }
    }
}

impl UdpSessionConfig {
    #[must_use]
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            timeout: Duration::from_millis(self.timeout_ms),
            max_requests: self.max_requests,
            max_responses: self.max_responses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_minimal_json() {
        let config: UdpRouterConfig = serde_json::from_str(
            r#"{ "port": 5353, "backend": "127.0.0.1:5300" }"#,
        )
        .unwrap();
        assert_eq!(config.socket_addr(), "0.0.0.0:5353");
        assert_eq!(config.session.timeout_ms, 3000);
        assert_eq!(config.session.max_requests, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config: UdpRouterConfig = serde_json::from_str(
            r#"{
                "backend": "127.0.0.1:5300",
                "session": { "timeout_ms": 0 }
            }"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
