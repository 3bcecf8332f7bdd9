//! Top-level gateway configuration.

use serde::{Deserialize, Serialize};

use crate::modules::tcp_router::TcpRouterConfig;
use crate::modules::udp_router::UdpRouterConfig;

use super::error::{ConfigError, ConfigResult};

fn default_shutdown_grace_ms() -> u64 {
    10_000
}

/// The whole gateway: at most one TCP and one UDP entrypoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// TCP entrypoint with its routes.
    #[serde(default)]
    pub tcp: Option<TcpRouterConfig>,

    /// UDP entrypoint relaying to a backend.
    #[serde(default)]
    pub udp: Option<UdpRouterConfig>,

    /// Time UDP sessions get to drain on shutdown, in milliseconds.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            tcp: None,
            udp: None,
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl GatewayConfig {
    /// Check the whole configuration before any socket is bound.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Validation`] describing the first problem found.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.tcp.is_none() && self.udp.is_none() {
            return Err(ConfigError::Validation {
                message: "at least one entrypoint (tcp or udp) is required".to_string(),
            });
        }

        if let Some(tcp) = &self.tcp {
            tcp.validate()
                .map_err(|message| ConfigError::Validation { message })?;
        }
        if let Some(udp) = &self.udp {
            udp.validate()
                .map_err(|message| ConfigError::Validation { message })?;
        }

        Ok(())
    }
}
