//! Configuration file loading.

use tracing::debug;

use super::error::{ConfigError, ConfigResult};
use super::types::GatewayConfig;

/// Read, parse, and validate a JSON configuration file.
///
/// # Errors
///
/// I/O, parse, or validation errors, each identifying the offending
/// file or setting.
pub async fn load_config(path: &str) -> ConfigResult<GatewayConfig> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Io {
            path: path.to_string(),
            source: e,
        })?;

    let config: GatewayConfig = serde_json::from_str(&raw)?;
    config.validate()?;

    debug!(path = %path, "configuration loaded");
    Ok(config)
}
