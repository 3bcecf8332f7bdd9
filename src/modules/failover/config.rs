//! Failover configuration types.

use serde::{Deserialize, Serialize};

fn default_interval_ms() -> u64 {
    10_000
}

/// Health-check settings for a failover pair.
///
/// Its presence is what arms status propagation; the probing itself is
/// driven externally through the reported statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Expected interval between external status reports, in
    /// milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}
