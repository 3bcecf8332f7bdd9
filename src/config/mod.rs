//! Gateway configuration: types, JSON loading, and TLS material.

pub mod error;
pub mod loader;
pub mod tls;
pub mod types;

pub use error::{ConfigError, ConfigResult};
pub use loader::load_config;
pub use tls::load_server_config;
pub use types::GatewayConfig;
