//! Configuration error types.

use std::io;

use thiserror::Error;

/// Result alias for configuration loading and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating gateway configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration or TLS material file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid JSON for the schema.
    #[error("failed to parse configuration: {source}")]
    Parse {
        #[from]
        source: serde_json::Error,
    },

    /// The configuration parsed but describes an unusable gateway.
    #[error("invalid configuration: {message}")]
    Validation { message: String },

    /// TLS certificate or key material could not be assembled.
    #[error("tls material error: {message}")]
    Tls { message: String },
}
