//! Error types for failover dispatch.

use thiserror::Error;

/// Result alias for failover operations.
pub type FailoverResult<T> = Result<T, FailoverError>;

/// Errors raised by a failover pair.
#[derive(Debug, Error)]
pub enum FailoverError {
    /// Status updaters only make sense when the pair was built with
    /// health checking; without it no status changes ever arrive.
    #[error("cannot register a status updater: health checking is not configured")]
    HealthCheckDisabled,
}
