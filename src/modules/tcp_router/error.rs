//! Error types for the TCP router.

use thiserror::Error;

/// Result alias for rule parsing and route registration.
pub type RuleResult<T> = Result<T, RuleError>;

/// Errors raised while building a routing rule.
///
/// All of these are configuration-time errors: a rule that parses never
/// fails at match time.
#[derive(Debug, Error)]
pub enum RuleError {
    /// The rule expression is syntactically malformed.
    #[error("rule syntax error: {message}")]
    Syntax { message: String },

    /// The rule names a matcher this router does not know.
    #[error("unknown matcher: {name}")]
    UnknownMatcher { name: String },

    /// A matcher was given no usable arguments.
    #[error("matcher {matcher} requires at least one non-empty argument")]
    EmptyArgs { matcher: &'static str },

    /// A `HostSNI` argument is not a routable host name.
    #[error("invalid HostSNI host: {host:?}")]
    InvalidHost { host: String },

    /// A `ClientIP` argument is neither an IP literal nor a CIDR block.
    #[error("invalid ClientIP address or CIDR: {value:?}")]
    InvalidIp { value: String },
}
