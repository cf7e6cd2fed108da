//! Startup error types.
//!
//! Request-scoped failures never surface here: they are mapped to HTTP
//! responses inside the gateway. These errors only abort process startup.

use thiserror::Error;

/// Configuration errors raised while reading the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable is present but its value cannot be parsed.
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    /// A variable parsed but is outside its accepted range.
    #[error("{key} out of range: {reason}")]
    OutOfRange { key: &'static str, reason: String },
}

/// Errors raised while registering routes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("route prefix must not be empty")]
    EmptyPrefix,

    #[error("route prefix {0:?} must start with '/'")]
    RelativePrefix(String),

    #[error("route prefix '/' would shadow the gateway's own endpoints")]
    RootPrefix,

    #[error("upstream target for {prefix} must not be empty")]
    EmptyTarget { prefix: String },

    #[error("invalid upstream target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },
}
