//! Error types for limiter configuration and identity resolution.
//!
//! Admission itself never fails; these errors cover the edges around it.
use std::time::Duration;

/// Errors produced when validating limiter configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Burst capacity must be finite and > 0.
    #[error("max_tokens must be finite and > 0 (got {provided})")]
    InvalidMaxTokens {
        /// Value provided by caller.
        provided: f64,
    },
    /// Refill rate must be finite and > 0.
    #[error("refill_rate must be finite and > 0 (got {provided})")]
    InvalidRefillRate {
        /// Value provided by caller.
        provided: f64,
    },
    /// Idle eviction threshold must be > 0.
    #[error("idle eviction threshold must be > 0 (got {0:?})")]
    InvalidIdleTimeout(Duration),
    /// Sweep interval must be > 0.
    #[error("sweep interval must be > 0 (got {0:?})")]
    InvalidSweepInterval(Duration),
}

/// Failure to derive a client identity from request metadata.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The transport did not attach a peer socket address to the request.
    #[error("request carries no peer address")]
    MissingPeerAddr,
    /// A remote address string could not be split into host and port.
    #[error("unable to parse remote address '{addr}'")]
    InvalidRemoteAddr {
        /// Raw address as received.
        addr: String,
    },
    /// The extractor produced an empty key.
    #[error("resolved identity is empty")]
    EmptyIdentity,
}
