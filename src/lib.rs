#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # bucketgate
//!
//! Per-client token-bucket rate limiting for tower HTTP services.
//!
//! Every client identity (by default the peer IP) gets its own bucket holding
//! up to `max_tokens` tokens, refilled continuously at `refill_rate` tokens per
//! second. Each request spends one token; a request that finds the bucket empty
//! is answered with `429 Too Many Requests`.
//!
//! ## Features
//!
//! - **Lazy refill**: no timers per bucket, the balance is recomputed on use
//! - **Per-bucket locking**: distinct clients never contend on one lock
//! - **Single creation**: concurrent first requests share one bucket
//! - **Idle sweep**: optional background removal of forgotten clients
//! - **Tower middleware** over `http` requests and responses
//!
//! ## Quick Start
//!
//! ```rust
//! use bucketgate::{Decision, RateLimitConfig, RateLimiter, TokenBucketLimiter};
//!
//! let config = RateLimitConfig::new(5.0, 1.0).expect("valid config");
//! let limiter = TokenBucketLimiter::new(config);
//!
//! for _ in 0..5 {
//!     assert!(limiter.admit("203.0.113.9", 1.0).is_allowed());
//! }
//! assert!(matches!(limiter.admit("203.0.113.9", 1.0), Decision::Denied { .. }));
//! ```
//!
//! Wrapping a service:
//!
//! ```rust
//! use bucketgate::{RateLimitConfig, RateLimitLayer, TokenBucketLimiter};
//! use tower_layer::Layer;
//!
//! #[derive(Clone)]
//! struct Handler;
//!
//! let limiter = TokenBucketLimiter::new(RateLimitConfig::new(100.0, 10.0).unwrap());
//! let _service = RateLimitLayer::new(limiter).layer(Handler);
//! ```

pub mod bucket;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod limiter;
pub mod middleware;
pub mod registry;

// Re-exports
pub use bucket::{Admission, TokenBucket};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{
    BucketConfig, IdleEviction, RateLimitConfig, RateLimitConfigBuilder, RefillRounding,
};
pub use error::{ConfigError, IdentityError};
pub use identity::{IdentityExtractor, PeerIp, RemoteAddr};
pub use limiter::{Decision, RateLimiter, TokenBucketLimiter};
pub use middleware::{RateLimitLayer, RateLimitService, X_RATELIMIT_REMAINING};
pub use registry::BucketRegistry;
