//! Admission decisions: resolve the caller's bucket, then spend from it.

use crate::bucket::TokenBucket;
use crate::clock::{Clock, MonotonicClock};
use crate::config::RateLimitConfig;
use crate::registry::BucketRegistry;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// The decision returned by a rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Allowed {
        /// Whole tokens left after this request.
        /// Useful for `X-RateLimit-Remaining` headers.
        remaining: u64,
    },
    /// The request is rejected.
    Denied {
        /// How long until the requested cost could be covered, or `None` when
        /// it exceeds the bucket capacity. Useful for `Retry-After` headers.
        retry_after: Option<Duration>,
    },
}

impl Decision {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Quota to report to the caller; always 0 for a denial.
    pub fn remaining(&self) -> u64 {
        match self {
            Decision::Allowed { remaining } => *remaining,
            Decision::Denied { .. } => 0,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Decision::Denied { retry_after } => *retry_after,
            Decision::Allowed { .. } => None,
        }
    }
}

/// Per-identity admission interface used by the middleware.
pub trait RateLimiter: Send + Sync {
    /// Spend `cost` tokens from `identity`'s quota if available.
    fn admit(&self, identity: &str, cost: f64) -> Decision;
}

impl<L: RateLimiter + ?Sized> RateLimiter for Arc<L> {
    fn admit(&self, identity: &str, cost: f64) -> Decision {
        (**self).admit(identity, cost)
    }
}

/// Token-bucket limiter owning its own registry.
///
/// Every instance is independent: two limiters never share buckets.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    registry: Arc<BucketRegistry>,
    config: RateLimitConfig,
}

impl TokenBucketLimiter {
    /// Create a limiter measuring refill with a [`MonotonicClock`].
    ///
    /// # Examples
    /// ```
    /// use bucketgate::{RateLimitConfig, RateLimiter, TokenBucketLimiter};
    /// let limiter = TokenBucketLimiter::new(RateLimitConfig::new(2.0, 1.0).unwrap());
    /// assert!(limiter.admit("10.0.0.1", 1.0).is_allowed());
    /// assert!(limiter.admit("10.0.0.1", 1.0).is_allowed());
    /// assert!(!limiter.admit("10.0.0.1", 1.0).is_allowed());
    /// ```
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, MonotonicClock::default())
    }

    /// Create a limiter with a custom clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(config: RateLimitConfig, clock: C) -> Self {
        Self { registry: Arc::new(BucketRegistry::new(Arc::new(clock))), config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<BucketRegistry> {
        &self.registry
    }

    /// Start the idle sweep configured by [`RateLimitConfig::idle_eviction`] on
    /// the current tokio runtime.
    ///
    /// Returns `None` when eviction is not configured. The task ends on its own
    /// once the limiter is dropped; abort the handle to stop it earlier.
    pub fn spawn_sweeper(&self) -> Option<JoinHandle<()>> {
        let eviction = self.config.idle_eviction()?;
        let registry: Weak<BucketRegistry> = Arc::downgrade(&self.registry);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(eviction.sweep_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    debug!(target: "bucketgate::limiter", "limiter dropped; idle sweep stopping");
                    break;
                };
                registry.evict_idle(eviction.idle_after());
            }
        }))
    }

    fn bucket(&self, identity: &str) -> Arc<TokenBucket> {
        self.registry.get_or_create(identity, self.config.bucket())
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn admit(&self, identity: &str, cost: f64) -> Decision {
        let bucket = self.bucket(identity);
        let admission = bucket.try_consume(cost);

        if admission.admitted {
            let remaining = admission.remaining_whole();
            debug!(target: "bucketgate::limiter", identity, remaining, "request admitted");
            Decision::Allowed { remaining }
        } else {
            let retry_after = bucket.time_until(cost, admission.remaining);
            info!(target: "bucketgate::limiter", identity, ?retry_after, "rate limit exceeded");
            Decision::Denied { retry_after }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(max_tokens: f64, refill_rate: f64) -> (TokenBucketLimiter, ManualClock) {
        let clock = ManualClock::new();
        let config = RateLimitConfig::new(max_tokens, refill_rate).unwrap();
        (TokenBucketLimiter::with_clock(config, clock.clone()), clock)
    }

    #[test]
    fn burst_then_refill_scenario() {
        let (limiter, clock) = limiter(5.0, 1.0);
        for expected in (0..5).rev() {
            assert_eq!(limiter.admit("A", 1.0), Decision::Allowed { remaining: expected });
        }
        let denied = limiter.admit("A", 1.0);
        assert!(!denied.is_allowed());
        assert_eq!(denied.remaining(), 0);
        assert_eq!(denied.retry_after(), Some(Duration::from_secs(1)));

        clock.advance(Duration::from_secs(3));
        assert_eq!(limiter.admit("A", 1.0), Decision::Allowed { remaining: 2 });
    }

    #[test]
    fn slow_refill_scenario() {
        let (limiter, clock) = limiter(1.0, 0.5);
        assert_eq!(limiter.admit("B", 1.0), Decision::Allowed { remaining: 0 });
        let denied = limiter.admit("B", 1.0);
        assert_eq!(denied.retry_after(), Some(Duration::from_secs(2)));
        clock.advance(Duration::from_secs(2));
        assert_eq!(limiter.admit("B", 1.0), Decision::Allowed { remaining: 0 });
    }

    #[test]
    fn cost_above_capacity_has_no_retry_hint() {
        let (limiter, _) = limiter(3.0, 1.0);
        let denied = limiter.admit("big", 4.0);
        assert_eq!(denied, Decision::Denied { retry_after: None });
        // the failed attempt spent nothing
        assert_eq!(limiter.admit("big", 3.0), Decision::Allowed { remaining: 0 });
    }

    #[test]
    fn denial_with_tiny_refill_rate_has_no_retry_hint() {
        let (limiter, _) = limiter(1.0, 1e-20);
        assert_eq!(limiter.admit("slow", 1.0), Decision::Allowed { remaining: 0 });
        assert_eq!(limiter.admit("slow", 1.0), Decision::Denied { retry_after: None });
    }

    #[test]
    fn limiters_do_not_share_state() {
        let (a, _) = limiter(1.0, 1.0);
        let (b, _) = limiter(1.0, 1.0);
        assert!(a.admit("same", 1.0).is_allowed());
        assert!(!a.admit("same", 1.0).is_allowed());
        assert!(b.admit("same", 1.0).is_allowed());
    }

    #[test]
    fn arc_limiter_delegates() {
        let (limiter, _) = limiter(1.0, 1.0);
        let shared: Arc<dyn RateLimiter> = Arc::new(limiter);
        assert!(shared.admit("x", 1.0).is_allowed());
        assert!(!shared.admit("x", 1.0).is_allowed());
    }

    #[test]
    fn no_sweeper_without_eviction_config() {
        let (limiter, _) = limiter(1.0, 1.0);
        assert!(limiter.spawn_sweeper().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_idle_buckets() {
        let clock = ManualClock::new();
        let config = RateLimitConfig::builder()
            .max_tokens(2.0)
            .refill_rate(1.0)
            .evict_idle(Duration::from_secs(1), Duration::from_secs(10))
            .build()
            .unwrap();
        let limiter = TokenBucketLimiter::with_clock(config, clock.clone());
        let handle = limiter.spawn_sweeper().expect("eviction configured");

        assert!(limiter.admit("idle", 1.0).is_allowed());
        assert_eq!(limiter.registry().len(), 1);

        clock.advance(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(15)).await;
        tokio::task::yield_now().await;

        assert!(limiter.registry().is_empty());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_when_limiter_dropped() {
        let config = RateLimitConfig::builder()
            .evict_idle(Duration::from_secs(1), Duration::from_secs(1))
            .build()
            .unwrap();
        let limiter = TokenBucketLimiter::with_clock(config, ManualClock::new());
        let handle = limiter.spawn_sweeper().expect("eviction configured");
        drop(limiter);
        tokio::time::sleep(Duration::from_secs(2)).await;
        handle.await.expect("sweeper exits cleanly");
    }
}
