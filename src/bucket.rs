//! Per-identity token bucket.
//!
//! A bucket refills lazily: nothing runs in the background, the balance is
//! brought up to date inside [`TokenBucket::try_consume`] under the same lock
//! that guards the debit.

use crate::clock::{elapsed_secs, Clock};
use crate::config::BucketConfig;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Outcome of a single [`TokenBucket::try_consume`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    /// Whether the cost was debited.
    pub admitted: bool,
    /// Balance after the call.
    pub remaining: f64,
}

impl Admission {
    /// Remaining balance as a whole number of tokens (truncated), for headers.
    pub fn remaining_whole(&self) -> u64 {
        // `as` saturates and maps NaN to 0.
        self.remaining.max(0.0) as u64
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill_nanos: u64,
}

/// Token balance for one client identity.
///
/// Invariant: after any call returns, `0 <= tokens <= max_tokens`.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    config: BucketConfig,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// Create a full bucket whose refill is measured from the clock's current reading.
    pub fn new(config: BucketConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_nanos();
        Self {
            state: Mutex::new(BucketState { tokens: config.max_tokens, last_refill_nanos: now }),
            config,
            clock,
        }
    }

    /// Refill for the time elapsed since the last call, then debit `cost` if
    /// the balance covers it.
    ///
    /// Refill, check and debit happen under one lock, so two concurrent callers
    /// can never both spend the same token. Negative, NaN or infinite costs are
    /// rejected and leave the balance untouched.
    pub fn try_consume(&self, cost: f64) -> Admission {
        let mut state = self.lock();
        let now = self.clock.now_nanos();
        self.refill(&mut state, now);

        if !(cost.is_finite() && cost >= 0.0) {
            return Admission { admitted: false, remaining: state.tokens };
        }

        if cost <= state.tokens {
            state.tokens -= cost;
            Admission { admitted: true, remaining: state.tokens }
        } else {
            Admission { admitted: false, remaining: state.tokens }
        }
    }

    /// Balance as of the last refill. Does not refill.
    pub fn tokens(&self) -> f64 {
        self.lock().tokens
    }

    /// Time since the last admission check.
    pub fn idle_for(&self) -> Duration {
        let last = self.lock().last_refill_nanos;
        Duration::from_nanos(self.clock.now_nanos().saturating_sub(last))
    }

    pub fn max_tokens(&self) -> f64 {
        self.config.max_tokens
    }

    pub fn refill_rate(&self) -> f64 {
        self.config.refill_rate
    }

    /// Time until `cost` tokens could be available given the current balance.
    ///
    /// `None` if `cost` exceeds the capacity and can never be admitted, or if
    /// the wait is too long to express as a [`Duration`].
    pub fn time_until(&self, cost: f64, balance: f64) -> Option<Duration> {
        if !(cost.is_finite() && cost >= 0.0) || cost > self.config.max_tokens {
            return None;
        }
        let deficit = (cost - balance).max(0.0);
        Duration::try_from_secs_f64(deficit / self.config.refill_rate).ok()
    }

    /// True when the bucket has been idle for `idle_after` and a refill now
    /// would top it up completely, making it indistinguishable from a new one.
    pub(crate) fn is_evictable(&self, idle_after: Duration) -> bool {
        let state = self.lock();
        let now = self.clock.now_nanos();
        let idle = Duration::from_nanos(now.saturating_sub(state.last_refill_nanos));
        if idle < idle_after {
            return false;
        }
        let refilled =
            state.tokens + self.config.refill_rate * elapsed_secs(state.last_refill_nanos, now);
        self.config.rounding.apply(refilled) >= self.config.max_tokens
    }

    fn refill(&self, state: &mut BucketState, now: u64) {
        let tokens_to_add = self.config.refill_rate * elapsed_secs(state.last_refill_nanos, now);
        state.tokens =
            self.config.rounding.apply(state.tokens + tokens_to_add).min(self.config.max_tokens);
        state.last_refill_nanos = state.last_refill_nanos.max(now);
    }

    // Balance and timestamp are plain numbers, valid after any completed write.
    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
