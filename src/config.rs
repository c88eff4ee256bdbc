//! Validated limiter configuration.
//!
//! Configuration is fixed at construction; a limiter never re-reads it.

use crate::error::ConfigError;
use std::time::Duration;

/// How fractional refill is applied to a bucket balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RefillRounding {
    /// Round `tokens + refill` to the nearest whole token on every refill.
    ///
    /// Balances stay whole (unless a fractional cost is debited). Refill that
    /// rounds down is discarded, so callers polling faster than
    /// `0.5 / refill_rate` seconds never see it accumulate.
    #[default]
    Round,
    /// Keep the exact fractional balance; round only when reporting.
    Fractional,
}

impl RefillRounding {
    pub(crate) fn apply(self, tokens: f64) -> f64 {
        match self {
            RefillRounding::Round => tokens.round(),
            RefillRounding::Fractional => tokens,
        }
    }
}

/// Background removal of idle buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleEviction {
    idle_after: Duration,
    sweep_interval: Duration,
}

impl IdleEviction {
    /// Evict buckets idle for at least `idle_after`, checking every `sweep_interval`.
    pub fn new(idle_after: Duration, sweep_interval: Duration) -> Result<Self, ConfigError> {
        if idle_after.is_zero() {
            return Err(ConfigError::InvalidIdleTimeout(idle_after));
        }
        if sweep_interval.is_zero() {
            return Err(ConfigError::InvalidSweepInterval(sweep_interval));
        }
        Ok(Self { idle_after, sweep_interval })
    }

    pub fn idle_after(&self) -> Duration {
        self.idle_after
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }
}

/// Parameters used to create a single bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketConfig {
    pub(crate) max_tokens: f64,
    pub(crate) refill_rate: f64,
    pub(crate) rounding: RefillRounding,
}

impl BucketConfig {
    /// Create a bucket config with validation.
    pub fn new(max_tokens: f64, refill_rate: f64) -> Result<Self, ConfigError> {
        if !(max_tokens.is_finite() && max_tokens > 0.0) {
            return Err(ConfigError::InvalidMaxTokens { provided: max_tokens });
        }
        if !(refill_rate.is_finite() && refill_rate > 0.0) {
            return Err(ConfigError::InvalidRefillRate { provided: refill_rate });
        }
        Ok(Self { max_tokens, refill_rate, rounding: RefillRounding::default() })
    }

    /// Override the refill rounding policy.
    pub fn with_rounding(mut self, rounding: RefillRounding) -> Self {
        self.rounding = rounding;
        self
    }

    /// Burst capacity.
    pub fn max_tokens(&self) -> f64 {
        self.max_tokens
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    pub fn rounding(&self) -> RefillRounding {
        self.rounding
    }

    /// Time an empty bucket needs to refill completely, saturating at
    /// [`Duration::MAX`] for very slow rates.
    pub fn time_to_full(&self) -> Duration {
        Duration::try_from_secs_f64(self.max_tokens / self.refill_rate).unwrap_or(Duration::MAX)
    }
}

/// Service-wide limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RateLimitSettings"))]
pub struct RateLimitConfig {
    bucket: BucketConfig,
    idle_eviction: Option<IdleEviction>,
}

impl RateLimitConfig {
    /// Create a config with validation; rounding defaults to [`RefillRounding::Round`]
    /// and no idle eviction.
    ///
    /// # Examples
    /// ```
    /// use bucketgate::RateLimitConfig;
    /// let config = RateLimitConfig::new(5.0, 1.0).unwrap();
    /// assert_eq!(config.bucket().max_tokens(), 5.0);
    /// assert!(RateLimitConfig::new(0.0, 1.0).is_err());
    /// ```
    pub fn new(max_tokens: f64, refill_rate: f64) -> Result<Self, ConfigError> {
        Ok(Self { bucket: BucketConfig::new(max_tokens, refill_rate)?, idle_eviction: None })
    }

    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::new()
    }

    /// Parameters for newly created buckets.
    pub fn bucket(&self) -> &BucketConfig {
        &self.bucket
    }

    pub fn idle_eviction(&self) -> Option<IdleEviction> {
        self.idle_eviction
    }
}

/// Builder for [`RateLimitConfig`].
#[derive(Debug, Clone)]
pub struct RateLimitConfigBuilder {
    max_tokens: f64,
    refill_rate: f64,
    rounding: RefillRounding,
    idle_eviction: Option<(Duration, Duration)>,
}

impl RateLimitConfigBuilder {
    /// Create a builder with defaults of 10 tokens refilled at 1 token per second.
    pub fn new() -> Self {
        Self {
            max_tokens: 10.0,
            refill_rate: 1.0,
            rounding: RefillRounding::default(),
            idle_eviction: None,
        }
    }

    /// Burst capacity. Must be finite and > 0.
    pub fn max_tokens(mut self, max_tokens: f64) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Tokens per second. Must be finite and > 0.
    pub fn refill_rate(mut self, refill_rate: f64) -> Self {
        self.refill_rate = refill_rate;
        self
    }

    pub fn rounding(mut self, rounding: RefillRounding) -> Self {
        self.rounding = rounding;
        self
    }

    /// Enable the idle sweep.
    pub fn evict_idle(mut self, idle_after: Duration, sweep_interval: Duration) -> Self {
        self.idle_eviction = Some((idle_after, sweep_interval));
        self
    }

    /// Build the config, validating inputs.
    pub fn build(self) -> Result<RateLimitConfig, ConfigError> {
        let bucket =
            BucketConfig::new(self.max_tokens, self.refill_rate)?.with_rounding(self.rounding);
        let idle_eviction = self
            .idle_eviction
            .map(|(idle_after, sweep_interval)| IdleEviction::new(idle_after, sweep_interval))
            .transpose()?;
        Ok(RateLimitConfig { bucket, idle_eviction })
    }
}

impl Default for RateLimitConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Unvalidated, deserializable form of [`RateLimitConfig`].
#[cfg(feature = "serde")]
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSettings {
    pub max_tokens: f64,
    pub refill_rate: f64,
    #[serde(default)]
    pub rounding: RefillRounding,
    #[serde(default)]
    pub idle_eviction: Option<IdleEvictionSettings>,
}

/// Idle sweep settings in whole seconds.
#[cfg(feature = "serde")]
#[derive(Debug, Clone, Copy, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdleEvictionSettings {
    pub idle_after_secs: u64,
    pub sweep_interval_secs: u64,
}

#[cfg(feature = "serde")]
impl TryFrom<RateLimitSettings> for RateLimitConfig {
    type Error = ConfigError;

    fn try_from(raw: RateLimitSettings) -> Result<Self, Self::Error> {
        let mut builder = RateLimitConfig::builder()
            .max_tokens(raw.max_tokens)
            .refill_rate(raw.refill_rate)
            .rounding(raw.rounding);
        if let Some(idle) = raw.idle_eviction {
            builder = builder.evict_idle(
                Duration::from_secs(idle.idle_after_secs),
                Duration::from_secs(idle.sweep_interval_secs),
            );
        }
        builder.build()
    }
}
