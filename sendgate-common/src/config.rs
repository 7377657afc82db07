//! Per-identity rate-limit and retry configuration
//!
//! These are plain value objects. Deriving a config for a new identity (the
//! warmup tiers) is the provisioner's job; this module only knows the shape of
//! a config, its bounds, and how a partial update is folded in.

use std::{collections::BTreeSet, time::Duration};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, Validator};

/// Error markers retried by the default policy
pub const DEFAULT_RETRYABLE_ERRORS: [&str; 5] = [
    "RATE_LIMIT_EXCEEDED",
    "TEMPORARY_FAILURE",
    "CONNECTION_ERROR",
    "TIMEOUT",
    "SERVER_ERROR",
];

pub mod bounds {
    pub const DAILY_LIMIT: (u64, u64) = (1, 1000);
    pub const HOURLY_LIMIT: (u64, u64) = (1, 100);
    pub const DOMAIN_DAILY_LIMIT: (u64, u64) = (1, 500);
    pub const WARMUP_DAILY_LIMIT: (u64, u64) = (1, 1000);
    pub const BURST_LIMIT: (u64, u64) = (1, 50);
    /// One minute to one day
    pub const COOLDOWN_SECS: (u64, u64) = (60, 86_400);
    pub const MAX_ATTEMPTS: (u64, u64) = (1, 10);
    /// One millisecond to one hour
    pub const BASE_DELAY_MS: (u64, u64) = (1, 3_600_000);
    /// Upper bound for `max_delay_ms`; the lower bound is the base delay
    pub const MAX_DELAY_MS: u64 = 86_400_000;
}

/// Function mapping a retry attempt number to the delay before it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `base * 2^n`
    #[default]
    Exponential,
    /// `base * (n + 1)`
    Linear,
    /// `base`
    Fixed,
}

/// Retry policy embedded in every [`RateLimitConfig`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts allowed before a send is terminally failed.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub backoff: BackoffStrategy,

    /// Default: 5000 (5 seconds)
    #[serde(default = "defaults::base_delay_ms")]
    pub base_delay_ms: u64,

    /// Caps the computed backoff.
    ///
    /// Default: 300000 (5 minutes)
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,

    /// Markers matched case-insensitively against the reported error
    #[serde(default = "defaults::retryable_errors")]
    pub retryable_errors: BTreeSet<String>,

    /// Scale each delay by a random factor in `[0.5, 1.0]`
    #[serde(default = "defaults::jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            backoff: BackoffStrategy::default(),
            base_delay_ms: defaults::base_delay_ms(),
            max_delay_ms: defaults::max_delay_ms(),
            retryable_errors: defaults::retryable_errors(),
            jitter: defaults::jitter(),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Whether `error` contains any of the retryable markers, ignoring case
    #[must_use]
    pub fn is_retryable(&self, error: &str) -> bool {
        let error = error.to_ascii_uppercase();
        self.retryable_errors
            .iter()
            .any(|marker| !marker.is_empty() && error.contains(&marker.to_ascii_uppercase()))
    }

    /// Backoff before retry number `retry_count` (0-indexed), clamped to
    /// `max_delay`, before any jitter is applied
    #[must_use]
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let base = self.base_delay_ms;
        let millis = match self.backoff {
            BackoffStrategy::Exponential => {
                if retry_count >= 63 {
                    self.max_delay_ms
                } else {
                    base.saturating_mul(1u64 << retry_count)
                }
            }
            BackoffStrategy::Linear => base.saturating_mul(u64::from(retry_count) + 1),
            BackoffStrategy::Fixed => base,
        };

        Duration::from_millis(millis.min(self.max_delay_ms))
    }

    /// Check every bound, reporting all violations together
    ///
    /// # Errors
    /// If any field is outside its permitted range
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut validator = Validator::default();
        self.validate_into(&mut validator);
        validator.finish()
    }

    fn validate_into(&self, validator: &mut Validator) {
        let (min, max) = bounds::MAX_ATTEMPTS;
        validator.check("retry.max_attempts", u64::from(self.max_attempts), min, max);
        let (min, max) = bounds::BASE_DELAY_MS;
        validator.check("retry.base_delay_ms", self.base_delay_ms, min, max);
        validator.check(
            "retry.max_delay_ms",
            self.max_delay_ms,
            self.base_delay_ms,
            bounds::MAX_DELAY_MS,
        );
    }
}

/// Rate limits for one sending identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub daily_limit: u32,
    pub hourly_limit: u32,
    /// Per recipient domain, per day
    pub domain_daily_limit: u32,
    #[serde(default)]
    pub warmup_mode: bool,
    /// Tighter daily cap applied while `warmup_mode` is set
    #[serde(default)]
    pub warmup_daily_limit: Option<u32>,
    /// Sends allowed inside one burst window
    pub burst_limit: u32,
    /// Pause enforced once the burst limit is reached
    pub cooldown_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl RateLimitConfig {
    /// The daily cap actually enforced, taking warmup into account
    #[must_use]
    pub fn effective_daily_limit(&self) -> u32 {
        match self.warmup_daily_limit {
            Some(warmup) if self.warmup_mode => self.daily_limit.min(warmup),
            _ => self.daily_limit,
        }
    }

    #[must_use]
    pub fn cooldown(&self) -> TimeDelta {
        TimeDelta::try_seconds(i64::try_from(self.cooldown_secs).unwrap_or(i64::MAX))
            .unwrap_or(TimeDelta::MAX)
    }

    /// Check every bound, including the embedded retry policy
    ///
    /// # Errors
    /// If any field is outside its permitted range
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut validator = Validator::default();

        let (min, max) = bounds::DAILY_LIMIT;
        validator.check("daily_limit", u64::from(self.daily_limit), min, max);
        let (min, max) = bounds::HOURLY_LIMIT;
        validator.check("hourly_limit", u64::from(self.hourly_limit), min, max);
        let (min, max) = bounds::DOMAIN_DAILY_LIMIT;
        validator.check(
            "domain_daily_limit",
            u64::from(self.domain_daily_limit),
            min,
            max,
        );
        if let Some(warmup) = self.warmup_daily_limit {
            let (min, max) = bounds::WARMUP_DAILY_LIMIT;
            validator.check("warmup_daily_limit", u64::from(warmup), min, max);
        }
        let (min, max) = bounds::BURST_LIMIT;
        validator.check("burst_limit", u64::from(self.burst_limit), min, max);
        let (min, max) = bounds::COOLDOWN_SECS;
        validator.check("cooldown_secs", self.cooldown_secs, min, max);

        self.retry.validate_into(&mut validator);

        validator.finish()
    }

    /// Fold a partial update into a copy of this config
    ///
    /// The result is not validated; callers check it before storing.
    #[must_use]
    pub fn patched(&self, patch: &RateLimitConfigPatch) -> Self {
        Self {
            daily_limit: patch.daily_limit.unwrap_or(self.daily_limit),
            hourly_limit: patch.hourly_limit.unwrap_or(self.hourly_limit),
            domain_daily_limit: patch.domain_daily_limit.unwrap_or(self.domain_daily_limit),
            warmup_mode: patch.warmup_mode.unwrap_or(self.warmup_mode),
            warmup_daily_limit: patch.warmup_daily_limit.unwrap_or(self.warmup_daily_limit),
            burst_limit: patch.burst_limit.unwrap_or(self.burst_limit),
            cooldown_secs: patch.cooldown_secs.unwrap_or(self.cooldown_secs),
            retry: patch.retry.clone().unwrap_or_else(|| self.retry.clone()),
        }
    }
}

/// A partial update to a [`RateLimitConfig`]
///
/// `None` leaves a field untouched. `warmup_daily_limit: Some(None)` removes
/// the warmup cap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfigPatch {
    pub daily_limit: Option<u32>,
    pub hourly_limit: Option<u32>,
    pub domain_daily_limit: Option<u32>,
    pub warmup_mode: Option<bool>,
    pub warmup_daily_limit: Option<Option<u32>>,
    pub burst_limit: Option<u32>,
    pub cooldown_secs: Option<u64>,
    pub retry: Option<RetryConfig>,
}

mod defaults {
    use std::collections::BTreeSet;

    pub const fn max_attempts() -> u32 {
        3
    }

    pub const fn base_delay_ms() -> u64 {
        5_000 // 5 seconds
    }

    pub const fn max_delay_ms() -> u64 {
        300_000 // 5 minutes
    }

    pub fn retryable_errors() -> BTreeSet<String> {
        super::DEFAULT_RETRYABLE_ERRORS
            .iter()
            .map(|marker| (*marker).to_string())
            .collect()
    }

    pub const fn jitter() -> bool {
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn warmed() -> RateLimitConfig {
        RateLimitConfig {
            daily_limit: 50,
            hourly_limit: 12,
            domain_daily_limit: 10,
            warmup_mode: false,
            warmup_daily_limit: None,
            burst_limit: 8,
            cooldown_secs: 300,
            retry: RetryConfig::default(),
        }
    }

    #[test]
    fn test_cooldown_saturates_out_of_range_values() {
        let mut config = warmed();
        assert_eq!(config.cooldown(), TimeDelta::minutes(5));

        config.cooldown_secs = 100_000_000_000_000_000;
        assert_eq!(config.cooldown(), TimeDelta::MAX);

        config.cooldown_secs = u64::MAX;
        assert_eq!(config.cooldown(), TimeDelta::MAX);
    }

    #[test]
    fn test_retry_config_defaults() {
        let retry = RetryConfig::default();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.backoff, BackoffStrategy::Exponential);
        assert_eq!(retry.base_delay(), Duration::from_secs(5));
        assert_eq!(retry.max_delay(), Duration::from_secs(300));
        assert_eq!(retry.retryable_errors.len(), 5);
        assert!(retry.jitter);
    }

    #[test]
    fn test_retryable_matching_ignores_case() {
        let retry = RetryConfig::default();
        assert!(retry.is_retryable("TIMEOUT"));
        assert!(retry.is_retryable("timeout"));
        assert!(retry.is_retryable("smtp: Connection_Error while reading banner"));
        assert!(!retry.is_retryable("INVALID_RECIPIENT"));
        assert!(!retry.is_retryable(""));
    }

    #[test]
    fn test_delay_for_each_strategy() {
        let mut retry = RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        };

        assert_eq!(retry.delay_for(0), Duration::from_secs(5));
        assert_eq!(retry.delay_for(1), Duration::from_secs(10));
        assert_eq!(retry.delay_for(2), Duration::from_secs(20));
        // 5s * 2^6 = 320s, clamped to 300s
        assert_eq!(retry.delay_for(6), Duration::from_secs(300));
        assert_eq!(retry.delay_for(200), Duration::from_secs(300));

        retry.backoff = BackoffStrategy::Linear;
        assert_eq!(retry.delay_for(0), Duration::from_secs(5));
        assert_eq!(retry.delay_for(3), Duration::from_secs(20));

        retry.backoff = BackoffStrategy::Fixed;
        assert_eq!(retry.delay_for(0), Duration::from_secs(5));
        assert_eq!(retry.delay_for(9), Duration::from_secs(5));
    }

    #[test]
    fn test_effective_daily_limit_respects_warmup() {
        let mut config = warmed();
        assert_eq!(config.effective_daily_limit(), 50);

        config.warmup_daily_limit = Some(15);
        assert_eq!(config.effective_daily_limit(), 50, "warmup cap ignored outside warmup");

        config.warmup_mode = true;
        assert_eq!(config.effective_daily_limit(), 15);

        config.warmup_daily_limit = Some(80);
        assert_eq!(config.effective_daily_limit(), 50);
    }

    #[test]
    fn test_validate_reports_all_offending_fields() {
        let mut config = warmed();
        config.daily_limit = 0;
        config.hourly_limit = 101;
        config.cooldown_secs = 5;
        config.retry.max_attempts = 11;

        let err = config.validate().unwrap_err();
        assert_eq!(
            err.fields(),
            vec![
                "daily_limit",
                "hourly_limit",
                "cooldown_secs",
                "retry.max_attempts"
            ]
        );
    }

    #[test]
    fn test_validate_rejects_max_delay_below_base() {
        let retry = RetryConfig {
            base_delay_ms: 10_000,
            max_delay_ms: 5_000,
            ..RetryConfig::default()
        };
        assert_eq!(retry.validate().unwrap_err().fields(), vec!["retry.max_delay_ms"]);
    }

    #[test]
    fn test_patch_applies_only_present_fields() {
        let config = RateLimitConfig {
            warmup_mode: true,
            warmup_daily_limit: Some(30),
            ..warmed()
        };

        let patched = config.patched(&RateLimitConfigPatch {
            hourly_limit: Some(20),
            warmup_daily_limit: Some(None),
            ..RateLimitConfigPatch::default()
        });

        assert_eq!(patched.hourly_limit, 20);
        assert_eq!(patched.warmup_daily_limit, None);
        assert_eq!(patched.daily_limit, 50);
        assert!(patched.warmup_mode);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: RateLimitConfig = ron::from_str(
            "(daily_limit: 40, hourly_limit: 8, domain_daily_limit: 5, burst_limit: 5, cooldown_secs: 600)",
        )
        .unwrap();

        assert!(!config.warmup_mode);
        assert_eq!(config.warmup_daily_limit, None);
        assert_eq!(config.retry, RetryConfig::default());
        assert!(config.validate().is_ok());
    }
}
