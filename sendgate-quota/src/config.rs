//! Engine-wide settings

use chrono::{FixedOffset, Offset, TimeDelta, Utc};
use sendgate_common::RetryConfig;
use serde::{Deserialize, Serialize};

/// Settings shared by every component of the engine
///
/// ```ron
/// (
///     cache_ttl_secs: 300,
///     utc_offset_minutes: 60,
///     rng_seed: Some(7),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long a computed quota may be served from cache
    ///
    /// Default: 300 seconds
    #[serde(default = "defaults::cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Length of the burst window
    ///
    /// Default: 600 seconds
    #[serde(default = "defaults::burst_window_secs")]
    pub burst_window_secs: u64,

    /// Delay reported by a fail-closed quota before the identity is tried again
    ///
    /// Default: 3600 seconds
    #[serde(default = "defaults::fail_closed_retry_secs")]
    pub fail_closed_retry_secs: u64,

    /// Local hour at which identities blocked by daily or domain limits resume
    ///
    /// Default: 9
    #[serde(default = "defaults::resume_hour")]
    pub resume_hour: u32,

    /// Offset of the local timezone used for daily/hourly buckets
    ///
    /// Default: 0 (UTC)
    #[serde(default)]
    pub utc_offset_minutes: i32,

    /// Retry policy used when a caller supplies none
    #[serde(default)]
    pub retry: RetryConfig,

    /// Seed for weighted selection and jitter; `None` seeds from the OS
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: defaults::cache_ttl_secs(),
            burst_window_secs: defaults::burst_window_secs(),
            fail_closed_retry_secs: defaults::fail_closed_retry_secs(),
            resume_hour: defaults::resume_hour(),
            utc_offset_minutes: 0,
            retry: RetryConfig::default(),
            rng_seed: None,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn cache_ttl(&self) -> TimeDelta {
        seconds(self.cache_ttl_secs)
    }

    #[must_use]
    pub fn burst_window(&self) -> TimeDelta {
        seconds(self.burst_window_secs)
    }

    #[must_use]
    pub fn fail_closed_retry(&self) -> TimeDelta {
        seconds(self.fail_closed_retry_secs)
    }

    /// Hour of day identities resume after exhausting a daily limit, capped to 23
    #[must_use]
    pub fn resume_hour(&self) -> u32 {
        self.resume_hour.min(23)
    }

    /// The local timezone; out-of-range offsets fall back to UTC
    #[must_use]
    pub fn offset(&self) -> FixedOffset {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix())
    }
}

fn seconds(secs: u64) -> TimeDelta {
    TimeDelta::try_seconds(i64::try_from(secs).unwrap_or(i64::MAX)).unwrap_or(TimeDelta::MAX)
}

mod defaults {
    pub const fn cache_ttl_secs() -> u64 {
        300 // 5 minutes
    }

    pub const fn burst_window_secs() -> u64 {
        600 // 10 minutes
    }

    pub const fn fail_closed_retry_secs() -> u64 {
        3600 // 1 hour
    }

    pub const fn resume_hour() -> u32 {
        9
    }
}
