//! Retry scheduling with backoff and jitter

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use sendgate_common::{Clock, Domain, Priority, RetryConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use ulid::Ulid;

use crate::SharedRng;

/// Where a [`SendRequest`] is in its lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    #[default]
    Pending,
    Attempted,
    Sent,
    Failed,
}

/// A message waiting to be sent, or being retried
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub id: Ulid,
    pub recipient_domain: Domain,
    #[serde(default)]
    pub priority: Priority,
    /// Retries scheduled so far; the first attempt is not a retry
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub status: SendStatus,
}

impl SendRequest {
    #[must_use]
    pub fn new(recipient_domain: Domain, priority: Priority, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            id: Ulid::new(),
            recipient_domain,
            priority,
            retry_count: 0,
            last_error: None,
            scheduled_at,
            status: SendStatus::Pending,
        }
    }

    pub const fn mark_attempted(&mut self) {
        self.status = SendStatus::Attempted;
    }

    pub const fn mark_sent(&mut self) {
        self.status = SendStatus::Sent;
    }

    /// Sent, or failed with no retry left
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.status, SendStatus::Sent | SendStatus::Failed)
    }
}

/// Why a failed send will not be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The error matched none of the retryable markers
    NonRetryable,
    /// `max_attempts` retries were already scheduled
    RetriesExhausted,
}

impl FailureReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NonRetryable => "non_retryable",
            Self::RetriesExhausted => "retries_exhausted",
        }
    }
}

/// Outcome of [`RetryScheduler::schedule_retry`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub retry_at: Option<DateTime<Utc>>,
    /// Delay actually applied, after jitter
    pub delay: Option<Duration>,
    pub final_failure: bool,
    pub reason: Option<FailureReason>,
}

impl RetryDecision {
    const fn retry(retry_at: DateTime<Utc>, delay: Duration) -> Self {
        Self {
            should_retry: true,
            retry_at: Some(retry_at),
            delay: Some(delay),
            final_failure: false,
            reason: None,
        }
    }

    const fn terminal(reason: FailureReason) -> Self {
        Self {
            should_retry: false,
            retry_at: None,
            delay: None,
            final_failure: true,
            reason: Some(reason),
        }
    }
}

/// Decides whether and when failed sends are retried
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    clock: Arc<dyn Clock>,
    rng: SharedRng,
    default_policy: RetryConfig,
}

impl RetryScheduler {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, rng: SharedRng, default_policy: RetryConfig) -> Self {
        Self {
            clock,
            rng,
            default_policy,
        }
    }

    /// Decide what happens to `request` after it failed with `error`
    ///
    /// The request is updated in place: rescheduled and back to pending on
    /// retry, or failed on a terminal decision. `policy` falls back to the
    /// scheduler's default policy.
    pub fn schedule_retry(
        &self,
        request: &mut SendRequest,
        error: &str,
        policy: Option<&RetryConfig>,
    ) -> RetryDecision {
        let policy = policy.unwrap_or(&self.default_policy);
        request.last_error = Some(error.to_owned());

        let reason = if !policy.is_retryable(error) {
            Some(FailureReason::NonRetryable)
        } else if request.retry_count >= policy.max_attempts {
            Some(FailureReason::RetriesExhausted)
        } else {
            None
        };

        if let Some(reason) = reason {
            request.status = SendStatus::Failed;

            info!(
                request = %request.id,
                domain = %request.recipient_domain,
                retry_count = request.retry_count,
                reason = reason.as_str(),
                error,
                "Send failed permanently"
            );
            if let Some(metrics) = sendgate_metrics::try_metrics() {
                metrics.dispatch.record_final_failure(reason.as_str());
            }

            return RetryDecision::terminal(reason);
        }

        let delay = self.jittered(policy, policy.delay_for(request.retry_count));
        let now = self.clock.now();
        let retry_at = TimeDelta::from_std(delay)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        request.retry_count += 1;
        request.scheduled_at = retry_at;
        request.status = SendStatus::Pending;

        debug!(
            request = %request.id,
            domain = %request.recipient_domain,
            retry_count = request.retry_count,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            retry_at = %retry_at,
            "Scheduled retry"
        );
        if let Some(metrics) = sendgate_metrics::try_metrics() {
            metrics.dispatch.record_retry(delay.as_secs_f64());
        }

        RetryDecision::retry(retry_at, delay)
    }

    /// Delay before every retry `policy` allows, without jitter
    #[must_use]
    pub fn plan(policy: &RetryConfig) -> Vec<Duration> {
        (0..policy.max_attempts)
            .map(|retry| policy.delay_for(retry))
            .collect()
    }

    /// Scale `delay` into `[delay / 2, delay]` when jitter is enabled
    fn jittered(&self, policy: &RetryConfig, delay: Duration) -> Duration {
        if !policy.jitter {
            return delay;
        }

        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let factor = self.rng.between(0.5, 1.0);

        // Intentional precision loss and casting for randomization
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let scaled = ((millis as f64) * factor).ceil() as u64;

        Duration::from_millis(scaled.min(millis))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use sendgate_common::{BackoffStrategy, ManualClock};

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn scheduler(seed: u64) -> RetryScheduler {
        RetryScheduler::new(
            Arc::new(ManualClock::new(now())),
            SharedRng::seeded(seed),
            RetryConfig::default(),
        )
    }

    fn request() -> SendRequest {
        SendRequest::new(Domain::new("example.com"), Priority::Normal, now())
    }

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        }
    }

    #[test]
    fn test_retryable_error_is_rescheduled() {
        let scheduler = scheduler(1);
        let mut request = request();
        request.mark_attempted();

        let decision =
            scheduler.schedule_retry(&mut request, "smtp TIMEOUT after 30s", Some(&no_jitter()));

        assert!(decision.should_retry);
        assert!(!decision.final_failure);
        assert_eq!(decision.reason, None);
        assert_eq!(decision.delay, Some(Duration::from_secs(5)));
        assert_eq!(decision.retry_at, Some(now() + TimeDelta::seconds(5)));
        assert_eq!(request.retry_count, 1);
        assert_eq!(request.status, SendStatus::Pending);
        assert_eq!(request.scheduled_at, now() + TimeDelta::seconds(5));
        assert_eq!(request.last_error.as_deref(), Some("smtp TIMEOUT after 30s"));
    }

    #[test]
    fn test_matching_ignores_case() {
        let scheduler = scheduler(1);
        let mut request = request();

        let decision = scheduler.schedule_retry(&mut request, "connection_error: reset", None);
        assert!(decision.should_retry);
    }

    #[test]
    fn test_non_retryable_error_fails_immediately() {
        let scheduler = scheduler(1);
        let mut request = request();

        let decision = scheduler.schedule_retry(&mut request, "INVALID_RECIPIENT", None);

        assert!(!decision.should_retry);
        assert!(decision.final_failure);
        assert_eq!(decision.reason, Some(FailureReason::NonRetryable));
        assert_eq!(decision.retry_at, None);
        assert_eq!(request.status, SendStatus::Failed);
        assert_eq!(request.retry_count, 0);
        assert!(request.is_terminal());
    }

    #[test]
    fn test_retries_exhausted_after_max_attempts() {
        let scheduler = scheduler(1);
        let mut request = request();
        let policy = no_jitter();

        let delays: Vec<_> = (0..3)
            .map(|_| {
                scheduler
                    .schedule_retry(&mut request, "TEMPORARY_FAILURE", Some(&policy))
                    .delay
                    .unwrap()
            })
            .collect();
        assert_eq!(delays, [5, 10, 20].map(Duration::from_secs));

        let decision = scheduler.schedule_retry(&mut request, "TEMPORARY_FAILURE", Some(&policy));
        assert_eq!(decision.reason, Some(FailureReason::RetriesExhausted));
        assert_eq!(request.retry_count, 3);
        assert_eq!(request.status, SendStatus::Failed);
    }

    #[test]
    fn test_jitter_stays_within_half_to_full() {
        let scheduler = scheduler(1234);
        let policy = RetryConfig {
            max_attempts: 10,
            ..RetryConfig::default()
        };

        for retry_count in 0..10 {
            let mut request = SendRequest {
                retry_count,
                ..request()
            };
            let decision = scheduler.schedule_retry(&mut request, "SERVER_ERROR", Some(&policy));
            let delay = decision.delay.unwrap();
            let full = policy.delay_for(retry_count);

            assert!(delay <= full, "{delay:?} > {full:?}");
            assert!(delay * 2 >= full, "{delay:?} < half of {full:?}");
        }
    }

    #[test]
    fn test_delays_clamp_to_max() {
        let policy = RetryConfig {
            max_attempts: 8,
            base_delay_ms: 60_000,
            max_delay_ms: 300_000,
            ..no_jitter()
        };

        assert_eq!(
            RetryScheduler::plan(&policy),
            [60, 120, 240, 300, 300, 300, 300, 300].map(Duration::from_secs)
        );
    }

    #[test]
    fn test_linear_and_fixed_backoff() {
        let linear = RetryConfig {
            backoff: BackoffStrategy::Linear,
            ..no_jitter()
        };
        let fixed = RetryConfig {
            backoff: BackoffStrategy::Fixed,
            ..no_jitter()
        };

        assert_eq!(RetryScheduler::plan(&linear), [5, 10, 15].map(Duration::from_secs));
        assert_eq!(RetryScheduler::plan(&fixed), [5, 5, 5].map(Duration::from_secs));
    }

    #[test]
    fn test_request_lifecycle() {
        let mut request = request();
        assert!(!request.is_terminal());

        request.mark_attempted();
        assert_eq!(request.status, SendStatus::Attempted);
        assert!(!request.is_terminal());

        request.mark_sent();
        assert!(request.is_terminal());
    }
}
