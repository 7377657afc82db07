//! Remaining sending capacity of an identity

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta, TimeZone, Timelike, Utc};
use sendgate_common::{
    BucketKey, Clock, Domain, IdentityId, Priority, RateLimitConfig, UsageRecord,
};
use sendgate_store::QuotaStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{ConfigProvisioner, EngineConfig, ProvisionError, QuotaCache};

/// Capacity an identity has left for one recipient domain
///
/// Derived on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendingQuota {
    pub daily_remaining: u64,
    pub hourly_remaining: u64,
    pub domain_remaining: u64,
    pub burst_available: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub next_available_slot: DateTime<Utc>,
    pub is_available: bool,
    /// When this view was computed
    pub computed_at: DateTime<Utc>,
    /// Set when the quota could not be computed and was denied outright
    #[serde(default)]
    pub fail_closed: bool,
}

impl SendingQuota {
    /// A quota that allows nothing, used whenever usage or config cannot be read
    #[must_use]
    pub fn fail_closed(now: DateTime<Utc>, retry_after: TimeDelta) -> Self {
        Self {
            daily_remaining: 0,
            hourly_remaining: 0,
            domain_remaining: 0,
            burst_available: 0,
            cooldown_until: None,
            next_available_slot: now.checked_add_signed(retry_after).unwrap_or(now),
            is_available: false,
            computed_at: now,
            fail_closed: true,
        }
    }

    /// Metric label for this quota
    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        if self.fail_closed {
            "fail_closed"
        } else if self.is_available {
            "available"
        } else {
            "unavailable"
        }
    }
}

/// Computes [`SendingQuota`]s from stored config and usage
#[derive(Debug, Clone)]
pub struct QuotaCalculator {
    provisioner: Arc<ConfigProvisioner>,
    store: Arc<dyn QuotaStore>,
    clock: Arc<dyn Clock>,
    cache: Arc<QuotaCache>,
    config: Arc<EngineConfig>,
}

impl QuotaCalculator {
    #[must_use]
    pub fn new(
        provisioner: Arc<ConfigProvisioner>,
        store: Arc<dyn QuotaStore>,
        clock: Arc<dyn Clock>,
        cache: Arc<QuotaCache>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            provisioner,
            store,
            clock,
            cache,
            config,
        }
    }

    /// Remaining capacity of `identity` towards `domain`
    ///
    /// Never fails: if config or usage cannot be read the quota is denied with
    /// [`SendingQuota::fail_closed`]. `priority` is only carried into logs and
    /// metrics.
    pub async fn check_quota(
        &self,
        identity: &IdentityId,
        domain: &Domain,
        priority: Priority,
    ) -> SendingQuota {
        let now = self.clock.now();
        let metrics = sendgate_metrics::try_metrics();

        if let Some(quota) = self.cache.get(identity, domain, now) {
            if let Some(metrics) = metrics {
                metrics.quota.record_cache_hit();
                metrics.quota.record_check(quota.outcome(), priority.as_str());
            }
            return quota;
        }

        if let Some(metrics) = metrics {
            metrics.quota.record_cache_miss();
        }

        let generation = self.cache.generation(identity);
        let quota = match self.compute(identity, domain, now).await {
            Ok(quota) => {
                self.cache
                    .insert(identity, domain, quota.clone(), generation);
                quota
            }
            Err(err) => {
                warn!(
                    identity = %identity,
                    domain = %domain,
                    error = %err,
                    "Quota check failed, denying sends"
                );
                SendingQuota::fail_closed(now, self.config.fail_closed_retry())
            }
        };

        debug!(
            identity = %identity,
            domain = %domain,
            priority = %priority,
            daily_remaining = quota.daily_remaining,
            hourly_remaining = quota.hourly_remaining,
            domain_remaining = quota.domain_remaining,
            burst_available = quota.burst_available,
            is_available = quota.is_available,
            next_available_slot = %quota.next_available_slot,
            "Computed sending quota"
        );

        if let Some(metrics) = metrics {
            metrics.quota.record_check(quota.outcome(), priority.as_str());
        }

        quota
    }

    async fn compute(
        &self,
        identity: &IdentityId,
        domain: &Domain,
        now: DateTime<Utc>,
    ) -> Result<SendingQuota, ProvisionError> {
        let config = self.provisioner.get_config(identity).await?;
        let key = BucketKey::at(now, self.config.offset());
        let today = self.store.usage_for_day(identity, key.date).await?;

        // A burst or cooldown started late yesterday still applies after midnight
        let yesterday = if today.iter().any(|record| record.last_send_at.is_some()) {
            Vec::new()
        } else if let Some(date) = key.date.pred_opt() {
            self.store.usage_for_day(identity, date).await?
        } else {
            Vec::new()
        };

        Ok(evaluate(
            &config,
            &Usage {
                today: &today,
                yesterday: &yesterday,
            },
            domain,
            now,
            key,
            &self.config,
        ))
    }
}

struct Usage<'a> {
    today: &'a [UsageRecord],
    yesterday: &'a [UsageRecord],
}

impl Usage<'_> {
    /// The bucket holding the most recent send, which carries the burst state
    fn latest(&self) -> Option<&UsageRecord> {
        fn latest(records: &[UsageRecord]) -> Option<&UsageRecord> {
            records
                .iter()
                .filter(|record| record.last_send_at.is_some())
                .max_by_key(|record| (record.last_send_at, record.key))
        }

        latest(self.today).or_else(|| latest(self.yesterday))
    }
}

fn evaluate(
    config: &RateLimitConfig,
    usage: &Usage<'_>,
    domain: &Domain,
    now: DateTime<Utc>,
    key: BucketKey,
    settings: &EngineConfig,
) -> SendingQuota {
    let sent_today: u64 = usage.today.iter().map(|record| record.emails_sent).sum();
    let sent_this_hour: u64 = usage
        .today
        .iter()
        .filter(|record| record.key == key)
        .map(|record| record.emails_sent)
        .sum();
    let sent_to_domain: u64 = usage.today.iter().map(|record| record.sent_to(domain)).sum();

    let daily_remaining = u64::from(config.effective_daily_limit()).saturating_sub(sent_today);
    let hourly_remaining = u64::from(config.hourly_limit).saturating_sub(sent_this_hour);
    let domain_remaining = u64::from(config.domain_daily_limit).saturating_sub(sent_to_domain);

    let latest = usage.latest();
    let burst_window = settings.burst_window();

    let burst_available = match latest {
        Some(record) if !record.burst_window_elapsed(now, burst_window) => {
            config.burst_limit.saturating_sub(record.burst_count)
        }
        _ => config.burst_limit,
    };

    let cooldown_until = latest
        .filter(|record| record.burst_count >= config.burst_limit)
        .and_then(|record| record.last_send_at)
        .map(|last| {
            last.checked_add_signed(config.cooldown())
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
        .filter(|until| *until > now);

    let is_available = daily_remaining > 0
        && hourly_remaining > 0
        && domain_remaining > 0
        && burst_available > 0
        && cooldown_until.is_none();

    let next_available_slot = if is_available {
        now
    } else {
        let offset = settings.offset();
        let burst_end = latest
            .filter(|_| burst_available == 0 && cooldown_until.is_none())
            .and_then(|record| record.burst_window_start)
            .and_then(|start| start.checked_add_signed(burst_window));

        [
            cooldown_until,
            (hourly_remaining == 0).then(|| next_hour(now, offset)).flatten(),
            (daily_remaining == 0 || domain_remaining == 0)
                .then(|| next_day_at(now, offset, settings.resume_hour()))
                .flatten(),
            burst_end,
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or_else(|| {
            now.checked_add_signed(settings.fail_closed_retry())
                .unwrap_or(now)
        })
    };

    SendingQuota {
        daily_remaining,
        hourly_remaining,
        domain_remaining,
        burst_available,
        cooldown_until,
        next_available_slot,
        is_available,
        computed_at: now,
        fail_closed: false,
    }
}

fn from_local(naive: NaiveDateTime, offset: FixedOffset) -> Option<DateTime<Utc>> {
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
}

/// Top of the next local hour
fn next_hour(now: DateTime<Utc>, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let local = now.with_timezone(&offset);
    let start = local.date_naive().and_hms_opt(local.hour(), 0, 0)?;
    from_local(start + TimeDelta::hours(1), offset)
}

/// `hour`:00 local time tomorrow
fn next_day_at(now: DateTime<Utc>, offset: FixedOffset, hour: u32) -> Option<DateTime<Utc>> {
    let tomorrow = now.with_timezone(&offset).date_naive().succ_opt()?;
    from_local(tomorrow.and_hms_opt(hour, 0, 0)?, offset)
}
