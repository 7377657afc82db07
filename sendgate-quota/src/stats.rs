//! Per-tenant send statistics over a time range

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use chrono::{DateTime, TimeDelta, Utc};
use sendgate_common::{Domain, IdentityId, TenantId};
use sendgate_store::{IdentityRegistry, QuotaStore};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ConfigProvisioner;

/// Half-open interval `[from, to)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    #[must_use]
    pub const fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// The `span` leading up to `now`
    #[must_use]
    pub fn last(span: TimeDelta, now: DateTime<Utc>) -> Self {
        Self {
            from: now.checked_sub_signed(span).unwrap_or(now),
            to: now,
        }
    }

    /// Whole days covered, rounding up, never less than one
    #[must_use]
    pub fn days(&self) -> u64 {
        let seconds = (self.to - self.from).num_seconds().max(0).unsigned_abs();
        seconds.div_ceil(86_400).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityStats {
    pub identity: IdentityId,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    /// Successes over attempts, 0 when nothing was sent
    pub success_rate: f64,
    /// Attempts as a percentage of effective daily capacity over the range
    pub usage_percent: f64,
    pub domains: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedStats {
    pub tenant: TenantId,
    pub range: TimeRange,
    pub identities: Vec<IdentityStats>,
    pub total_attempts: u64,
    pub total_successes: u64,
    pub success_rate: f64,
    /// Some data could not be read; figures are incomplete
    pub degraded: bool,
}

#[derive(Default)]
struct Tally {
    attempts: u64,
    successes: u64,
    domains: AHashSet<Domain>,
}

/// Builds [`AggregatedStats`] from the send log
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    registry: Arc<dyn IdentityRegistry>,
    store: Arc<dyn QuotaStore>,
    provisioner: Arc<ConfigProvisioner>,
}

impl StatsAggregator {
    #[must_use]
    pub fn new(
        registry: Arc<dyn IdentityRegistry>,
        store: Arc<dyn QuotaStore>,
        provisioner: Arc<ConfigProvisioner>,
    ) -> Self {
        Self {
            registry,
            store,
            provisioner,
        }
    }

    /// Statistics for every identity of `tenant`, in registry order
    ///
    /// Read failures degrade the result rather than failing it.
    pub async fn get_stats(&self, tenant: &TenantId, range: TimeRange) -> AggregatedStats {
        let mut degraded = false;

        let identities: Vec<IdentityId> = match self.registry.identities_for_tenant(tenant).await {
            Ok(identities) => identities.into_iter().map(|identity| identity.id).collect(),
            Err(err) => {
                warn!(tenant = %tenant, error = %err, "Failed to load identities for stats");
                degraded = true;
                Vec::new()
            }
        };

        let entries = if identities.is_empty() {
            Vec::new()
        } else {
            match self.store.logs_between(&identities, range.from, range.to).await {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(tenant = %tenant, error = %err, "Failed to read send log for stats");
                    degraded = true;
                    Vec::new()
                }
            }
        };

        let mut tallies: AHashMap<IdentityId, Tally> = AHashMap::new();
        for entry in entries {
            let tally = tallies.entry(entry.identity).or_default();
            tally.attempts += 1;
            if entry.success {
                tally.successes += 1;
            }
            tally.domains.insert(entry.domain);
        }

        let mut stats = Vec::with_capacity(identities.len());
        for identity in identities {
            let tally = tallies.remove(&identity).unwrap_or_default();

            let capacity = match self.provisioner.peek_config(&identity).await {
                Ok(config) => u64::from(config.effective_daily_limit()) * range.days(),
                Err(err) => {
                    warn!(identity = %identity, error = %err, "Failed to load config for stats");
                    degraded = true;
                    0
                }
            };

            stats.push(IdentityStats {
                identity,
                attempts: tally.attempts,
                successes: tally.successes,
                failures: tally.attempts - tally.successes,
                success_rate: ratio(tally.successes, tally.attempts),
                usage_percent: ratio(tally.attempts, capacity) * 100.0,
                domains: tally.domains.len(),
            });
        }

        let total_attempts = stats.iter().map(|s| s.attempts).sum();
        let total_successes = stats.iter().map(|s| s.successes).sum();

        AggregatedStats {
            tenant: tenant.clone(),
            range,
            identities: stats,
            total_attempts,
            total_successes,
            success_rate: ratio(total_successes, total_attempts),
            degraded,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
