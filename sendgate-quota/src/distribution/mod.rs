//! Choosing which identity sends a message

mod strategy;

use std::{cmp::Reverse, sync::Arc};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use sendgate_common::{Domain, IdentityId, Priority, TenantId};
use sendgate_store::IdentityRegistry;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use self::strategy::{DistributionStrategy, StrategyKind};
use crate::{QuotaCalculator, SendingQuota, SharedRng};

/// The identity chosen for a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub identity: IdentityId,
    /// Set when no identity could send now; the message should wait until then
    pub scheduled_for: Option<DateTime<Utc>>,
    pub quota: SendingQuota,
}

/// Picks a sending identity for a tenant's message
#[derive(Debug)]
pub struct DistributionEngine {
    registry: Arc<dyn IdentityRegistry>,
    calculator: Arc<QuotaCalculator>,
    rng: SharedRng,
    cursors: DashMap<TenantId, usize>,
}

impl DistributionEngine {
    #[must_use]
    pub fn new(
        registry: Arc<dyn IdentityRegistry>,
        calculator: Arc<QuotaCalculator>,
        rng: SharedRng,
    ) -> Self {
        Self {
            registry,
            calculator,
            rng,
            cursors: DashMap::new(),
        }
    }

    /// Select an identity of `tenant` to send to `domain`
    ///
    /// Quotas for every candidate are checked concurrently. If none is
    /// available, the candidate that frees up first is returned with
    /// `scheduled_for` set. Returns `None` only when the tenant has no
    /// candidates or the registry cannot be read.
    pub async fn select_identity(
        &self,
        tenant: &TenantId,
        domain: &Domain,
        strategy: &DistributionStrategy,
        priority: Priority,
    ) -> Option<SelectionResult> {
        let identities = match self.registry.identities_for_tenant(tenant).await {
            Ok(identities) => identities,
            Err(err) => {
                warn!(tenant = %tenant, error = %err, "Failed to load identities");
                record_selection(strategy.kind, "registry_error");
                return None;
            }
        };

        let candidates =
            strategy.order(identities.into_iter().map(|identity| identity.id).collect());
        if candidates.is_empty() {
            debug!(tenant = %tenant, "No candidate identities");
            record_selection(strategy.kind, "no_candidates");
            return None;
        }

        let quotas = join_all(
            candidates
                .iter()
                .map(|identity| self.calculator.check_quota(identity, domain, priority)),
        )
        .await;

        let evaluated: Vec<(IdentityId, SendingQuota)> =
            candidates.into_iter().zip(quotas).collect();

        if !evaluated.iter().any(|(_, quota)| quota.is_available) {
            let (identity, quota) = evaluated
                .into_iter()
                .min_by_key(|(_, quota)| quota.next_available_slot)?;

            debug!(
                tenant = %tenant,
                identity = %identity,
                domain = %domain,
                scheduled_for = %quota.next_available_slot,
                "No identity available, deferring"
            );
            record_selection(strategy.kind, "deferred");

            return Some(SelectionResult {
                identity,
                scheduled_for: Some(quota.next_available_slot),
                quota,
            });
        }

        let available: Vec<&(IdentityId, SendingQuota)> = evaluated
            .iter()
            .filter(|(_, quota)| quota.is_available)
            .collect();
        let preferred: Vec<_> = available
            .iter()
            .copied()
            .filter(|(identity, _)| strategy.is_preferred(identity))
            .collect();
        let pool = if preferred.is_empty() { available } else { preferred };

        let index = self.pick(tenant, &pool, strategy);
        let (identity, quota) = pool[index].clone();

        debug!(
            tenant = %tenant,
            identity = %identity,
            domain = %domain,
            strategy = %strategy.kind,
            available = pool.len(),
            "Selected identity"
        );
        record_selection(strategy.kind, "selected");

        Some(SelectionResult {
            identity,
            scheduled_for: None,
            quota,
        })
    }

    /// Index into `pool`, which is never empty
    fn pick(
        &self,
        tenant: &TenantId,
        pool: &[&(IdentityId, SendingQuota)],
        strategy: &DistributionStrategy,
    ) -> usize {
        match strategy.kind {
            StrategyKind::RoundRobin => {
                let mut cursor = self.cursors.entry(tenant.clone()).or_insert(0);
                let index = *cursor % pool.len();
                *cursor = cursor.wrapping_add(1);
                index
            }
            StrategyKind::LeastUsed => first_max_by_key(pool, |(_, quota)| quota.daily_remaining),
            StrategyKind::Priority => {
                first_max_by_key(pool, |(identity, _)| strategy.priority_of(identity))
            }
            StrategyKind::Weighted => {
                let weights: Vec<u64> = pool
                    .iter()
                    .map(|(identity, _)| u64::from(strategy.weight_of(identity)))
                    .collect();
                self.weighted_index(&weights)
            }
        }
    }

    fn weighted_index(&self, weights: &[u64]) -> usize {
        let total: u64 = weights.iter().sum();
        if total == 0 {
            let count = u64::try_from(weights.len()).unwrap_or(u64::MAX);
            return usize::try_from(self.rng.below(count)).unwrap_or(0);
        }

        let mut roll = self.rng.below(total);
        for (index, weight) in weights.iter().enumerate() {
            if roll < *weight {
                return index;
            }
            roll -= weight;
        }

        weights.len() - 1
    }
}

/// Position of the first element with the greatest key
fn first_max_by_key<T, K: Ord>(items: &[T], key: impl Fn(&T) -> K) -> usize {
    items
        .iter()
        .enumerate()
        .min_by_key(|(_, item)| Reverse(key(*item)))
        .map_or(0, |(index, _)| index)
}

fn record_selection(kind: StrategyKind, outcome: &'static str) {
    if let Some(metrics) = sendgate_metrics::try_metrics() {
        metrics.dispatch.record_selection(kind.as_str(), outcome);
    }
}
