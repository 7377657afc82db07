use ahash::AHashMap;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use sendgate_common::{Domain, IdentityId};

use crate::SendingQuota;

#[derive(Debug, Default)]
struct CachedIdentity {
    generation: u64,
    quotas: AHashMap<Domain, SendingQuota>,
}

/// Short-lived cache of computed quotas, keyed by (identity, domain)
///
/// Entries are fresh for `ttl` after their `computed_at`. Every recorded send
/// invalidates all entries of the identity and bumps its generation, so a
/// quota computed before the send can never be inserted after it.
#[derive(Debug)]
pub struct QuotaCache {
    ttl: TimeDelta,
    entries: DashMap<IdentityId, CachedIdentity>,
}

impl QuotaCache {
    #[must_use]
    pub fn new(ttl: TimeDelta) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// A fresh cached quota, if any
    pub fn get(
        &self,
        identity: &IdentityId,
        domain: &Domain,
        now: DateTime<Utc>,
    ) -> Option<SendingQuota> {
        let entry = self.entries.get(identity)?;
        let quota = entry.quotas.get(domain)?;

        self.is_fresh(quota, now).then(|| quota.clone())
    }

    fn is_fresh(&self, quota: &SendingQuota, now: DateTime<Utc>) -> bool {
        let age = now - quota.computed_at;
        age >= TimeDelta::zero() && age < self.ttl
    }

    /// Current generation of `identity`, read before computing a quota
    pub fn generation(&self, identity: &IdentityId) -> u64 {
        self.entries
            .get(identity)
            .map_or(0, |entry| entry.generation)
    }

    /// Cache `quota` unless the identity was invalidated since `generation`
    /// was read. Returns whether the quota was stored.
    ///
    /// Entries of the identity that have expired by `quota.computed_at` are
    /// dropped.
    pub fn insert(
        &self,
        identity: &IdentityId,
        domain: &Domain,
        quota: SendingQuota,
        generation: u64,
    ) -> bool {
        let mut entry = self.entries.entry(identity.clone()).or_default();
        if entry.generation != generation {
            return false;
        }

        let now = quota.computed_at;
        entry.quotas.retain(|_, cached| self.is_fresh(cached, now));
        entry.quotas.insert(domain.clone(), quota);
        true
    }

    /// Drop every cached quota for `identity`
    pub fn invalidate_identity(&self, identity: &IdentityId) {
        let mut entry = self.entries.entry(identity.clone()).or_default();
        entry.generation = entry.generation.wrapping_add(1);
        entry.quotas.clear();
    }

    /// Number of cached quotas, fresh or not
    pub fn len(&self) -> usize {
        self.entries.iter().map(|entry| entry.quotas.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn quota(at: DateTime<Utc>) -> SendingQuota {
        SendingQuota::fail_closed(at, TimeDelta::hours(1))
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let cache = QuotaCache::new(TimeDelta::minutes(5));
        let id = IdentityId::new("a");
        let domain = Domain::new("example.com");

        assert!(cache.insert(&id, &domain, quota(now()), cache.generation(&id)));
        assert!(cache.get(&id, &domain, now() + TimeDelta::minutes(4)).is_some());
        assert!(cache.get(&id, &domain, now() + TimeDelta::minutes(5)).is_none());
        assert!(cache.get(&id, &Domain::new("other.org"), now()).is_none());
    }

    #[test]
    fn test_invalidate_drops_every_domain() {
        let cache = QuotaCache::new(TimeDelta::minutes(5));
        let a = IdentityId::new("a");
        let b = IdentityId::new("b");

        for domain in ["x.com", "y.com"] {
            cache.insert(&a, &Domain::new(domain), quota(now()), 0);
        }
        cache.insert(&b, &Domain::new("x.com"), quota(now()), 0);
        assert_eq!(cache.len(), 3);

        cache.invalidate_identity(&a);

        assert_eq!(cache.len(), 1);
        assert!(cache.get(&b, &Domain::new("x.com"), now()).is_some());
    }

    #[test]
    fn test_insert_prunes_expired_entries() {
        let cache = QuotaCache::new(TimeDelta::minutes(5));
        let id = IdentityId::new("a");
        let other = IdentityId::new("b");

        for domain in ["x.com", "y.com"] {
            assert!(cache.insert(&id, &Domain::new(domain), quota(now()), 0));
        }
        cache.insert(&other, &Domain::new("x.com"), quota(now()), 0);

        let later = now() + TimeDelta::minutes(6);
        assert!(cache.insert(&id, &Domain::new("z.com"), quota(later), 0));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&id, &Domain::new("z.com"), later).is_some());
        assert!(cache.get(&id, &Domain::new("x.com"), now()).is_none());
    }

    #[test]
    fn test_stale_generation_is_not_inserted() {
        let cache = QuotaCache::new(TimeDelta::minutes(5));
        let id = IdentityId::new("a");
        let domain = Domain::new("example.com");

        let generation = cache.generation(&id);
        cache.invalidate_identity(&id);

        assert!(!cache.insert(&id, &domain, quota(now()), generation));
        assert!(cache.is_empty());
    }
}
