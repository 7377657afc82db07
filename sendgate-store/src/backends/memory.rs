use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use sendgate_common::{
    BucketKey, Identity, IdentityId, RateLimitConfig, SendLogEntry, TenantId, UsageIncrement,
    UsageRecord,
};

use crate::{IdentityRegistry, QuotaStore};

/// Every usage bucket for one identity, ordered by (date, hour)
#[derive(Debug, Default)]
struct UsageLedger {
    buckets: BTreeMap<BucketKey, UsageRecord>,
}

/// In-memory store and identity registry
///
/// # Concurrency
/// Usage buckets are grouped per identity behind a `parking_lot::Mutex`, held in
/// a `DashMap`. An upsert locks only the identity being written, so concurrent
/// sends against one identity are serialised (no lost updates) while different
/// identities proceed in parallel. Configs live in a `DashMap` whose entry API
/// gives insert-if-absent atomically. The send log is an append-only `Vec`
/// behind an `RwLock`.
///
/// Clones share the same underlying data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    configs: Arc<DashMap<IdentityId, RateLimitConfig>>,
    usage: Arc<DashMap<IdentityId, Arc<Mutex<UsageLedger>>>>,
    logs: Arc<RwLock<Vec<SendLogEntry>>>,
    identities: Arc<RwLock<Vec<Identity>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose registry holds `identities`, in order
    #[must_use]
    pub fn with_identities(identities: impl IntoIterator<Item = Identity>) -> Self {
        let store = Self::new();
        for identity in identities {
            store.register(identity);
        }
        store
    }

    /// Add an identity to the registry, replacing any previous record with the
    /// same id while keeping its position
    pub fn register(&self, identity: Identity) {
        let mut identities = self.identities.write();
        if let Some(existing) = identities.iter_mut().find(|i| i.id == identity.id) {
            *existing = identity;
        } else {
            identities.push(identity);
        }
    }

    /// Remove an identity from the registry. Its stored config and usage stay.
    pub fn deregister(&self, id: &IdentityId) {
        self.identities.write().retain(|identity| &identity.id != id);
    }

    /// Every usage bucket recorded for `identity`, oldest first
    #[must_use]
    pub fn usage_records(&self, identity: &IdentityId) -> Vec<UsageRecord> {
        self.usage
            .get(identity)
            .map(|ledger| ledger.lock().buckets.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of send-log entries across all identities
    #[must_use]
    pub fn log_len(&self) -> usize {
        self.logs.read().len()
    }

    fn ledger(&self, identity: &IdentityId) -> Arc<Mutex<UsageLedger>> {
        self.usage.entry(identity.clone()).or_default().clone()
    }
}

#[async_trait]
impl QuotaStore for MemoryStore {
    async fn get_config(&self, identity: &IdentityId) -> crate::Result<Option<RateLimitConfig>> {
        Ok(self.configs.get(identity).map(|config| config.clone()))
    }

    async fn insert_config_if_absent(
        &self,
        identity: &IdentityId,
        config: RateLimitConfig,
    ) -> crate::Result<RateLimitConfig> {
        Ok(self
            .configs
            .entry(identity.clone())
            .or_insert(config)
            .clone())
    }

    async fn put_config(
        &self,
        identity: &IdentityId,
        config: RateLimitConfig,
    ) -> crate::Result<()> {
        self.configs.insert(identity.clone(), config);
        Ok(())
    }

    async fn usage_for_day(
        &self,
        identity: &IdentityId,
        date: NaiveDate,
    ) -> crate::Result<Vec<UsageRecord>> {
        let Some(ledger) = self.usage.get(identity).map(|ledger| ledger.clone()) else {
            return Ok(Vec::new());
        };

        let start = BucketKey { date, hour: 0 };
        let end = BucketKey { date, hour: 23 };

        Ok(ledger
            .lock()
            .buckets
            .range(start..=end)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn upsert_usage(
        &self,
        identity: &IdentityId,
        increment: &UsageIncrement,
    ) -> crate::Result<UsageRecord> {
        let ledger = self.ledger(identity);
        let mut ledger = ledger.lock();

        let seed = if ledger.buckets.contains_key(&increment.key) {
            None
        } else {
            ledger
                .buckets
                .range(..increment.key)
                .next_back()
                .map(|(_, previous)| previous.clone())
        };

        let record = ledger.buckets.entry(increment.key).or_insert_with(|| {
            let mut fresh = UsageRecord::new(identity.clone(), increment.key);
            if let Some(previous) = &seed {
                fresh.inherit_burst(previous);
            }
            fresh
        });

        record.apply(increment);

        Ok(record.clone())
    }

    async fn insert_log(&self, entry: SendLogEntry) -> crate::Result<()> {
        self.logs.write().push(entry);
        Ok(())
    }

    async fn logs_between(
        &self,
        identities: &[IdentityId],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> crate::Result<Vec<SendLogEntry>> {
        let mut entries: Vec<_> = self
            .logs
            .read()
            .iter()
            .filter(|entry| {
                entry.timestamp >= from
                    && entry.timestamp < to
                    && identities.contains(&entry.identity)
            })
            .cloned()
            .collect();

        entries.sort_by_key(|entry| entry.timestamp);

        Ok(entries)
    }
}

#[async_trait]
impl IdentityRegistry for MemoryStore {
    async fn identities_for_tenant(&self, tenant: &TenantId) -> crate::Result<Vec<Identity>> {
        Ok(self
            .identities
            .read()
            .iter()
            .filter(|identity| &identity.tenant == tenant)
            .cloned()
            .collect())
    }

    async fn identity(&self, id: &IdentityId) -> crate::Result<Option<Identity>> {
        Ok(self
            .identities
            .read()
            .iter()
            .find(|identity| &identity.id == id)
            .cloned())
    }
}
