use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sendgate_common::{
    Identity, IdentityId, RateLimitConfig, SendLogEntry, TenantId, UsageIncrement, UsageRecord,
};

/// Storage for per-identity configuration, usage buckets and the send log
#[async_trait]
pub trait QuotaStore: Send + Sync + std::fmt::Debug {
    /// Fetch the stored configuration for an identity, if any
    ///
    /// # Errors
    /// If the backend cannot be read
    async fn get_config(&self, identity: &IdentityId) -> crate::Result<Option<RateLimitConfig>>;

    /// Store `config` unless one already exists, returning whichever config is
    /// stored afterwards
    ///
    /// Concurrent lazy provisioning of the same identity converges on a single
    /// config through this call.
    ///
    /// # Errors
    /// If the backend cannot be written
    async fn insert_config_if_absent(
        &self,
        identity: &IdentityId,
        config: RateLimitConfig,
    ) -> crate::Result<RateLimitConfig>;

    /// Replace the stored configuration
    ///
    /// # Errors
    /// If the backend cannot be written
    async fn put_config(&self, identity: &IdentityId, config: RateLimitConfig)
    -> crate::Result<()>;

    /// All usage buckets for `identity` on the given local date, ordered by hour
    ///
    /// # Errors
    /// If the backend cannot be read
    async fn usage_for_day(
        &self,
        identity: &IdentityId,
        date: NaiveDate,
    ) -> crate::Result<Vec<UsageRecord>>;

    /// Atomically apply one send to the bucket named by `increment.key`,
    /// creating the bucket if needed, and return the updated bucket
    ///
    /// Implementations must not lose updates under concurrent calls for the
    /// same identity.
    ///
    /// # Errors
    /// If the backend cannot be written
    async fn upsert_usage(
        &self,
        identity: &IdentityId,
        increment: &UsageIncrement,
    ) -> crate::Result<UsageRecord>;

    /// Append an entry to the send log
    ///
    /// # Errors
    /// If the backend cannot be written
    async fn insert_log(&self, entry: SendLogEntry) -> crate::Result<()>;

    /// Send-log entries for any of `identities` with `from <= timestamp < to`,
    /// oldest first
    ///
    /// # Errors
    /// If the backend cannot be read
    async fn logs_between(
        &self,
        identities: &[IdentityId],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> crate::Result<Vec<SendLogEntry>>;
}

/// Source of the sending identities available to each tenant
#[async_trait]
pub trait IdentityRegistry: Send + Sync + std::fmt::Debug {
    /// Identities owned by `tenant`, in registry order
    ///
    /// # Errors
    /// If the registry cannot be read
    async fn identities_for_tenant(&self, tenant: &TenantId) -> crate::Result<Vec<Identity>>;

    /// Look up a single identity
    ///
    /// # Errors
    /// If the registry cannot be read
    async fn identity(&self, id: &IdentityId) -> crate::Result<Option<Identity>>;
}
