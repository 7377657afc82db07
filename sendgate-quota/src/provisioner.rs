//! Per-identity rate-limit configuration
//!
//! Configs are created lazily on first use from a tier derived from the
//! identity's age and warmup progress, then only change through
//! [`ConfigProvisioner::update`].

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use sendgate_common::{
    Clock, Identity, IdentityId, RateLimitConfig, RateLimitConfigPatch, RetryConfig,
    WarmupStatus,
};
use sendgate_store::{IdentityRegistry, QuotaStore};
use tracing::{debug, info};

use crate::ProvisionError;

/// Reputation tier an identity is provisioned into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityTier {
    New,
    Warming,
    Warmed,
}

impl IdentityTier {
    /// Classify by age and warmup status
    ///
    /// `New` wins over `Warming`, which wins over `Warmed`: an identity must be
    /// both at least 30 days old and finished warming up to be `Warmed`.
    #[must_use]
    pub fn classify(identity: &Identity, now: DateTime<Utc>) -> Self {
        let age = identity.age_at(now);

        if age < TimeDelta::days(7) || identity.warmup == WarmupStatus::NotStarted {
            Self::New
        } else if age < TimeDelta::days(30) || identity.warmup == WarmupStatus::InProgress {
            Self::Warming
        } else {
            Self::Warmed
        }
    }

    /// Default limits for the tier
    #[must_use]
    pub fn limits(self, warmup: WarmupStatus, retry: RetryConfig) -> RateLimitConfig {
        let (
            daily_limit,
            hourly_limit,
            domain_daily_limit,
            warmup_daily_limit,
            burst_limit,
            cooldown_mins,
        ) = match self {
            Self::New => (25, 5, 3, Some(15), 3, 15),
            Self::Warming => (40, 8, 5, Some(30), 5, 10),
            Self::Warmed => (50, 12, 10, None, 8, 5),
        };

        RateLimitConfig {
            daily_limit,
            hourly_limit,
            domain_daily_limit,
            warmup_mode: warmup != WarmupStatus::Completed,
            warmup_daily_limit,
            burst_limit,
            cooldown_secs: cooldown_mins * 60,
            retry,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Warming => "warming",
            Self::Warmed => "warmed",
        }
    }
}

/// Loads, derives and updates [`RateLimitConfig`]s
#[derive(Debug, Clone)]
pub struct ConfigProvisioner {
    store: Arc<dyn QuotaStore>,
    registry: Arc<dyn IdentityRegistry>,
    clock: Arc<dyn Clock>,
    default_retry: RetryConfig,
}

impl ConfigProvisioner {
    #[must_use]
    pub fn new(
        store: Arc<dyn QuotaStore>,
        registry: Arc<dyn IdentityRegistry>,
        clock: Arc<dyn Clock>,
        default_retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            default_retry,
        }
    }

    /// The stored config, provisioning a default one if none exists yet
    ///
    /// # Errors
    ///
    /// If storage fails, or there is no stored config and the registry does not
    /// know the identity.
    pub async fn get_config(
        &self,
        identity: &IdentityId,
    ) -> Result<RateLimitConfig, ProvisionError> {
        if let Some(config) = self.store.get_config(identity).await? {
            return Ok(config);
        }

        self.create_default(identity).await
    }

    /// The stored config, or the tier defaults `identity` would be provisioned
    /// with, without storing anything
    ///
    /// # Errors
    ///
    /// If storage fails, or there is no stored config and the registry does not
    /// know the identity.
    pub async fn peek_config(
        &self,
        identity: &IdentityId,
    ) -> Result<RateLimitConfig, ProvisionError> {
        if let Some(config) = self.store.get_config(identity).await? {
            return Ok(config);
        }

        let (_, config) = self.derive_default(identity).await?;
        Ok(config)
    }

    /// Derive the tier defaults for `identity` and store them unless another
    /// caller got there first, in which case the stored config is returned.
    ///
    /// # Errors
    ///
    /// If the identity is unknown to the registry, or storage fails.
    pub async fn create_default(
        &self,
        identity: &IdentityId,
    ) -> Result<RateLimitConfig, ProvisionError> {
        let (tier, config) = self.derive_default(identity).await?;
        let stored = self.store.insert_config_if_absent(identity, config).await?;

        info!(
            identity = %identity,
            tier = tier.as_str(),
            daily_limit = stored.daily_limit,
            effective_daily_limit = stored.effective_daily_limit(),
            "Provisioned rate-limit config"
        );

        if let Some(metrics) = sendgate_metrics::try_metrics() {
            metrics.quota.record_provisioned(tier.as_str());
        }

        Ok(stored)
    }

    async fn derive_default(
        &self,
        identity: &IdentityId,
    ) -> Result<(IdentityTier, RateLimitConfig), ProvisionError> {
        let record = self
            .registry
            .identity(identity)
            .await?
            .ok_or_else(|| ProvisionError::UnknownIdentity(identity.clone()))?;

        let tier = IdentityTier::classify(&record, self.clock.now());
        Ok((tier, tier.limits(record.warmup, self.default_retry.clone())))
    }

    /// Apply `patch` to the current config and store the result
    ///
    /// # Errors
    ///
    /// [`ProvisionError::Validation`] listing every out-of-range field, in which
    /// case the stored config is unchanged; or any error from [`Self::get_config`].
    pub async fn update(
        &self,
        identity: &IdentityId,
        patch: &RateLimitConfigPatch,
    ) -> Result<RateLimitConfig, ProvisionError> {
        let current = self.get_config(identity).await?;
        let updated = current.patched(patch);

        if let Err(err) = updated.validate() {
            debug!(identity = %identity, error = %err, "Rejected config update");
            return Err(err.into());
        }

        self.store.put_config(identity, updated.clone()).await?;

        info!(identity = %identity, "Updated rate-limit config");

        Ok(updated)
    }
}
