use std::sync::Arc;

use sendgate_common::{
    Clock, Domain, IdentityId, Priority, RateLimitConfig, RateLimitConfigPatch, RetryConfig,
    SystemClock, TenantId,
};
use sendgate_store::{IdentityRegistry, QuotaStore};

use crate::{
    AggregatedStats, ConfigProvisioner, DistributionEngine, DistributionStrategy, EngineConfig,
    ProvisionError, QuotaCache, QuotaCalculator, RetryDecision, RetryScheduler, SelectionResult,
    SendRequest, SendingQuota, SharedRng, StatsAggregator, TimeRange, UsageRecorder,
};

/// The quota and distribution engine
///
/// Owns one instance of each component, all sharing the same store, clock,
/// cache and random source.
#[derive(Debug)]
pub struct Engine {
    config: Arc<EngineConfig>,
    cache: Arc<QuotaCache>,
    provisioner: Arc<ConfigProvisioner>,
    calculator: Arc<QuotaCalculator>,
    recorder: UsageRecorder,
    distributor: DistributionEngine,
    scheduler: RetryScheduler,
    stats: StatsAggregator,
}

impl Engine {
    /// An engine over a backend that provides both storage and the registry
    #[must_use]
    pub fn new<S>(backend: Arc<S>, config: EngineConfig) -> Self
    where
        S: QuotaStore + IdentityRegistry + 'static,
    {
        Self::builder(backend.clone(), backend).config(config).build()
    }

    #[must_use]
    pub fn builder(
        store: Arc<dyn QuotaStore>,
        registry: Arc<dyn IdentityRegistry>,
    ) -> EngineBuilder {
        EngineBuilder {
            store,
            registry,
            clock: None,
            rng: None,
            config: EngineConfig::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &QuotaCache {
        &self.cache
    }

    /// See [`QuotaCalculator::check_quota`]
    pub async fn check_quota(
        &self,
        identity: &IdentityId,
        domain: &Domain,
        priority: Priority,
    ) -> SendingQuota {
        self.calculator.check_quota(identity, domain, priority).await
    }

    /// See [`DistributionEngine::select_identity`]
    pub async fn select_identity(
        &self,
        tenant: &TenantId,
        domain: &Domain,
        strategy: &DistributionStrategy,
        priority: Priority,
    ) -> Option<SelectionResult> {
        self.distributor
            .select_identity(tenant, domain, strategy, priority)
            .await
    }

    /// See [`UsageRecorder::record_send`]
    pub async fn record_send(
        &self,
        identity: &IdentityId,
        domain: &Domain,
        success: bool,
        error: Option<&str>,
    ) {
        self.recorder
            .record_send(identity, domain, success, error)
            .await;
    }

    /// See [`RetryScheduler::schedule_retry`]
    pub fn schedule_retry(
        &self,
        request: &mut SendRequest,
        error: &str,
        policy: Option<&RetryConfig>,
    ) -> RetryDecision {
        self.scheduler.schedule_retry(request, error, policy)
    }

    /// Schedule a retry using the sending identity's own retry policy
    ///
    /// Falls back to the engine default when the identity's config cannot be
    /// loaded.
    pub async fn schedule_retry_for(
        &self,
        identity: &IdentityId,
        request: &mut SendRequest,
        error: &str,
    ) -> RetryDecision {
        let policy = self
            .provisioner
            .get_config(identity)
            .await
            .ok()
            .map(|config| config.retry);

        self.scheduler.schedule_retry(request, error, policy.as_ref())
    }

    /// # Errors
    ///
    /// See [`ConfigProvisioner::get_config`]
    pub async fn get_config(
        &self,
        identity: &IdentityId,
    ) -> Result<RateLimitConfig, ProvisionError> {
        self.provisioner.get_config(identity).await
    }

    /// Update an identity's limits and drop its cached quotas
    ///
    /// # Errors
    ///
    /// See [`ConfigProvisioner::update`]
    pub async fn update_config(
        &self,
        identity: &IdentityId,
        patch: &RateLimitConfigPatch,
    ) -> Result<RateLimitConfig, ProvisionError> {
        let updated = self.provisioner.update(identity, patch).await?;
        self.cache.invalidate_identity(identity);
        Ok(updated)
    }

    /// See [`StatsAggregator::get_stats`]
    pub async fn get_stats(&self, tenant: &TenantId, range: TimeRange) -> AggregatedStats {
        self.stats.get_stats(tenant, range).await
    }
}

/// Assembles an [`Engine`], defaulting to the system clock and a random source
/// seeded from `EngineConfig::rng_seed` or the OS
#[derive(Debug)]
pub struct EngineBuilder {
    store: Arc<dyn QuotaStore>,
    registry: Arc<dyn IdentityRegistry>,
    clock: Option<Arc<dyn Clock>>,
    rng: Option<SharedRng>,
    config: EngineConfig,
}

impl EngineBuilder {
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn rng(mut self, rng: SharedRng) -> Self {
        self.rng = Some(rng);
        self
    }

    #[must_use]
    pub fn build(self) -> Engine {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let rng = self.rng.unwrap_or_else(|| {
            self.config
                .rng_seed
                .map_or_else(SharedRng::from_os, SharedRng::seeded)
        });
        let config = Arc::new(self.config);
        let cache = Arc::new(QuotaCache::new(config.cache_ttl()));

        let provisioner = Arc::new(ConfigProvisioner::new(
            self.store.clone(),
            self.registry.clone(),
            clock.clone(),
            config.retry.clone(),
        ));
        let calculator = Arc::new(QuotaCalculator::new(
            provisioner.clone(),
            self.store.clone(),
            clock.clone(),
            cache.clone(),
            config.clone(),
        ));

        Engine {
            recorder: UsageRecorder::new(
                self.store.clone(),
                cache.clone(),
                clock.clone(),
                config.clone(),
            ),
            distributor: DistributionEngine::new(
                self.registry.clone(),
                calculator.clone(),
                rng.clone(),
            ),
            scheduler: RetryScheduler::new(clock, rng, config.retry.clone()),
            stats: StatsAggregator::new(self.registry, self.store, provisioner.clone()),
            config,
            cache,
            provisioner,
            calculator,
        }
    }
}
