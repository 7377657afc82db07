//! Quota calculation metrics

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Meter},
};

/// Quota metrics collector
#[derive(Debug)]
pub struct QuotaMetrics {
    /// Quota checks by outcome (`available`, `unavailable`, `fail_closed`)
    checks_total: Counter<u64>,

    /// Quota cache lookups by result (`hit`, `miss`)
    cache_lookups_total: Counter<u64>,

    /// Default configs created on first use, by tier
    provisioned_total: Counter<u64>,
}

impl QuotaMetrics {
    /// Create the quota instruments on the global meter provider
    #[must_use]
    pub fn new() -> Self {
        let meter = meter();

        let checks_total = meter
            .u64_counter("sendgate.quota.checks.total")
            .with_description("Quota checks by outcome")
            .build();

        let cache_lookups_total = meter
            .u64_counter("sendgate.quota.cache.lookups.total")
            .with_description("Quota cache lookups by result")
            .build();

        let provisioned_total = meter
            .u64_counter("sendgate.quota.configs.provisioned.total")
            .with_description("Default rate-limit configs created, by tier")
            .build();

        Self {
            checks_total,
            cache_lookups_total,
            provisioned_total,
        }
    }

    /// Record the outcome of one quota check
    pub fn record_check(&self, outcome: &'static str, priority: &'static str) {
        self.checks_total.add(
            1,
            &[
                KeyValue::new("outcome", outcome),
                KeyValue::new("priority", priority),
            ],
        );
    }

    pub fn record_cache_hit(&self) {
        self.cache_lookups_total
            .add(1, &[KeyValue::new("result", "hit")]);
    }

    pub fn record_cache_miss(&self) {
        self.cache_lookups_total
            .add(1, &[KeyValue::new("result", "miss")]);
    }

    pub fn record_provisioned(&self, tier: &'static str) {
        self.provisioned_total
            .add(1, &[KeyValue::new("tier", tier)]);
    }
}

impl Default for QuotaMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Get the OpenTelemetry meter for quota metrics
fn meter() -> Meter {
    opentelemetry::global::meter("sendgate.quota")
}
