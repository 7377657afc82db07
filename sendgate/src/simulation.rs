//! In-memory engine runs driven by a manual clock

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use sendgate_common::{Clock, Domain, IdentityId, ManualClock, Priority, TenantId};
use sendgate_quota::{DistributionStrategy, Engine};
use sendgate_store::MemoryStore;
use serde::Serialize;
use tracing::debug;

use crate::Settings;

/// One message of a simulated run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationStep {
    pub index: u32,
    /// When the message was sent
    pub at: DateTime<Utc>,
    pub identity: IdentityId,
    /// Set when no identity was free and the clock had to jump forward
    pub deferred_until: Option<DateTime<Utc>>,
}

/// An engine over a [`MemoryStore`] seeded from [`Settings`]
///
/// Time only moves when told to, so runs are reproducible given an
/// `rng_seed`.
#[derive(Debug)]
pub struct Sendgate {
    clock: Arc<ManualClock>,
    engine: Engine,
    strategy: DistributionStrategy,
}

impl Sendgate {
    #[must_use]
    pub fn new(settings: Settings, start: DateTime<Utc>) -> Self {
        let clock = Arc::new(ManualClock::new(start));
        let backend = Arc::new(MemoryStore::with_identities(settings.identities));

        let engine = Engine::builder(backend.clone(), backend)
            .clock(clock.clone())
            .config(settings.engine)
            .build();

        Self {
            clock,
            engine,
            strategy: settings.strategy,
        }
    }

    #[must_use]
    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The strategy from the configuration file
    #[must_use]
    pub const fn default_strategy(&self) -> &DistributionStrategy {
        &self.strategy
    }

    /// Send `count` messages to `domain`, one every `interval`
    ///
    /// Each message goes to the selected identity. When every identity is
    /// exhausted the clock jumps to the earliest slot. Stops early if the
    /// tenant has no identities.
    pub async fn simulate(
        &self,
        tenant: &TenantId,
        domain: &Domain,
        strategy: &DistributionStrategy,
        count: u32,
        interval: TimeDelta,
    ) -> Vec<SimulationStep> {
        let mut steps = Vec::new();

        for index in 0..count {
            let Some(mut selection) = self
                .engine
                .select_identity(tenant, domain, strategy, Priority::Normal)
                .await
            else {
                break;
            };

            let deferred_until = selection.scheduled_for;
            if let Some(slot) = deferred_until {
                self.clock.set(slot);
                // The slot may free a different identity first
                if let Some(retry) = self
                    .engine
                    .select_identity(tenant, domain, strategy, Priority::Normal)
                    .await
                {
                    selection = retry;
                }
                if selection.scheduled_for.is_some() {
                    debug!(index, slot = %slot, "Identity still unavailable at its slot");
                }
            }

            self.engine
                .record_send(&selection.identity, domain, true, None)
                .await;

            steps.push(SimulationStep {
                index,
                at: self.clock.now(),
                identity: selection.identity,
                deferred_until,
            });

            self.clock.advance(interval);
        }

        steps
    }
}
