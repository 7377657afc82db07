//! Sending-quota and distribution engine
//!
//! Decides, for every outbound message, whether it may be sent now, which
//! sending identity should send it, and when to retry it if delivery fails.
//!
//! - [`ConfigProvisioner`]: per-identity limits, tiered by age and warmup
//! - [`QuotaCalculator`]: remaining daily/hourly/domain/burst capacity
//! - [`UsageRecorder`]: atomic usage updates and cache invalidation
//! - [`DistributionEngine`]: choose an identity with a pluggable strategy
//! - [`RetryScheduler`]: backoff with jitter for failed sends
//!
//! [`Engine`] wires them together over a [`sendgate_store::QuotaStore`] and
//! [`sendgate_store::IdentityRegistry`].

mod cache;
mod config;
mod distribution;
mod engine;
mod error;
mod provisioner;
mod quota;
mod recorder;
mod retry;
mod rng;
mod stats;

pub use cache::QuotaCache;
pub use config::EngineConfig;
pub use distribution::{DistributionEngine, DistributionStrategy, SelectionResult, StrategyKind};
pub use engine::{Engine, EngineBuilder};
pub use error::ProvisionError;
pub use provisioner::{ConfigProvisioner, IdentityTier};
pub use quota::{QuotaCalculator, SendingQuota};
pub use recorder::UsageRecorder;
pub use retry::{FailureReason, RetryDecision, RetryScheduler, SendRequest, SendStatus};
pub use rng::SharedRng;
pub use stats::{AggregatedStats, IdentityStats, StatsAggregator, TimeRange};
