//! Shared types for the sendgate sending-quota engine.
//!
//! Everything that more than one crate in the workspace needs to agree on lives
//! here: identifier newtypes, the per-identity configuration value objects and
//! their validation, usage buckets and send-log entries, the injectable clock
//! and the logging setup.

pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod id;
pub mod identity;
pub mod logging;
pub mod priority;
pub mod usage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BackoffStrategy, RateLimitConfig, RateLimitConfigPatch, RetryConfig, DEFAULT_RETRYABLE_ERRORS,
};
pub use domain::Domain;
pub use error::{FieldViolation, ValidationError};
pub use id::{IdentityId, TenantId};
pub use identity::{Identity, WarmupStatus};
pub use priority::Priority;
pub use tracing;
pub use usage::{BucketKey, SendLogEntry, UsageIncrement, UsageRecord};
