//! Registry records for sending identities

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{IdentityId, TenantId};

/// Progress of an identity through its reputation warmup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

/// A sending identity as supplied by the identity registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub tenant: TenantId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub warmup: WarmupStatus,
}

impl Identity {
    #[must_use]
    pub fn new(
        id: impl Into<IdentityId>,
        tenant: impl Into<TenantId>,
        created_at: DateTime<Utc>,
        warmup: WarmupStatus,
    ) -> Self {
        Self {
            id: id.into(),
            tenant: tenant.into(),
            created_at,
            warmup,
        }
    }

    /// Age of the identity at `now`, clamped at zero for clock skew
    #[must_use]
    pub fn age_at(&self, now: DateTime<Utc>) -> TimeDelta {
        (now - self.created_at).max(TimeDelta::zero())
    }
}
