use std::{fmt, str::FromStr};

use ahash::AHashMap;
use sendgate_common::IdentityId;
use serde::{Deserialize, Serialize};

/// How an available identity is chosen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Rotate through available identities, per tenant
    #[default]
    RoundRobin,
    /// Most daily capacity left
    LeastUsed,
    /// Random, proportional to configured weights
    Weighted,
    /// Highest configured priority
    Priority,
}

impl StrategyKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LeastUsed => "least_used",
            Self::Weighted => "weighted",
            Self::Priority => "priority",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "round_robin" => Ok(Self::RoundRobin),
            "least_used" => Ok(Self::LeastUsed),
            "weighted" => Ok(Self::Weighted),
            "priority" => Ok(Self::Priority),
            other => Err(format!("unknown distribution strategy: {other}")),
        }
    }
}

/// Strategy plus its per-identity parameters
///
/// ```ron
/// (
///     kind: weighted,
///     weights: { "id-a": 3, "id-b": 1 },
///     exclude: ["id-c"],
/// )
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionStrategy {
    pub kind: StrategyKind,
    /// Relative weights for `weighted`; identities not listed weigh 1
    pub weights: AHashMap<IdentityId, u32>,
    /// Priorities for `priority`; identities not listed rank 0
    pub priorities: AHashMap<IdentityId, i32>,
    /// Never selected
    pub exclude: Vec<IdentityId>,
    /// Ordered ahead of other candidates, and chosen among first when any is available
    pub prefer: Vec<IdentityId>,
}

impl DistributionStrategy {
    #[must_use]
    pub fn new(kind: StrategyKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_weight(mut self, identity: impl Into<IdentityId>, weight: u32) -> Self {
        self.weights.insert(identity.into(), weight);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, identity: impl Into<IdentityId>, priority: i32) -> Self {
        self.priorities.insert(identity.into(), priority);
        self
    }

    #[must_use]
    pub fn excluding(mut self, identity: impl Into<IdentityId>) -> Self {
        self.exclude.push(identity.into());
        self
    }

    #[must_use]
    pub fn preferring(mut self, identity: impl Into<IdentityId>) -> Self {
        self.prefer.push(identity.into());
        self
    }

    #[must_use]
    pub fn weight_of(&self, identity: &IdentityId) -> u32 {
        self.weights.get(identity).copied().unwrap_or(1)
    }

    #[must_use]
    pub fn priority_of(&self, identity: &IdentityId) -> i32 {
        self.priorities.get(identity).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn is_excluded(&self, identity: &IdentityId) -> bool {
        self.exclude.contains(identity)
    }

    #[must_use]
    pub fn is_preferred(&self, identity: &IdentityId) -> bool {
        self.prefer.contains(identity)
    }

    /// Drop excluded identities and move preferred ones to the front, keeping
    /// registry order within each group
    #[must_use]
    pub fn order(&self, candidates: Vec<IdentityId>) -> Vec<IdentityId> {
        let (preferred, rest): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .filter(|id| !self.is_excluded(id))
            .partition(|id| self.is_preferred(id));

        preferred.into_iter().chain(rest).collect()
    }
}
