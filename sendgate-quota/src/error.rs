//! Errors surfaced by configuration provisioning.

use sendgate_common::{IdentityId, ValidationError};
use sendgate_store::StoreError;
use thiserror::Error;

/// Failure to load, derive or update an identity's configuration.
///
/// Only [`ProvisionError::Validation`] is meant for callers to act on; the quota
/// path turns every other variant into a fail-closed quota.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The update would put one or more limits out of range; nothing was stored.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No stored config and the registry does not know the identity.
    #[error("Unknown identity: {0}")]
    UnknownIdentity(IdentityId),

    /// Underlying storage failed.
    #[error("Data access error: {0}")]
    Store(#[from] StoreError),
}

impl ProvisionError {
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
