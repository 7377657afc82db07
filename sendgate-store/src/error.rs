//! Error types for the sendgate-store crate.

use thiserror::Error;

/// Data-access failure.
///
/// Callers in the engine never surface these as hard failures: quota checks
/// degrade to a fail-closed view and recording failures are logged.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend could not be reached.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Backend did not answer within its own deadline.
    #[error("Storage operation timed out: {0}")]
    Timeout(String),

    /// Stored data could not be interpreted.
    #[error("Corrupted record: {0}")]
    Corrupted(String),

    /// Internal error (invariant broken inside a backend).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
