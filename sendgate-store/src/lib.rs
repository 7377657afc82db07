//! Persistence boundary for the sending-quota engine
//!
//! The engine talks to storage only through the two narrow traits in
//! [`r#trait`]: [`QuotaStore`] for configuration, usage buckets and the send
//! log, and [`IdentityRegistry`] for the identities a tenant may send from.
//! [`MemoryStore`] implements both and is what tests and the CLI run against;
//! [`TestStore`] wraps it to inject data-access failures.

pub mod backends;
pub mod error;
pub mod r#trait;

pub use backends::{MemoryStore, TestStore};
pub use error::{Result, StoreError};
pub use r#trait::{IdentityRegistry, QuotaStore};
