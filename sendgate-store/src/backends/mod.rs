//! Backend storage implementations
//!
//! - `memory`: In-memory storage for tests, the CLI and single-process embedding
//! - `test`: Memory storage with failure injection

pub mod memory;

pub use memory::MemoryStore;
pub use test::TestStore;
