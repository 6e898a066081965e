//! Store implementations
//!
//! `memory` keeps everything in process and is used by tests and ephemeral
//! agents. The SQLite-backed stores live in [`crate::db`].

pub mod memory;

pub use memory::{MemoryActorStore, MemoryFragmentStore, MemorySessionStore};
