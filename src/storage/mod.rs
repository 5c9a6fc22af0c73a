//! Storage Layer Module
//!
//! Provides persistence for the token ledger and retry queue.
//!
//! This module contains:
//! - Storage trait definitions for abstraction
//! - SQLite implementation for production
//! - JSON file implementation
//! - In-memory implementation for testing

pub mod file;
pub mod memory;
pub mod sqlite;
pub mod traits;

// Re-exports for convenience
pub use file::JsonFileStateStore;
pub use memory::MemoryStateStore;
pub use sqlite::SqliteStateStore;
pub use traits::{ConfirmationsSnapshot, StateStore, StorageError, StorageResult};

#[cfg(test)]
pub use traits::MockStateStore;
