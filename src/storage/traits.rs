//! Storage Trait Definitions
//!
//! Defines the persistent state store used by the confirmations engine.
//! Implementations can use SQLite, a JSON file, or memory (testing).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Confirmation, UnblindedPaymentToken, UnblindedToken};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Everything the engine persists: the token ledger and the retry queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationsSnapshot {
    /// Unspent tokens, oldest first
    #[serde(default)]
    pub unblinded_tokens: Vec<UnblindedToken>,
    /// Redeemed payment tokens
    #[serde(default)]
    pub unblinded_payment_tokens: Vec<UnblindedPaymentToken>,
    /// Retry queue, oldest first
    #[serde(default)]
    pub failed_confirmations: Vec<Confirmation>,
}

/// Confirmations state storage interface
///
/// Implementations:
/// - `SqliteStateStore` - Production storage with SQLite
/// - `JsonFileStateStore` - Single JSON document on disk
/// - `MemoryStateStore` - In-memory storage for testing
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the last saved snapshot, or an empty one on first run
    async fn load(&self) -> StorageResult<ConfirmationsSnapshot>;

    /// Replace the stored snapshot
    async fn save(&self, snapshot: &ConfirmationsSnapshot) -> StorageResult<()>;

    /// Get store type description
    fn store_type(&self) -> &'static str;
}
