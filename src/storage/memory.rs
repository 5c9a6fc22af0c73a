//! In-Memory Storage Implementation
//!
//! Provides in-memory storage for testing and development.
//! Data is lost when the process exits.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{ConfirmationsSnapshot, StateStore, StorageResult};

/// In-memory confirmations state store
///
/// Clones share the same underlying snapshot, so a test can keep a
/// handle while the engine owns another.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    snapshot: Arc<RwLock<ConfirmationsSnapshot>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryStateStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with a snapshot
    pub fn with_snapshot(snapshot: ConfirmationsSnapshot) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(snapshot)),
            saves: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Last saved snapshot
    pub async fn snapshot(&self) -> ConfirmationsSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> StorageResult<ConfirmationsSnapshot> {
        Ok(self.snapshot.read().await.clone())
    }

    async fn save(&self, snapshot: &ConfirmationsSnapshot) -> StorageResult<()> {
        *self.snapshot.write().await = snapshot.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}
