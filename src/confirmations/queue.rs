//! Retry Queue
//!
//! Ordered set of confirmations whose redemption failed and should be
//! retried. Oldest entries are drained first.

use std::collections::VecDeque;

use crate::types::Confirmation;

/// FIFO of failed confirmations
#[derive(Debug, Clone, Default)]
pub struct RetryQueue {
    entries: VecDeque<Confirmation>,
}

impl RetryQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a queue from persisted entries, dropping invalid ones
    ///
    /// Returns the queue and the number of entries dropped.
    pub fn from_entries(entries: Vec<Confirmation>) -> (Self, usize) {
        let mut queue = Self::new();
        let mut dropped = 0;

        for confirmation in entries {
            if let Err(e) = queue.push(confirmation) {
                tracing::warn!(target: "confirmations::queue", error = %e, "Dropping persisted confirmation");
                dropped += 1;
            }
        }

        (queue, dropped)
    }

    /// Append a confirmation to the tail
    pub fn push(&mut self, confirmation: Confirmation) -> Result<(), QueueError> {
        if !confirmation.is_valid() {
            return Err(QueueError::InvalidConfirmation(confirmation.id));
        }

        if self.contains(&confirmation.id) {
            return Err(QueueError::Duplicate(confirmation.id));
        }

        self.entries.push_back(confirmation);
        Ok(())
    }

    /// Oldest entry
    pub fn front(&self) -> Option<&Confirmation> {
        self.entries.front()
    }

    /// Remove and return the oldest entry
    pub fn pop_front(&mut self) -> Option<Confirmation> {
        self.entries.pop_front()
    }

    /// Remove an entry by confirmation ID
    pub fn remove(&mut self, id: &str) -> Option<Confirmation> {
        let index = self.entries.iter().position(|c| c.id == id)?;
        self.entries.remove(index)
    }

    /// Check for an entry by confirmation ID
    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|c| c.id == id)
    }

    /// Get queue length
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Confirmation> {
        self.entries.iter()
    }

    /// Entries as a vector, oldest first
    pub fn to_vec(&self) -> Vec<Confirmation> {
        self.entries.iter().cloned().collect()
    }
}

/// Queue errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("invalid confirmation: {0:?}")]
    InvalidConfirmation(String),

    #[error("confirmation already queued: {0}")]
    Duplicate(String),
}
