//! Confirmations State
//!
//! The exclusively owned handle over the token ledger and retry queue.
//! Every mutation is saved to the [`StateStore`] before the call returns.
//! A failed save is logged and the in-memory change is kept.

use std::sync::Arc;

use crate::common::logging::log_storage_failure;
use crate::confirmations::queue::{QueueError, RetryQueue};
use crate::ledger::{LedgerError, TokenLedger};
use crate::storage::{ConfirmationsSnapshot, StateStore, StorageError};
use crate::types::{Confirmation, UnblindedPaymentToken, UnblindedToken};

/// Ledger and retry queue, backed by a state store
pub struct ConfirmationsState {
    ledger: TokenLedger,
    retry_queue: RetryQueue,
    store: Arc<dyn StateStore>,
}

impl ConfirmationsState {
    /// Load state from a store
    ///
    /// Invalid queued confirmations are dropped with a warning.
    pub async fn load(store: Arc<dyn StateStore>) -> Result<Self, StorageError> {
        let snapshot = store.load().await?;

        let ledger = TokenLedger::from_parts(
            snapshot.unblinded_tokens,
            snapshot.unblinded_payment_tokens,
        );
        let (retry_queue, dropped) = RetryQueue::from_entries(snapshot.failed_confirmations);

        tracing::info!(
            target: "confirmations::state",
            store = store.store_type(),
            unblinded_tokens = ledger.token_count(),
            payment_tokens = ledger.payment_token_count(),
            failed_confirmations = retry_queue.len(),
            dropped,
            "Loaded confirmations state"
        );

        Ok(Self {
            ledger,
            retry_queue,
            store,
        })
    }

    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    pub fn retry_queue(&self) -> &RetryQueue {
        &self.retry_queue
    }

    pub fn store_type(&self) -> &'static str {
        self.store.store_type()
    }

    /// Spend the oldest unblinded token
    pub async fn take_unblinded_token(&mut self) -> Option<UnblindedToken> {
        let token = self.ledger.take_token()?;
        self.save().await;
        Some(token)
    }

    /// Add issued tokens, returning how many were new
    pub async fn add_unblinded_tokens(&mut self, tokens: Vec<UnblindedToken>) -> usize {
        let added = self.ledger.add_unblinded_tokens(tokens);
        if added > 0 {
            self.save().await;
        }
        added
    }

    pub fn payment_token_exists(&self, token: &UnblindedPaymentToken) -> bool {
        self.ledger.payment_token_exists(token)
    }

    /// Record a redeemed payment token
    pub async fn add_payment_token(
        &mut self,
        token: UnblindedPaymentToken,
    ) -> Result<(), LedgerError> {
        self.ledger.add_payment_token(token)?;
        self.save().await;
        Ok(())
    }

    /// Prune payment tokens, returning how many were removed
    pub async fn remove_payment_tokens(&mut self, tokens: &[UnblindedPaymentToken]) -> usize {
        let removed = self.ledger.remove_payment_tokens(tokens);
        if removed > 0 {
            self.save().await;
        }
        removed
    }

    /// Enqueue a confirmation for retry
    pub async fn append_failed_confirmation(
        &mut self,
        confirmation: Confirmation,
    ) -> Result<(), QueueError> {
        self.retry_queue.push(confirmation)?;
        self.save().await;
        Ok(())
    }

    /// Dequeue the oldest confirmation
    pub async fn pop_failed_confirmation(&mut self) -> Option<Confirmation> {
        let confirmation = self.retry_queue.pop_front()?;
        self.save().await;
        Some(confirmation)
    }

    /// Remove a queued confirmation by ID
    pub async fn remove_failed_confirmation(&mut self, id: &str) -> Option<Confirmation> {
        let confirmation = self.retry_queue.remove(id)?;
        self.save().await;
        Some(confirmation)
    }

    /// Current persisted form
    pub fn snapshot(&self) -> ConfirmationsSnapshot {
        ConfirmationsSnapshot {
            unblinded_tokens: self.ledger.unblinded_tokens().cloned().collect(),
            unblinded_payment_tokens: self.ledger.payment_tokens().to_vec(),
            failed_confirmations: self.retry_queue.to_vec(),
        }
    }

    /// Persist the full snapshot, returning whether the save succeeded
    pub async fn save(&self) -> bool {
        match self.store.save(&self.snapshot()).await {
            Ok(()) => true,
            Err(e) => {
                log_storage_failure(self.store.store_type(), &e.to_string());
                false
            }
        }
    }
}
