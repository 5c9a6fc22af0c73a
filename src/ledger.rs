//! Token Ledger
//!
//! In-memory collections of unspent unblinded tokens and redeemed
//! payment tokens. Persistence is handled by
//! [`crate::confirmations::ConfirmationsState`], which saves after every
//! mutation made through it.

use std::collections::{HashSet, VecDeque};

use crate::types::{UnblindedPaymentToken, UnblindedToken};

/// Spendable tokens and redeemed payment tokens
#[derive(Debug, Clone, Default)]
pub struct TokenLedger {
    /// Unspent tokens, oldest first
    unblinded_tokens: VecDeque<UnblindedToken>,
    /// Redeemed payment tokens, in redemption order
    payment_tokens: Vec<UnblindedPaymentToken>,
    /// Index of payment token values
    payment_token_values: HashSet<String>,
}

impl TokenLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from persisted collections
    ///
    /// Duplicate payment tokens in persisted state are dropped.
    pub fn from_parts(
        unblinded_tokens: Vec<UnblindedToken>,
        payment_tokens: Vec<UnblindedPaymentToken>,
    ) -> Self {
        let mut ledger = Self::new();
        ledger.add_unblinded_tokens(unblinded_tokens);

        for token in payment_tokens {
            if let Err(e) = ledger.add_payment_token(token) {
                tracing::warn!(target: "confirmations::ledger", error = %e, "Dropping persisted payment token");
            }
        }

        ledger
    }

    /// Number of unspent tokens
    pub fn token_count(&self) -> usize {
        self.unblinded_tokens.len()
    }

    /// Check if there are no unspent tokens
    pub fn is_empty(&self) -> bool {
        self.unblinded_tokens.is_empty()
    }

    /// The token `take_token` would return next
    pub fn peek_token(&self) -> Option<&UnblindedToken> {
        self.unblinded_tokens.front()
    }

    /// Remove and return the oldest unspent token
    pub fn take_token(&mut self) -> Option<UnblindedToken> {
        self.unblinded_tokens.pop_front()
    }

    /// Add freshly issued tokens, skipping ones already held
    ///
    /// Returns the number of tokens added.
    pub fn add_unblinded_tokens(&mut self, tokens: impl IntoIterator<Item = UnblindedToken>) -> usize {
        let mut added = 0;

        for token in tokens {
            if self.unblinded_tokens.iter().any(|t| t.value == token.value) {
                continue;
            }
            self.unblinded_tokens.push_back(token);
            added += 1;
        }

        added
    }

    /// Unspent tokens, oldest first
    pub fn unblinded_tokens(&self) -> impl Iterator<Item = &UnblindedToken> {
        self.unblinded_tokens.iter()
    }

    /// Exact-match membership test on payment token value
    pub fn payment_token_exists(&self, token: &UnblindedPaymentToken) -> bool {
        self.payment_token_values.contains(&token.value)
    }

    /// Append a redeemed payment token
    pub fn add_payment_token(&mut self, token: UnblindedPaymentToken) -> Result<(), LedgerError> {
        if !self.payment_token_values.insert(token.value.clone()) {
            return Err(LedgerError::DuplicatePaymentToken(token.value));
        }

        self.payment_tokens.push(token);
        Ok(())
    }

    /// Prune payment tokens, returning how many were removed
    pub fn remove_payment_tokens(&mut self, tokens: &[UnblindedPaymentToken]) -> usize {
        let before = self.payment_tokens.len();

        let values: HashSet<&str> = tokens.iter().map(|t| t.value.as_str()).collect();
        self.payment_tokens.retain(|t| !values.contains(t.value.as_str()));
        self.payment_token_values
            .retain(|value| !values.contains(value.as_str()));

        before - self.payment_tokens.len()
    }

    /// Number of redeemed payment tokens
    pub fn payment_token_count(&self) -> usize {
        self.payment_tokens.len()
    }

    /// Redeemed payment tokens, in redemption order
    pub fn payment_tokens(&self) -> &[UnblindedPaymentToken] {
        &self.payment_tokens
    }
}

/// Ledger errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("duplicate unblinded payment token: {0}")]
    DuplicatePaymentToken(String),
}
