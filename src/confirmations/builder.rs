//! Confirmation Builder
//!
//! Turns a transaction plus gathered user data into a [`Confirmation`].
//! When the user is rewarded and a token is available, exactly one token is
//! spent from the ledger and a credential is attached. The spend is final:
//! the token is gone even if the confirmation is never delivered.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::confirmations::payload::confirmation_request_payload;
use crate::confirmations::policy::{RewardPolicy, StaticRewardPolicy};
use crate::confirmations::state::ConfirmationsState;
use crate::privacy::{DigestTokenCipher, TokenCipher};
use crate::types::{Confirmation, TransactionInfo};

/// Builder errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),
}

/// Upper bound on tokens generated for one confirmation
pub const MAX_TOKENS_PER_CONFIRMATION: usize = 100;

/// Number of tokens to generate for a confirmation of `value`
///
/// Falls back to a single token when the value is not positive or no
/// usable denomination is known. Never exceeds
/// [`MAX_TOKENS_PER_CONFIRMATION`].
pub fn token_count_for_value(value: f64, smallest_denomination: Option<f64>) -> usize {
    if !value.is_finite() || value <= 0.0 {
        return 1;
    }

    match smallest_denomination {
        Some(denomination) if denomination.is_finite() && denomination > 0.0 => {
            let count = (value / denomination).ceil();
            if count >= MAX_TOKENS_PER_CONFIRMATION as f64 {
                MAX_TOKENS_PER_CONFIRMATION
            } else {
                (count as usize).max(1)
            }
        }
        _ => 1,
    }
}

/// Confirmation builder
pub struct ConfirmationBuilder {
    cipher: Arc<dyn TokenCipher>,
    policy: Arc<dyn RewardPolicy>,
}

impl ConfirmationBuilder {
    pub fn new(cipher: Arc<dyn TokenCipher>, policy: Arc<dyn RewardPolicy>) -> Self {
        Self { cipher, policy }
    }

    pub fn with_token_cipher(mut self, cipher: Arc<dyn TokenCipher>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn with_reward_policy(mut self, policy: Arc<dyn RewardPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn cipher_type(&self) -> &'static str {
        self.cipher.cipher_type()
    }

    /// Build a confirmation with a fresh ID
    pub async fn build(
        &self,
        state: &mut ConfirmationsState,
        transaction: &TransactionInfo,
        created_at: DateTime<Utc>,
        user_data: &serde_json::Value,
    ) -> Result<Confirmation, BuildError> {
        if !transaction.is_valid() {
            return Err(BuildError::InvalidTransaction(transaction.id.clone()));
        }

        let mut confirmation = Confirmation {
            id: uuid::Uuid::new_v4().to_string(),
            transaction_id: transaction.id.clone(),
            creative_instance_id: transaction.creative_instance_id.clone(),
            confirmation_type: transaction.confirmation_type,
            ad_type: transaction.ad_type,
            value: transaction.value,
            created_at,
            user_data: user_data.to_string(),
            ..Default::default()
        };

        if !self.policy.should_reward_user() {
            return Ok(confirmation);
        }

        let unblinded_token = match state.ledger().peek_token() {
            Some(token) => token.clone(),
            None => {
                tracing::debug!(
                    target: "confirmations::builder",
                    transaction_id = %transaction.id,
                    "No unblinded tokens, building unrewarded confirmation"
                );
                return Ok(confirmation);
            }
        };

        let token_count =
            token_count_for_value(transaction.value, self.policy.smallest_payment_denomination());
        let tokens = self.cipher.generate(token_count);

        confirmation.blinded_tokens = self.cipher.blind(&tokens);
        confirmation.tokens = tokens;

        let payload = confirmation_request_payload(&confirmation);
        let credential = match self.cipher.create_credential(&unblinded_token, &payload) {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!(
                    target: "confirmations::builder",
                    transaction_id = %transaction.id,
                    error = %e,
                    "Failed to create credential, building unrewarded confirmation"
                );
                confirmation.tokens.clear();
                confirmation.blinded_tokens.clear();
                return Ok(confirmation);
            }
        };

        // point of no return
        let spent = state.take_unblinded_token().await;
        debug_assert_eq!(spent.as_ref(), Some(&unblinded_token));

        confirmation.unblinded_token = Some(unblinded_token);
        confirmation.credential = Some(credential);
        confirmation.was_created = true;

        tracing::debug!(
            target: "confirmations::builder",
            confirmation_id = %confirmation.id,
            transaction_id = %confirmation.transaction_id,
            token_count,
            remaining_tokens = state.ledger().token_count(),
            "Spent unblinded token"
        );

        Ok(confirmation)
    }
}

impl Default for ConfirmationBuilder {
    fn default() -> Self {
        Self::new(
            Arc::new(DigestTokenCipher::new()),
            Arc::new(StaticRewardPolicy::default()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privacy::CipherError;
    use crate::storage::MemoryStateStore;
    use crate::types::{AdType, ConfirmationType, Token, BlindedToken, UnblindedToken};

    fn transaction() -> TransactionInfo {
        TransactionInfo::new(
            "tx_1",
            "creative_1",
            5.0,
            ConfirmationType::Viewed,
            AdType::AdNotification,
        )
    }

    async fn state_with_tokens(count: usize) -> (ConfirmationsState, MemoryStateStore) {
        let store = MemoryStateStore::new();
        let mut state = ConfirmationsState::load(Arc::new(store.clone())).await.unwrap();
        let cipher = DigestTokenCipher::new();
        let tokens = cipher
            .generate(count)
            .into_iter()
            .map(|t| UnblindedToken::new(t.as_str(), "issuer"))
            .collect();
        state.add_unblinded_tokens(tokens).await;
        (state, store)
    }

    struct FailingCipher;

    impl TokenCipher for FailingCipher {
        fn generate(&self, count: usize) -> Vec<Token> {
            (0..count).map(|i| Token::new(format!("t{}", i))).collect()
        }

        fn blind(&self, tokens: &[Token]) -> Vec<BlindedToken> {
            tokens.iter().map(|t| BlindedToken::new(t.as_str())).collect()
        }

        fn create_credential(&self, _: &UnblindedToken, _: &str) -> Result<String, CipherError> {
            Err(CipherError::InvalidToken("broken".to_string()))
        }

        fn cipher_type(&self) -> &'static str {
            "failing"
        }
    }

    #[test]
    fn test_token_count_for_value() {
        assert_eq!(token_count_for_value(5.0, Some(2.0)), 3);
        assert_eq!(token_count_for_value(4.0, Some(2.0)), 2);
        assert_eq!(token_count_for_value(0.0, Some(2.0)), 1);
        assert_eq!(token_count_for_value(-1.0, Some(2.0)), 1);
        assert_eq!(token_count_for_value(5.0, None), 1);
        assert_eq!(token_count_for_value(5.0, Some(0.0)), 1);
        assert_eq!(token_count_for_value(f64::NAN, Some(2.0)), 1);
    }

    #[test]
    fn test_token_count_is_capped() {
        assert_eq!(token_count_for_value(99.0, Some(1.0)), 99);
        assert_eq!(token_count_for_value(100.0, Some(1.0)), MAX_TOKENS_PER_CONFIRMATION);
        assert_eq!(token_count_for_value(101.0, Some(1.0)), MAX_TOKENS_PER_CONFIRMATION);
        assert_eq!(token_count_for_value(1.0e12, Some(0.25)), MAX_TOKENS_PER_CONFIRMATION);
        assert_eq!(token_count_for_value(1.0e300, Some(1.0e-10)), MAX_TOKENS_PER_CONFIRMATION);
    }

    #[tokio::test]
    async fn test_build_spends_one_token() {
        let (mut state, store) = state_with_tokens(2).await;
        let builder = ConfirmationBuilder::default().with_reward_policy(Arc::new(
            StaticRewardPolicy::new(true, Some(2.0)),
        ));
        let saves_before = store.save_count();

        let confirmation = builder
            .build(&mut state, &transaction(), Utc::now(), &serde_json::json!({"a": 1}))
            .await
            .unwrap();

        assert!(confirmation.is_valid());
        assert!(confirmation.is_rewarded());
        assert!(confirmation.was_created);
        assert_eq!(confirmation.tokens.len(), 3);
        assert_eq!(confirmation.blinded_tokens.len(), 3);
        assert_eq!(confirmation.user_data, r#"{"a":1}"#);
        assert_eq!(state.ledger().token_count(), 1);
        assert_eq!(store.save_count(), saves_before + 1);

        let payload = confirmation_request_payload(&confirmation);
        let cipher = DigestTokenCipher::new();
        assert!(cipher
            .verify_credential(confirmation.credential.as_deref().unwrap(), &payload)
            .unwrap());
    }

    #[tokio::test]
    async fn test_build_without_tokens_is_unrewarded() {
        let (mut state, _store) = state_with_tokens(0).await;
        let builder = ConfirmationBuilder::default();

        let confirmation = builder
            .build(&mut state, &transaction(), Utc::now(), &serde_json::json!({}))
            .await
            .unwrap();

        assert!(confirmation.is_valid());
        assert!(!confirmation.is_rewarded());
        assert!(!confirmation.was_created);
        assert!(confirmation.unblinded_token.is_none());
        assert!(confirmation.credential.is_none());
        assert_eq!(confirmation.confirmation_type, ConfirmationType::Viewed);
        assert_eq!(confirmation.ad_type, AdType::AdNotification);
    }

    #[tokio::test]
    async fn test_rewards_disabled_spends_nothing() {
        let (mut state, _store) = state_with_tokens(1).await;
        let builder = ConfirmationBuilder::default()
            .with_reward_policy(Arc::new(StaticRewardPolicy::disabled()));

        let confirmation = builder
            .build(&mut state, &transaction(), Utc::now(), &serde_json::json!({}))
            .await
            .unwrap();

        assert!(!confirmation.was_created);
        assert_eq!(state.ledger().token_count(), 1);
    }

    #[tokio::test]
    async fn test_credential_failure_keeps_token() {
        let (mut state, _store) = state_with_tokens(1).await;
        let builder = ConfirmationBuilder::default().with_token_cipher(Arc::new(FailingCipher));

        let confirmation = builder
            .build(&mut state, &transaction(), Utc::now(), &serde_json::json!({}))
            .await
            .unwrap();

        assert!(!confirmation.is_rewarded());
        assert!(confirmation.tokens.is_empty());
        assert_eq!(state.ledger().token_count(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_gets_new_id() {
        let (mut state, _store) = state_with_tokens(0).await;
        let builder = ConfirmationBuilder::default();
        let created_at = Utc::now();

        let first = builder
            .build(&mut state, &transaction(), created_at, &serde_json::json!({}))
            .await
            .unwrap();
        let second = builder
            .build(&mut state, &first.transaction(), first.created_at, &serde_json::json!({}))
            .await
            .unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(first.transaction_id, second.transaction_id);
        assert_eq!(first.creative_instance_id, second.creative_instance_id);
        assert_eq!(first.value, second.value);
        assert_eq!(first.created_at, second.created_at);
        assert!(!second.was_created);
    }

    #[tokio::test]
    async fn test_invalid_transaction_rejected() {
        let (mut state, _store) = state_with_tokens(1).await;
        let mut invalid = transaction();
        invalid.creative_instance_id.clear();

        let result = ConfirmationBuilder::default()
            .build(&mut state, &invalid, Utc::now(), &serde_json::json!({}))
            .await;

        assert!(matches!(result, Err(BuildError::InvalidTransaction(_))));
        assert_eq!(state.ledger().token_count(), 1);
    }
}
