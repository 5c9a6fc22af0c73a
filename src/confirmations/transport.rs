//! Redemption Transport
//!
//! Boundary to the server that redeems confirmations. The transport alone
//! decides whether a failure is worth retrying.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};

use crate::confirmations::payload::confirmation_request_payload;
use crate::privacy::DigestTokenCipher;
use crate::types::{Confirmation, UnblindedPaymentToken};

/// Result of one redemption attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedemptionOutcome {
    /// Token redeemed; server returned a payment token
    Redeemed(UnblindedPaymentToken),
    /// Unrewarded confirmation delivered
    Sent,
    /// Attempt failed
    Failed { should_retry: bool },
    /// Server rejected the token issuers as stale
    IssuersOutOfDate,
}

impl RedemptionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Redeemed(_) | Self::Sent)
    }
}

impl std::fmt::Display for RedemptionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Redeemed(_) => write!(f, "redeemed"),
            Self::Sent => write!(f, "sent"),
            Self::Failed { should_retry: true } => write!(f, "failed (retry)"),
            Self::Failed { should_retry: false } => write!(f, "failed"),
            Self::IssuersOutOfDate => write!(f, "issuers out of date"),
        }
    }
}

/// Trait for redemption transports
#[async_trait]
pub trait RedemptionTransport: Send + Sync {
    /// Submit a confirmation for redemption
    async fn redeem(&self, confirmation: &Confirmation) -> RedemptionOutcome;

    /// Get transport type description
    fn transport_type(&self) -> &'static str;
}

/// Local stand-in for the redemption server
///
/// Verifies credentials and derives a payment token from the spent token
/// and confirmation ID. Retryable failures can be injected at a rate.
pub struct SimulatedTransport {
    cipher: DigestTokenCipher,
    public_key: String,
    failure_rate: f64,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        let public_key = hex::encode(Sha256::digest(b"simulated-payments-issuer"));

        Self {
            cipher: DigestTokenCipher::new(),
            public_key,
            failure_rate: 0.0,
        }
    }

    /// Fail a fraction of attempts with a retryable error
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Issuer public key attached to payment tokens
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    fn payment_token_for(&self, confirmation: &Confirmation, token: &str) -> UnblindedPaymentToken {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hasher.update(confirmation.id.as_bytes());

        UnblindedPaymentToken::new(
            STANDARD.encode(hasher.finalize()),
            self.public_key.clone(),
            confirmation.confirmation_type,
            confirmation.ad_type,
        )
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RedemptionTransport for SimulatedTransport {
    async fn redeem(&self, confirmation: &Confirmation) -> RedemptionOutcome {
        if !confirmation.is_valid() {
            return RedemptionOutcome::Failed { should_retry: false };
        }

        if self.failure_rate > 0.0 && rand::random::<f64>() < self.failure_rate {
            tracing::debug!(
                target: "confirmations::transport",
                confirmation_id = %confirmation.id,
                "Simulated server failure"
            );
            return RedemptionOutcome::Failed { should_retry: true };
        }

        let credential = match &confirmation.credential {
            Some(credential) if confirmation.is_rewarded() => credential,
            _ => return RedemptionOutcome::Sent,
        };

        let payload = confirmation_request_payload(confirmation);
        match self.cipher.verify_credential(credential, &payload) {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                tracing::warn!(
                    target: "confirmations::transport",
                    confirmation_id = %confirmation.id,
                    "Credential does not match request payload"
                );
                return RedemptionOutcome::Failed { should_retry: false };
            }
        }

        match self.cipher.credential_token(credential) {
            Ok(token) => RedemptionOutcome::Redeemed(self.payment_token_for(confirmation, &token)),
            Err(_) => RedemptionOutcome::Failed { should_retry: false },
        }
    }

    fn transport_type(&self) -> &'static str {
        "simulated"
    }
}
