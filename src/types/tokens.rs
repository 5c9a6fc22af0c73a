//! Privacy Token Types
//!
//! Newtypes for the credentials moving through the confirmation flow.
//! Values are base64 strings; the math producing them lives behind
//! [`crate::privacy::TokenCipher`].

use serde::{Deserialize, Serialize};

use super::confirmation::{AdType, ConfirmationType};

/// A fresh random token, generated per confirmation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A token after blinding, safe to show the signing server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlindedToken(String);

impl BlindedToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A spendable credential recovered from a blind signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnblindedToken {
    /// Base64 token preimage
    pub value: String,
    /// Issuer public key that signed it
    pub public_key: String,
}

impl UnblindedToken {
    pub fn new(value: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            public_key: public_key.into(),
        }
    }
}

/// Proof of reward received after a successful redemption
///
/// Two payment tokens are the same token when their `value` matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnblindedPaymentToken {
    /// Base64 token preimage
    pub value: String,
    /// Issuer public key that signed it
    pub public_key: String,
    /// Confirmation type that earned it
    pub confirmation_type: ConfirmationType,
    /// Ad type that earned it
    pub ad_type: AdType,
}

impl UnblindedPaymentToken {
    pub fn new(
        value: impl Into<String>,
        public_key: impl Into<String>,
        confirmation_type: ConfirmationType,
        ad_type: AdType,
    ) -> Self {
        Self {
            value: value.into(),
            public_key: public_key.into(),
            confirmation_type,
            ad_type,
        }
    }
}
