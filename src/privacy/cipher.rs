//! Token Cipher
//!
//! Generates, blinds and spends privacy tokens.
//! The digest cipher is a local stand-in; production issuers plug a
//! VOPRF implementation in behind the same trait.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{BlindedToken, Token, UnblindedToken};

/// Size of a freshly generated token preimage
pub const TOKEN_PREIMAGE_LENGTH: usize = 64;

const BLINDING_DOMAIN: &[u8] = b"confirmations-blind-v1";

/// Trait for token ciphers
pub trait TokenCipher: Send + Sync {
    /// Generate `count` fresh random tokens
    fn generate(&self, count: usize) -> Vec<Token>;

    /// Blind tokens before they leave the client
    fn blind(&self, tokens: &[Token]) -> Vec<BlindedToken>;

    /// Sign a request payload with a spent token
    fn create_credential(
        &self,
        unblinded_token: &UnblindedToken,
        payload: &str,
    ) -> Result<String, CipherError>;

    /// Get cipher type description
    fn cipher_type(&self) -> &'static str;
}

/// Decoded credential body
#[derive(Debug, Serialize, Deserialize)]
struct CredentialBody {
    signature: String,
    t: String,
}

/// SHA-256 based cipher
#[derive(Debug, Clone, Default)]
pub struct DigestTokenCipher;

impl DigestTokenCipher {
    pub fn new() -> Self {
        Self
    }

    fn sign(preimage: &[u8], payload: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(preimage);
        hasher.update(payload.as_bytes());
        STANDARD.encode(hasher.finalize())
    }

    /// Check that `credential` was produced for `payload`
    pub fn verify_credential(&self, credential: &str, payload: &str) -> Result<bool, CipherError> {
        let json = STANDARD
            .decode(credential)
            .map_err(|e| CipherError::InvalidCredential(e.to_string()))?;
        let body: CredentialBody = serde_json::from_slice(&json)?;

        let preimage = STANDARD
            .decode(&body.t)
            .map_err(|e| CipherError::InvalidToken(e.to_string()))?;

        Ok(Self::sign(&preimage, payload) == body.signature)
    }

    /// Recover the token preimage a credential was signed with
    pub fn credential_token(&self, credential: &str) -> Result<String, CipherError> {
        let json = STANDARD
            .decode(credential)
            .map_err(|e| CipherError::InvalidCredential(e.to_string()))?;
        let body: CredentialBody = serde_json::from_slice(&json)?;
        Ok(body.t)
    }
}

impl TokenCipher for DigestTokenCipher {
    fn generate(&self, count: usize) -> Vec<Token> {
        let mut rng = rand::thread_rng();

        (0..count)
            .map(|_| {
                let mut preimage = [0u8; TOKEN_PREIMAGE_LENGTH];
                rng.fill_bytes(&mut preimage);
                Token::new(STANDARD.encode(preimage))
            })
            .collect()
    }

    fn blind(&self, tokens: &[Token]) -> Vec<BlindedToken> {
        tokens
            .iter()
            .map(|token| {
                let mut hasher = Sha256::new();
                hasher.update(BLINDING_DOMAIN);
                hasher.update(token.as_str().as_bytes());
                BlindedToken::new(STANDARD.encode(hasher.finalize()))
            })
            .collect()
    }

    fn create_credential(
        &self,
        unblinded_token: &UnblindedToken,
        payload: &str,
    ) -> Result<String, CipherError> {
        let preimage = STANDARD
            .decode(&unblinded_token.value)
            .map_err(|e| CipherError::InvalidToken(e.to_string()))?;

        let body = CredentialBody {
            signature: Self::sign(&preimage, payload),
            t: unblinded_token.value.clone(),
        };

        let json = serde_json::to_vec(&body)?;
        Ok(STANDARD.encode(json))
    }

    fn cipher_type(&self) -> &'static str {
        "sha256-digest"
    }
}

/// Cipher errors
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
