//! Shared Types Module
//!
//! Data types shared across the confirmations engine.

pub mod confirmation;
pub mod tokens;
pub mod transaction;

// Re-exports for convenience
pub use confirmation::{AdType, Confirmation, ConfirmationType, ParseTypeError};
pub use tokens::{BlindedToken, Token, UnblindedPaymentToken, UnblindedToken};
pub use transaction::TransactionInfo;
