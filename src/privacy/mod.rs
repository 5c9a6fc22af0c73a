//! Privacy Token Module
//!
//! Boundary to the token blinding and credential primitives.

pub mod cipher;

pub use cipher::{CipherError, DigestTokenCipher, TokenCipher, TOKEN_PREIMAGE_LENGTH};
