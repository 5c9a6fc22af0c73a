//! Common Error Types for the Confirmations Engine
//!
//! Provides unified error handling across all modules.

use thiserror::Error;

use crate::confirmations::{BuildError, EngineError, QueueError};
use crate::ledger::LedgerError;
use crate::privacy::CipherError;
use crate::storage::StorageError;

/// Root error type
#[derive(Debug, Error)]
pub enum ConfirmationsError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] super::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] super::logging::LoggingError),

    /// Storage errors
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Token ledger errors
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Retry queue errors
    #[error("retry queue error: {0}")]
    Queue(#[from] QueueError),

    /// Confirmation build errors
    #[error("build error: {0}")]
    Build(#[from] BuildError),

    /// Token cipher errors
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    /// Engine errors
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Validation errors
    #[error("validation error: {0}")]
    Validation(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfirmationsError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConfirmationsError::Storage(
                StorageError::Database(_) | StorageError::Connection(_) | StorageError::Io(_)
            ) | ConfirmationsError::Io(_)
        )
    }

    /// Get error code
    pub fn error_code(&self) -> &'static str {
        match self {
            ConfirmationsError::Config(_) => "CONFIG_ERROR",
            ConfirmationsError::Logging(_) => "LOGGING_ERROR",
            ConfirmationsError::Storage(_) => "STORAGE_ERROR",
            ConfirmationsError::Ledger(_) => "LEDGER_ERROR",
            ConfirmationsError::Queue(_) => "QUEUE_ERROR",
            ConfirmationsError::Build(_) => "BUILD_ERROR",
            ConfirmationsError::Cipher(_) => "CIPHER_ERROR",
            ConfirmationsError::Engine(_) => "ENGINE_ERROR",
            ConfirmationsError::Validation(_) => "VALIDATION_ERROR",
            ConfirmationsError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias using ConfirmationsError
pub type Result<T> = std::result::Result<T, ConfirmationsError>;
