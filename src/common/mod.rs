//! Common Infrastructure Module
//!
//! Shared utilities and configuration for the confirmations engine.
//!
//! This module contains:
//! - Configuration loading from environment variables
//! - Structured logging setup
//! - Common error types

pub mod config;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use config::{ConfigError, ConfirmationsConfig, Environment, StorageBackend};
pub use error::{ConfirmationsError, Result};
pub use logging::{
    generate_correlation_id, init_from_config, init_logging, log_confirmation_event,
    log_ledger_event, log_redemption_event, log_retry_queue_event, log_storage_failure,
    log_system_event, ErrorDetails, EventCategory, LogEvent, LogLevel, LoggingError,
};
