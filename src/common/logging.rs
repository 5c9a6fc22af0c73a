//! Structured Logging for the Confirmations Engine
//!
//! Provides structured logging with:
//! - JSON output in production for log aggregation
//! - Correlation IDs tying log lines to a confirmation
//! - Category-tagged event envelopes
//!
//! # Usage
//!
//! ```no_run
//! use ad_confirmations::common::logging::{init_logging, LogLevel};
//!
//! init_logging(LogLevel::Info, true).unwrap(); // JSON mode for production
//! tracing::info!(target: "confirmations::engine", "Confirming");
//! ```

use serde::Serialize;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::types::Confirmation;

// ============================================================================
// Log Levels
// ============================================================================

/// Application log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

// ============================================================================
// Structured Event Types
// ============================================================================

/// Event categories for structured logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Confirmation lifecycle
    Confirmation,
    /// Redemption outcomes
    Redemption,
    /// Retry queue changes
    RetryQueue,
    /// Token ledger changes
    Ledger,
    /// State persistence
    Storage,
    /// Startup, shutdown
    System,
}

/// Structured log event
#[derive(Debug, Serialize)]
pub struct LogEvent {
    /// Event timestamp (ISO 8601)
    pub timestamp: String,
    /// Log level
    pub level: String,
    /// Event category
    pub category: EventCategory,
    /// Human-readable message
    pub message: String,
    /// Correlation ID, usually the confirmation ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Additional structured data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

/// Error details for error events
#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl LogEvent {
    /// Create a new log event
    pub fn new(level: LogLevel, category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: level.as_filter().to_uppercase(),
            category,
            message: message.into(),
            correlation_id: None,
            data: None,
            error: None,
        }
    }

    /// Add correlation ID
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Add structured data
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Add error details
    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(ErrorDetails {
            code: code.into(),
            message: message.into(),
        });
        self
    }

    /// Serialize this event to JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"error\": \"failed to serialize log\", \"message\": \"{}\"}}",
                self.message
            )
        })
    }
}

fn confirmation_data(confirmation: &Confirmation) -> serde_json::Value {
    serde_json::json!({
        "confirmation_id": confirmation.id,
        "transaction_id": confirmation.transaction_id,
        "creative_instance_id": confirmation.creative_instance_id,
        "type": confirmation.confirmation_type.to_string(),
        "ad_type": confirmation.ad_type.to_string(),
        "rewarded": confirmation.is_rewarded(),
    })
}

/// Log a confirmation lifecycle event (built, discarded)
pub fn log_confirmation_event(event_type: &str, confirmation: &Confirmation) {
    let event = LogEvent::new(LogLevel::Info, EventCategory::Confirmation, event_type)
        .with_correlation_id(&confirmation.id)
        .with_data(confirmation_data(confirmation));

    tracing::info!(target: "confirmations::confirmation", "{}", event.to_json());
}

/// Log a redemption outcome for a confirmation
pub fn log_redemption_event(
    event_type: &str,
    confirmation: &Confirmation,
    success: bool,
    error: Option<&str>,
) {
    let level = if success { LogLevel::Info } else { LogLevel::Warn };
    let mut event = LogEvent::new(level, EventCategory::Redemption, event_type)
        .with_correlation_id(&confirmation.id)
        .with_data(confirmation_data(confirmation));

    if let Some(err) = error {
        event = event.with_error("REDEMPTION_FAILED", err);
    }

    if success {
        tracing::info!(target: "confirmations::redemption", "{}", event.to_json());
    } else {
        tracing::warn!(target: "confirmations::redemption", "{}", event.to_json());
    }
}

/// Log a retry queue change
pub fn log_retry_queue_event(event_type: &str, confirmation: &Confirmation, queue_len: usize) {
    let mut data = confirmation_data(confirmation);
    data["queue_len"] = serde_json::json!(queue_len);

    let event = LogEvent::new(LogLevel::Info, EventCategory::RetryQueue, event_type)
        .with_correlation_id(&confirmation.id)
        .with_data(data);

    tracing::info!(target: "confirmations::retry_queue", "{}", event.to_json());
}

/// Log a token ledger change
pub fn log_ledger_event(event_type: &str, changed: usize, unblinded_tokens: usize, payment_tokens: usize) {
    let event = LogEvent::new(LogLevel::Info, EventCategory::Ledger, event_type).with_data(
        serde_json::json!({
            "changed": changed,
            "unblinded_tokens": unblinded_tokens,
            "unblinded_payment_tokens": payment_tokens
        }),
    );

    tracing::info!(target: "confirmations::ledger", "{}", event.to_json());
}

/// Log a failed state save
pub fn log_storage_failure(store_type: &str, error: &str) {
    let event = LogEvent::new(LogLevel::Error, EventCategory::Storage, "save failed")
        .with_data(serde_json::json!({ "store": store_type }))
        .with_error("STORAGE_ERROR", error);

    tracing::error!(target: "confirmations::storage", "{}", event.to_json());
}

/// Log a startup or shutdown event
pub fn log_system_event(event_type: &str, details: serde_json::Value) {
    let event = LogEvent::new(LogLevel::Info, EventCategory::System, event_type)
        .with_correlation_id(generate_correlation_id())
        .with_data(details);

    tracing::info!(target: "confirmations::system", "{}", event.to_json());
}

// ============================================================================
// Initialization
// ============================================================================

/// Initialize the logging system
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_logging(level: LogLevel, json_format: bool) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "confirmations={level},ad_confirmations={level},confirmations_cli={level}",
            level = level.as_filter()
        ))
    });

    if json_format {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE),
        );

        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    } else {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true),
        );

        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    }

    Ok(())
}

/// Initialize logging from ConfirmationsConfig
pub fn init_from_config(config: &super::config::ConfirmationsConfig) -> Result<(), LoggingError> {
    let level = LogLevel::from(config.log_level.as_str());
    let json_format = config.environment == super::config::Environment::Production;

    init_logging(level, json_format)
}

/// Logging errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}

/// Generate a unique correlation ID
pub fn generate_correlation_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AdType, ConfirmationType};

    #[test]
    fn test_log_event_serialization() {
        let event = LogEvent::new(LogLevel::Info, EventCategory::RetryQueue, "appended")
            .with_correlation_id("conf-123")
            .with_data(serde_json::json!({"queue_len": 2}))
            .with_error("QUEUE_ERROR", "duplicate");

        let json: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(json["category"], "retry_queue");
        assert_eq!(json["level"], "INFO");
        assert_eq!(json["correlation_id"], "conf-123");
        assert_eq!(json["data"]["queue_len"], 2);
        assert_eq!(json["error"]["code"], "QUEUE_ERROR");
    }

    #[test]
    fn test_confirmation_data() {
        let confirmation = Confirmation {
            id: "c1".to_string(),
            transaction_id: "tx".to_string(),
            confirmation_type: ConfirmationType::Viewed,
            ad_type: AdType::AdNotification,
            ..Default::default()
        };

        let data = confirmation_data(&confirmation);
        assert_eq!(data["type"], "view");
        assert_eq!(data["ad_type"], confirmation.ad_type.to_string());
        assert_eq!(data["rewarded"], false);
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::from("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from("unknown"), LogLevel::Info);
    }

    #[test]
    fn test_correlation_id_generation() {
        let id1 = generate_correlation_id();
        let id2 = generate_correlation_id();

        assert_eq!(id1.len(), 32);
        assert_ne!(id1, id2);
    }
}
