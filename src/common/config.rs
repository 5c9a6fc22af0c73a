//! Environment-based Configuration for the Confirmations Engine
//!
//! # Environment Variables
//!
//! - `CONFIRMATIONS_ENV` - "production", "staging" or "development" (default: "development")
//! - `CONFIRMATIONS_STORAGE` - "memory", "sqlite" or "json" (default: "sqlite")
//! - `CONFIRMATIONS_STATE_PATH` - State file (default: `data/confirmations.db` or `.json`)
//! - `CONFIRMATIONS_RETRY_AFTER_SECS` - Retry backoff in seconds (default: 15)
//! - `CONFIRMATIONS_REWARDS_ENABLED` - Attach payment tokens (default: true)
//! - `CONFIRMATIONS_SMALLEST_DENOMINATION` - Smallest payment denomination (optional)
//! - `CONFIRMATIONS_BUILD_CHANNEL` - Reported build channel (default: "release")
//! - `CONFIRMATIONS_SIMULATED_FAILURE_RATE` - Injected failure rate, 0.0 to 1.0 (default: 0)
//! - `CONFIRMATIONS_LOG_LEVEL` - Logging level (debug, info, warn, error)

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::confirmations::{EngineConfig, StaticRewardPolicy, RETRY_AFTER_SECONDS};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("not allowed in production: {0}")]
    NotAllowedInProduction(String),
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Staging,
    Development,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "staging" => Ok(Environment::Staging),
            "development" | "dev" => Ok(Environment::Development),
            _ => Err(ConfigError::InvalidValue(
                "CONFIRMATIONS_ENV".to_string(),
                format!("unknown environment: {}", s),
            )),
        }
    }
}

/// State store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Sqlite,
    Json,
}

impl StorageBackend {
    /// Default state path for this backend
    pub fn default_path(&self) -> PathBuf {
        match self {
            StorageBackend::Memory => PathBuf::new(),
            StorageBackend::Sqlite => PathBuf::from("data/confirmations.db"),
            StorageBackend::Json => PathBuf::from("data/confirmations.json"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "sqlite" => Ok(StorageBackend::Sqlite),
            "json" | "file" => Ok(StorageBackend::Json),
            _ => Err(ConfigError::InvalidValue(
                "CONFIRMATIONS_STORAGE".to_string(),
                format!("unknown storage: {} (use 'memory', 'sqlite' or 'json')", s),
            )),
        }
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct ConfirmationsConfig {
    /// Deployment environment
    pub environment: Environment,

    /// State store backend
    pub storage: StorageBackend,

    /// State store location
    pub state_path: PathBuf,

    /// Retry backoff in seconds
    pub retry_after_secs: u64,

    /// Whether confirmations carry payment tokens
    pub rewards_enabled: bool,

    /// Smallest non-zero payment denomination
    pub smallest_denomination: Option<f64>,

    /// Build channel reported in user data
    pub build_channel: String,

    /// Fraction of simulated redemptions that fail
    pub simulated_failure_rate: f64,

    /// Log level
    pub log_level: String,
}

impl ConfirmationsConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through a variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment: Environment = lookup("CONFIRMATIONS_ENV")
            .unwrap_or_else(|| "development".to_string())
            .parse()?;

        let storage: StorageBackend = lookup("CONFIRMATIONS_STORAGE")
            .unwrap_or_else(|| "sqlite".to_string())
            .parse()?;

        let state_path = lookup("CONFIRMATIONS_STATE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| storage.default_path());

        let retry_after_secs = match lookup("CONFIRMATIONS_RETRY_AFTER_SECS") {
            Some(value) => match value.parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "CONFIRMATIONS_RETRY_AFTER_SECS".to_string(),
                        "must be a positive number of seconds".to_string(),
                    ))
                }
            },
            None => RETRY_AFTER_SECONDS,
        };

        let rewards_enabled = match lookup("CONFIRMATIONS_REWARDS_ENABLED") {
            Some(value) => parse_bool("CONFIRMATIONS_REWARDS_ENABLED", &value)?,
            None => true,
        };

        let smallest_denomination = match lookup("CONFIRMATIONS_SMALLEST_DENOMINATION") {
            Some(value) => match value.parse::<f64>() {
                Ok(d) if d.is_finite() && d > 0.0 => Some(d),
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "CONFIRMATIONS_SMALLEST_DENOMINATION".to_string(),
                        "must be a positive number".to_string(),
                    ))
                }
            },
            None => None,
        };

        let build_channel =
            lookup("CONFIRMATIONS_BUILD_CHANNEL").unwrap_or_else(|| "release".to_string());

        let simulated_failure_rate = match lookup("CONFIRMATIONS_SIMULATED_FAILURE_RATE") {
            Some(value) => match value.parse::<f64>() {
                Ok(rate) if (0.0..=1.0).contains(&rate) => rate,
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "CONFIRMATIONS_SIMULATED_FAILURE_RATE".to_string(),
                        "must be between 0.0 and 1.0".to_string(),
                    ))
                }
            },
            None => 0.0,
        };

        let log_level = lookup("CONFIRMATIONS_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            environment,
            storage,
            state_path,
            retry_after_secs,
            rewards_enabled,
            smallest_denomination,
            build_channel,
            simulated_failure_rate,
            log_level,
        })
    }

    /// Validate configuration for production readiness
    pub fn validate_for_production(&self) -> Result<(), ConfigError> {
        if self.environment != Environment::Production {
            return Ok(());
        }

        // State must survive restarts
        if self.storage == StorageBackend::Memory {
            return Err(ConfigError::NotAllowedInProduction(
                "memory storage".to_string(),
            ));
        }

        if self.simulated_failure_rate > 0.0 {
            return Err(ConfigError::NotAllowedInProduction(
                "simulated failures".to_string(),
            ));
        }

        Ok(())
    }

    /// Engine settings derived from this configuration
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            retry_after: Duration::from_secs(self.retry_after_secs),
        }
    }

    /// Reward policy derived from this configuration
    pub fn reward_policy(&self) -> StaticRewardPolicy {
        StaticRewardPolicy::new(self.rewards_enabled, self.smallest_denomination)
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("=== Confirmations Configuration ===");
        println!("Environment: {:?}", self.environment);
        println!("Storage: {:?}", self.storage);
        if self.storage != StorageBackend::Memory {
            println!("State Path: {}", self.state_path.display());
        }
        println!("Retry After: {} seconds", self.retry_after_secs);
        println!("Rewards Enabled: {}", self.rewards_enabled);
        match self.smallest_denomination {
            Some(d) => println!("Smallest Denomination: {}", d),
            None => println!("Smallest Denomination: unknown"),
        }
        println!("Build Channel: {}", self.build_channel);
        println!("Simulated Failure Rate: {}", self.simulated_failure_rate);
        println!("Log Level: {}", self.log_level);
        println!("===================================");
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("expected a boolean, got {}", value),
        )),
    }
}
