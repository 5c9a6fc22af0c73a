//! Confirmation User Data
//!
//! Contextual fields merged into the confirmation request. Timestamps are
//! truncated to the hour so they cannot single out an event.

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, Utc};

use crate::types::ConfirmationType;

/// Trait for user data providers
#[async_trait]
pub trait UserDataProvider: Send + Sync {
    /// Gather user data for a confirmation
    async fn build(
        &self,
        created_at: DateTime<Utc>,
        creative_instance_id: &str,
        confirmation_type: ConfirmationType,
    ) -> serde_json::Value;
}

/// Build channel, platform and coarse creation time
#[derive(Debug, Clone)]
pub struct DefaultUserDataProvider {
    build_channel: String,
    platform: String,
}

impl DefaultUserDataProvider {
    pub fn new(build_channel: impl Into<String>) -> Self {
        Self {
            build_channel: build_channel.into(),
            platform: std::env::consts::OS.to_string(),
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }
}

impl Default for DefaultUserDataProvider {
    fn default() -> Self {
        Self::new("release")
    }
}

#[async_trait]
impl UserDataProvider for DefaultUserDataProvider {
    async fn build(
        &self,
        created_at: DateTime<Utc>,
        _creative_instance_id: &str,
        _confirmation_type: ConfirmationType,
    ) -> serde_json::Value {
        let hour = created_at
            .duration_trunc(chrono::Duration::hours(1))
            .unwrap_or(created_at);

        serde_json::json!({
            "buildChannel": self.build_channel,
            "createdAtTimestamp": hour.format("%Y-%m-%dT%H:00:00.000Z").to_string(),
            "platform": self.platform,
        })
    }
}
