//! Confirmation Types
//!
//! Types describing a single attempt to report and redeem an ad event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::tokens::{BlindedToken, Token, UnblindedToken};
use super::transaction::TransactionInfo;

/// Kind of event being confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfirmationType {
    /// Sentinel for an unset type; never valid on a confirmation
    #[serde(rename = "undefined")]
    Undefined,
    #[serde(rename = "click")]
    Clicked,
    #[serde(rename = "dismiss")]
    Dismissed,
    #[serde(rename = "view")]
    Viewed,
    #[serde(rename = "served")]
    Served,
    #[serde(rename = "landed")]
    Transferred,
    #[serde(rename = "bookmark")]
    Saved,
    #[serde(rename = "flag")]
    Flagged,
    #[serde(rename = "upvote")]
    Upvoted,
    #[serde(rename = "downvote")]
    Downvoted,
    #[serde(rename = "conversion")]
    Conversion,
}

impl Default for ConfirmationType {
    fn default() -> Self {
        Self::Undefined
    }
}

impl std::fmt::Display for ConfirmationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Clicked => write!(f, "click"),
            Self::Dismissed => write!(f, "dismiss"),
            Self::Viewed => write!(f, "view"),
            Self::Served => write!(f, "served"),
            Self::Transferred => write!(f, "landed"),
            Self::Saved => write!(f, "bookmark"),
            Self::Flagged => write!(f, "flag"),
            Self::Upvoted => write!(f, "upvote"),
            Self::Downvoted => write!(f, "downvote"),
            Self::Conversion => write!(f, "conversion"),
        }
    }
}

impl FromStr for ConfirmationType {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "undefined" => Ok(Self::Undefined),
            "click" => Ok(Self::Clicked),
            "dismiss" => Ok(Self::Dismissed),
            "view" => Ok(Self::Viewed),
            "served" => Ok(Self::Served),
            "landed" => Ok(Self::Transferred),
            "bookmark" => Ok(Self::Saved),
            "flag" => Ok(Self::Flagged),
            "upvote" => Ok(Self::Upvoted),
            "downvote" => Ok(Self::Downvoted),
            "conversion" => Ok(Self::Conversion),
            _ => Err(ParseTypeError::ConfirmationType(s.to_string())),
        }
    }
}

/// Kind of ad the event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdType {
    /// Sentinel for an unset type; never valid on a confirmation
    Undefined,
    AdNotification,
    NewTabPageAd,
    PromotedContentAd,
    InlineContentAd,
    SearchResultAd,
}

impl Default for AdType {
    fn default() -> Self {
        Self::Undefined
    }
}

impl std::fmt::Display for AdType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::AdNotification => write!(f, "ad_notification"),
            Self::NewTabPageAd => write!(f, "new_tab_page_ad"),
            Self::PromotedContentAd => write!(f, "promoted_content_ad"),
            Self::InlineContentAd => write!(f, "inline_content_ad"),
            Self::SearchResultAd => write!(f, "search_result_ad"),
        }
    }
}

impl FromStr for AdType {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "undefined" => Ok(Self::Undefined),
            "ad_notification" => Ok(Self::AdNotification),
            "new_tab_page_ad" => Ok(Self::NewTabPageAd),
            "promoted_content_ad" => Ok(Self::PromotedContentAd),
            "inline_content_ad" => Ok(Self::InlineContentAd),
            "search_result_ad" => Ok(Self::SearchResultAd),
            _ => Err(ParseTypeError::AdType(s.to_string())),
        }
    }
}

/// Errors parsing type tags
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseTypeError {
    #[error("unknown confirmation type: {0}")]
    ConfirmationType(String),

    #[error("unknown ad type: {0}")]
    AdType(String),
}

/// One attempt to confirm an ad event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Confirmation {
    /// Unique confirmation ID (lowercase UUID v4)
    pub id: String,
    /// Originating transaction
    pub transaction_id: String,
    /// Creative instance the event happened on
    pub creative_instance_id: String,
    /// What happened
    #[serde(rename = "type")]
    pub confirmation_type: ConfirmationType,
    /// Which kind of ad
    pub ad_type: AdType,
    /// Monetary weight of the event
    pub value: f64,
    /// When the confirmation was first built
    pub created_at: DateTime<Utc>,
    /// Credential spent to pay for this confirmation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unblinded_token: Option<UnblindedToken>,
    /// Fresh tokens generated for this confirmation
    #[serde(default)]
    pub tokens: Vec<Token>,
    /// `tokens` after blinding, as sent to the server
    #[serde(default)]
    pub blinded_tokens: Vec<BlindedToken>,
    /// Serialized contextual payload
    #[serde(default)]
    pub user_data: String,
    /// Signed proof derived from `unblinded_token`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    /// Set when a token was attached at build time; unset confirmations
    /// are rebuilt before being queued for retry
    #[serde(default)]
    pub was_created: bool,
}

impl Confirmation {
    /// Check the validity invariant required to send or queue
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty()
            && !self.transaction_id.is_empty()
            && !self.creative_instance_id.is_empty()
            && self.confirmation_type != ConfirmationType::Undefined
            && self.ad_type != AdType::Undefined
    }

    /// Whether a token was spent and a credential attached
    pub fn is_rewarded(&self) -> bool {
        self.unblinded_token.is_some() && self.credential.is_some()
    }

    /// The transaction this confirmation was built from
    pub fn transaction(&self) -> TransactionInfo {
        TransactionInfo {
            id: self.transaction_id.clone(),
            creative_instance_id: self.creative_instance_id.clone(),
            value: self.value,
            confirmation_type: self.confirmation_type,
            ad_type: self.ad_type,
        }
    }
}

impl std::fmt::Display for Confirmation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} confirmation for {} with id {}, transaction id {} and creative instance id {}",
            self.confirmation_type,
            self.ad_type,
            self.id,
            self.transaction_id,
            self.creative_instance_id
        )
    }
}
