//! Transaction Types
//!
//! A transaction is an ad event that has already been decided and is
//! handed to the engine for confirmation.

use serde::{Deserialize, Serialize};

use super::confirmation::{AdType, ConfirmationType};

/// An ad event awaiting confirmation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionInfo {
    /// Transaction ID
    pub id: String,
    /// Creative instance the event happened on
    pub creative_instance_id: String,
    /// Monetary weight of the event
    pub value: f64,
    /// What happened
    pub confirmation_type: ConfirmationType,
    /// Which kind of ad
    pub ad_type: AdType,
}

impl TransactionInfo {
    /// Create a new transaction
    pub fn new(
        id: impl Into<String>,
        creative_instance_id: impl Into<String>,
        value: f64,
        confirmation_type: ConfirmationType,
        ad_type: AdType,
    ) -> Self {
        Self {
            id: id.into(),
            creative_instance_id: creative_instance_id.into(),
            value,
            confirmation_type,
            ad_type,
        }
    }

    /// Check the preconditions for building a confirmation
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty()
            && !self.creative_instance_id.is_empty()
            && self.confirmation_type != ConfirmationType::Undefined
            && self.ad_type != AdType::Undefined
    }
}
