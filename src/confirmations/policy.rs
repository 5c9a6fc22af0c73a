//! Reward Eligibility Policy

/// Decides whether confirmations should carry a payment token
pub trait RewardPolicy: Send + Sync {
    /// Whether the user is opted in to rewards
    fn should_reward_user(&self) -> bool;

    /// Smallest non-zero payment denomination, if issuers are known
    fn smallest_payment_denomination(&self) -> Option<f64>;
}

/// Fixed policy, built from configuration
#[derive(Debug, Clone)]
pub struct StaticRewardPolicy {
    rewards_enabled: bool,
    smallest_denomination: Option<f64>,
}

impl StaticRewardPolicy {
    pub fn new(rewards_enabled: bool, smallest_denomination: Option<f64>) -> Self {
        Self {
            rewards_enabled,
            smallest_denomination,
        }
    }

    /// Rewards on, no denomination information
    pub fn enabled() -> Self {
        Self::new(true, None)
    }

    /// Rewards off; every confirmation is unrewarded
    pub fn disabled() -> Self {
        Self::new(false, None)
    }
}

impl Default for StaticRewardPolicy {
    fn default() -> Self {
        Self::enabled()
    }
}

impl RewardPolicy for StaticRewardPolicy {
    fn should_reward_user(&self) -> bool {
        self.rewards_enabled
    }

    fn smallest_payment_denomination(&self) -> Option<f64> {
        self.smallest_denomination
            .filter(|d| d.is_finite() && *d > 0.0)
    }
}
