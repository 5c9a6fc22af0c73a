//! Confirmations Module
//!
//! Builds, redeems and retries ad event confirmations.
//!
//! Flow:
//! 1. `confirm(transaction)` gathers user data and builds a confirmation,
//!    spending one unblinded token when the user is rewarded
//! 2. The confirmation is submitted to the redemption transport
//! 3. Successes add a payment token to the ledger
//! 4. Retryable failures go to the persisted retry queue, drained one entry
//!    at a time after a backoff

pub mod builder;
pub mod engine;
pub mod observer;
pub mod payload;
pub mod policy;
pub mod queue;
pub mod state;
pub mod timer;
pub mod transport;
pub mod user_data;

// Re-exports
pub use builder::{
    token_count_for_value, BuildError, ConfirmationBuilder, MAX_TOKENS_PER_CONFIRMATION,
};
pub use engine::{
    ConfirmationEngine, ConfirmationsHandle, EngineConfig, EngineError, EngineStats,
    RETRY_AFTER_SECONDS,
};
pub use observer::{ConfirmationEvent, ConfirmationsObserver, EventPublisher};
pub use payload::confirmation_request_payload;
pub use policy::{RewardPolicy, StaticRewardPolicy};
pub use queue::{QueueError, RetryQueue};
pub use state::ConfirmationsState;
pub use timer::RetryTimer;
pub use transport::{RedemptionOutcome, RedemptionTransport, SimulatedTransport};
pub use user_data::{DefaultUserDataProvider, UserDataProvider};
