//! Ad Confirmations - Confirmation & Redemption Engine
//!
//! Lets a client prove "an ad event happened" to a server without
//! revealing which event, confirming each event at most once and surviving
//! transient network failure.
//!
//! ## Components
//!
//! 1. **Token Ledger** - Unspent unblinded tokens and redeemed payment tokens
//! 2. **Confirmation Builder** - Spends one token per rewarded confirmation
//! 3. **Redemption Transport** - Boundary to the redemption server
//! 4. **Retry Queue** - Persisted FIFO of failed confirmations, drained
//!    one entry at a time behind a backoff timer
//! 5. **Confirmation Engine** - Single-task orchestrator over all of the above
//!
//! ## Out of scope
//!
//! Token issuance, the blind/sign/unblind math and the HTTP transport live
//! behind the [`TokenCipher`], [`RedemptionTransport`] and
//! [`StateStore`] traits.

pub mod common;
pub mod confirmations;
pub mod ledger;
pub mod privacy;
pub mod storage;
pub mod types;

// Re-exports: Shared types
pub use types::{
    AdType, BlindedToken, Confirmation, ConfirmationType, Token, TransactionInfo,
    UnblindedPaymentToken, UnblindedToken,
};

// Re-exports: Engine
pub use confirmations::{
    ConfirmationBuilder, ConfirmationEngine, ConfirmationEvent, ConfirmationsHandle,
    ConfirmationsObserver, ConfirmationsState, DefaultUserDataProvider, EngineConfig,
    EngineError, EngineStats, EventPublisher, RedemptionOutcome, RedemptionTransport,
    RetryQueue, RewardPolicy, SimulatedTransport, StaticRewardPolicy, UserDataProvider,
};

// Re-exports: Ledger
pub use ledger::{LedgerError, TokenLedger};

// Re-exports: Privacy tokens
pub use privacy::{CipherError, DigestTokenCipher, TokenCipher};

// Re-exports: Storage
pub use storage::{
    ConfirmationsSnapshot, JsonFileStateStore, MemoryStateStore, SqliteStateStore, StateStore,
    StorageError,
};

// Re-exports: Common
pub use common::{ConfigError, ConfirmationsConfig, ConfirmationsError};
