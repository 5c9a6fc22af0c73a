//! Confirmation Engine
//!
//! Orchestrates building, redeeming and retrying confirmations.
//!
//! The engine is one tokio task that owns [`ConfirmationsState`] and every
//! collaborator. API calls, user-data completions, redemption outcomes and
//! timer fires all arrive as events on a single channel and are
//! handled one at a time, so ledger and queue mutations never interleave.
//! Slow collaborator calls are spawned and post their result back as an
//! event.
//!
//! Retry flow:
//! 1. A retryable failure appends the confirmation to the retry queue. A
//!    confirmation that never carried a token is rebuilt first, getting a
//!    new ID and possibly a token that became available meanwhile.
//! 2. `process_retry_queue` arms a single backoff timer when the queue is
//!    non-empty and nothing from the queue is in flight.
//! 3. When the timer fires the oldest entry is removed, persisted and
//!    redeemed. Its outcome re-triggers step 2.
//! 4. Any success cancels the timer and re-triggers step 2 immediately.

use chrono::{DateTime, Utc};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::common::logging::{
    log_confirmation_event, log_ledger_event, log_redemption_event, log_retry_queue_event,
    log_system_event,
};
use crate::confirmations::builder::ConfirmationBuilder;
use crate::confirmations::observer::ConfirmationsObserver;
use crate::confirmations::policy::RewardPolicy;
use crate::confirmations::state::ConfirmationsState;
use crate::confirmations::timer::RetryTimer;
use crate::confirmations::transport::{RedemptionOutcome, RedemptionTransport};
use crate::confirmations::user_data::UserDataProvider;
use crate::privacy::TokenCipher;
use crate::storage::ConfirmationsSnapshot;
use crate::types::{Confirmation, TransactionInfo, UnblindedPaymentToken, UnblindedToken};

/// Default delay before retrying a failed confirmation
pub const RETRY_AFTER_SECONDS: u64 = 15;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Backoff before the oldest failed confirmation is retried
    pub retry_after: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_after: Duration::from_secs(RETRY_AFTER_SECONDS),
        }
    }
}

/// Engine errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("confirmations engine has stopped")]
    Stopped,
}

/// Engine statistics
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct EngineStats {
    pub unblinded_tokens: usize,
    pub unblinded_payment_tokens: usize,
    pub failed_confirmations: usize,
    pub retry_scheduled: bool,
    pub retry_in_flight: bool,
    /// Failed confirmations being rebuilt before they are queued
    pub rebuilds_pending: usize,
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Why user data is being gathered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildPurpose {
    /// Fresh confirmation, redeem once built
    Redeem,
    /// Rebuild of a failed confirmation, queue once built
    Requeue,
}

/// Where a redemption attempt came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Fresh,
    RetryQueue,
}

/// Engine input
enum EngineEvent {
    Confirm(TransactionInfo),
    UserDataBuilt {
        transaction: TransactionInfo,
        created_at: DateTime<Utc>,
        user_data: serde_json::Value,
        purpose: BuildPurpose,
    },
    RedemptionFinished {
        confirmation: Confirmation,
        outcome: RedemptionOutcome,
        origin: Origin,
    },
    RetryTimerFired {
        generation: u64,
    },
    ProcessRetryQueue,
    AddUnblindedTokens(Vec<UnblindedToken>, oneshot::Sender<usize>),
    RemovePaymentTokens(Vec<UnblindedPaymentToken>, oneshot::Sender<usize>),
    Stats(oneshot::Sender<EngineStats>),
    Snapshot(oneshot::Sender<ConfirmationsSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// Confirmation engine
pub struct ConfirmationEngine {
    state: ConfirmationsState,
    builder: ConfirmationBuilder,
    transport: Arc<dyn RedemptionTransport>,
    user_data: Arc<dyn UserDataProvider>,
    observer: Option<Arc<dyn ConfirmationsObserver>>,
    timer: RetryTimer,
    /// ID of the queue entry currently being redeemed
    retry_in_flight: Option<String>,
    rebuilds_pending: usize,
}

impl ConfirmationEngine {
    /// Create an engine over loaded state
    pub fn new(
        config: EngineConfig,
        state: ConfirmationsState,
        transport: Arc<dyn RedemptionTransport>,
        user_data: Arc<dyn UserDataProvider>,
    ) -> Self {
        Self {
            timer: RetryTimer::new(config.retry_after),
            state,
            builder: ConfirmationBuilder::default(),
            transport,
            user_data,
            observer: None,
            retry_in_flight: None,
            rebuilds_pending: 0,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ConfirmationsObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_token_cipher(mut self, cipher: Arc<dyn TokenCipher>) -> Self {
        self.builder = self.builder.with_token_cipher(cipher);
        self
    }

    pub fn with_reward_policy(mut self, policy: Arc<dyn RewardPolicy>) -> Self {
        self.builder = self.builder.with_reward_policy(policy);
        self
    }

    /// Start the engine task
    ///
    /// The engine runs until [`ConfirmationsHandle::shutdown`] is called.
    pub fn spawn(self) -> (ConfirmationsHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = ConfirmationsHandle {
            sender: sender.clone(),
        };

        let task = tokio::spawn(self.run(sender, receiver));

        (handle, task)
    }

    async fn run(
        self,
        sender: mpsc::UnboundedSender<EngineEvent>,
        mut receiver: mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        let mut runner = Runner {
            engine: self,
            events: sender,
        };

        log_system_event(
            "engine started",
            serde_json::json!({
                "transport": runner.engine.transport.transport_type(),
                "cipher": runner.engine.builder.cipher_type(),
                "store": runner.engine.state.store_type(),
                "retry_after_secs": runner.engine.timer.delay().as_secs(),
                "unblinded_tokens": runner.engine.state.ledger().token_count(),
                "failed_confirmations": runner.engine.state.retry_queue().len(),
            }),
        );

        // resume draining anything left over from a previous run
        runner.process_retry_queue();

        while let Some(event) = receiver.recv().await {
            if runner.handle(event).await.is_break() {
                break;
            }
        }

        log_system_event("engine stopped", serde_json::json!({}));
    }
}

/// Running engine plus its own event sender
struct Runner {
    engine: ConfirmationEngine,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl Runner {
    async fn handle(&mut self, event: EngineEvent) -> ControlFlow<()> {
        match event {
            EngineEvent::Confirm(transaction) => self.confirm(transaction),
            EngineEvent::UserDataBuilt {
                transaction,
                created_at,
                user_data,
                purpose,
            } => {
                self.on_user_data_built(transaction, created_at, user_data, purpose)
                    .await
            }
            EngineEvent::RedemptionFinished {
                confirmation,
                outcome,
                origin,
            } => self.on_redemption_finished(confirmation, outcome, origin).await,
            EngineEvent::RetryTimerFired { generation } => self.on_retry(generation).await,
            EngineEvent::ProcessRetryQueue => self.process_retry_queue(),
            EngineEvent::AddUnblindedTokens(tokens, reply) => {
                let added = self.engine.state.add_unblinded_tokens(tokens).await;
                let ledger = self.engine.state.ledger();
                log_ledger_event(
                    "added unblinded tokens",
                    added,
                    ledger.token_count(),
                    ledger.payment_token_count(),
                );
                let _ = reply.send(added);
                self.process_retry_queue();
            }
            EngineEvent::RemovePaymentTokens(tokens, reply) => {
                let removed = self.engine.state.remove_payment_tokens(&tokens).await;
                let ledger = self.engine.state.ledger();
                log_ledger_event(
                    "removed payment tokens",
                    removed,
                    ledger.token_count(),
                    ledger.payment_token_count(),
                );
                let _ = reply.send(removed);
            }
            EngineEvent::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            EngineEvent::Snapshot(reply) => {
                let _ = reply.send(self.engine.state.snapshot());
            }
            EngineEvent::Shutdown(reply) => {
                self.engine.timer.stop();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }

        ControlFlow::Continue(())
    }

    fn stats(&self) -> EngineStats {
        let ledger = self.engine.state.ledger();
        EngineStats {
            unblinded_tokens: ledger.token_count(),
            unblinded_payment_tokens: ledger.payment_token_count(),
            failed_confirmations: self.engine.state.retry_queue().len(),
            retry_scheduled: self.engine.timer.is_running(),
            retry_in_flight: self.engine.retry_in_flight.is_some(),
            rebuilds_pending: self.engine.rebuilds_pending,
            next_retry_at: self.engine.timer.fires_at(),
        }
    }

    /// Run a collaborator call off the engine task and post its result back
    fn spawn_step<F>(&self, step: F)
    where
        F: std::future::Future<Output = EngineEvent> + Send + 'static,
    {
        let events = self.events.clone();
        tokio::spawn(async move {
            let event = step.await;
            // engine may have shut down meanwhile
            let _ = events.send(event);
        });
    }

    fn gather_user_data(
        &self,
        transaction: TransactionInfo,
        created_at: DateTime<Utc>,
        purpose: BuildPurpose,
    ) {
        let provider = self.engine.user_data.clone();
        self.spawn_step(async move {
            let user_data = provider
                .build(
                    created_at,
                    &transaction.creative_instance_id,
                    transaction.confirmation_type,
                )
                .await;

            EngineEvent::UserDataBuilt {
                transaction,
                created_at,
                user_data,
                purpose,
            }
        });
    }

    fn confirm(&mut self, transaction: TransactionInfo) {
        if !transaction.is_valid() {
            tracing::warn!(
                target: "confirmations::engine",
                transaction_id = %transaction.id,
                creative_instance_id = %transaction.creative_instance_id,
                "Discarding invalid transaction"
            );
            return;
        }

        tracing::info!(
            target: "confirmations::engine",
            transaction_id = %transaction.id,
            creative_instance_id = %transaction.creative_instance_id,
            confirmation_type = %transaction.confirmation_type,
            ad_type = %transaction.ad_type,
            "Confirming"
        );

        self.gather_user_data(transaction, Utc::now(), BuildPurpose::Redeem);
    }

    async fn on_user_data_built(
        &mut self,
        transaction: TransactionInfo,
        created_at: DateTime<Utc>,
        user_data: serde_json::Value,
        purpose: BuildPurpose,
    ) {
        if purpose == BuildPurpose::Requeue {
            self.engine.rebuilds_pending = self.engine.rebuilds_pending.saturating_sub(1);
        }

        let confirmation = match self
            .engine
            .builder
            .build(&mut self.engine.state, &transaction, created_at, &user_data)
            .await
        {
            Ok(confirmation) => confirmation,
            Err(e) => {
                tracing::warn!(target: "confirmations::engine", error = %e, "Failed to build confirmation");
                return;
            }
        };

        log_confirmation_event(
            match purpose {
                BuildPurpose::Redeem => "built",
                BuildPurpose::Requeue => "rebuilt",
            },
            &confirmation,
        );

        match purpose {
            BuildPurpose::Redeem => self.redeem(confirmation, Origin::Fresh),
            BuildPurpose::Requeue => {
                self.append_to_retry_queue(confirmation).await;
                self.process_retry_queue();
            }
        }
    }

    fn redeem(&mut self, confirmation: Confirmation, origin: Origin) {
        if !confirmation.is_valid() {
            tracing::warn!(
                target: "confirmations::engine",
                confirmation_id = %confirmation.id,
                "Discarding invalid confirmation"
            );
            if origin == Origin::RetryQueue {
                self.engine.retry_in_flight = None;
                self.process_retry_queue();
            }
            return;
        }

        let transport = self.engine.transport.clone();
        self.spawn_step(async move {
            let outcome = transport.redeem(&confirmation).await;
            EngineEvent::RedemptionFinished {
                confirmation,
                outcome,
                origin,
            }
        });
    }

    async fn on_redemption_finished(
        &mut self,
        confirmation: Confirmation,
        outcome: RedemptionOutcome,
        origin: Origin,
    ) {
        if origin == Origin::RetryQueue
            && self.engine.retry_in_flight.as_deref() == Some(confirmation.id.as_str())
        {
            self.engine.retry_in_flight = None;
        }

        match outcome {
            RedemptionOutcome::Redeemed(payment_token) => {
                self.on_did_redeem(confirmation, payment_token).await
            }
            RedemptionOutcome::Sent => self.on_did_send(confirmation),
            RedemptionOutcome::Failed { should_retry } => {
                self.on_failed(confirmation, should_retry).await
            }
            RedemptionOutcome::IssuersOutOfDate => {
                tracing::warn!(target: "confirmations::engine", "Issuers are out of date");
                if let Some(observer) = &self.engine.observer {
                    observer.on_issuers_out_of_date();
                }
                self.on_failed(confirmation, true).await
            }
        }
    }

    async fn on_did_redeem(
        &mut self,
        confirmation: Confirmation,
        payment_token: UnblindedPaymentToken,
    ) {
        if self.engine.state.payment_token_exists(&payment_token) {
            tracing::warn!(
                target: "confirmations::engine",
                confirmation_id = %confirmation.id,
                "Unblinded payment token is a duplicate"
            );
            return self.on_failed(confirmation, false).await;
        }

        if let Err(e) = self.engine.state.add_payment_token(payment_token).await {
            tracing::warn!(target: "confirmations::engine", error = %e, "Failed to add payment token");
            return self.on_failed(confirmation, false).await;
        }

        log_redemption_event("redeemed", &confirmation, true, None);
        tracing::info!(
            target: "confirmations::engine",
            confirmation_id = %confirmation.id,
            transaction_id = %confirmation.transaction_id,
            payment_tokens = self.engine.state.ledger().payment_token_count(),
            "Successfully redeemed unblinded token"
        );

        self.notify_confirmed(&confirmation);
        self.stop_retrying();
        self.process_retry_queue();
    }

    fn on_did_send(&mut self, confirmation: Confirmation) {
        log_redemption_event("sent", &confirmation, true, None);

        self.notify_confirmed(&confirmation);
        self.stop_retrying();
        self.process_retry_queue();
    }

    async fn on_failed(&mut self, confirmation: Confirmation, should_retry: bool) {
        log_redemption_event(
            "failed",
            &confirmation,
            false,
            Some(if should_retry { "retryable" } else { "not retryable" }),
        );

        if should_retry {
            if confirmation.was_created {
                self.append_to_retry_queue(confirmation.clone()).await;
            } else {
                // rebuild under a new ID; keeps the original creation time
                self.engine.rebuilds_pending += 1;
                self.gather_user_data(
                    confirmation.transaction(),
                    confirmation.created_at,
                    BuildPurpose::Requeue,
                );
            }
        }

        if let Some(observer) = &self.engine.observer {
            observer.on_failed_to_confirm(&confirmation);
        }

        self.process_retry_queue();
    }

    fn notify_confirmed(&self, confirmation: &Confirmation) {
        if let Some(observer) = &self.engine.observer {
            observer.on_confirmed(confirmation);
        }
    }

    async fn append_to_retry_queue(&mut self, confirmation: Confirmation) {
        let queued = confirmation.clone();

        match self.engine.state.append_failed_confirmation(confirmation).await {
            Ok(()) => log_retry_queue_event(
                "appended",
                &queued,
                self.engine.state.retry_queue().len(),
            ),
            Err(e) => tracing::warn!(
                target: "confirmations::engine",
                confirmation_id = %queued.id,
                error = %e,
                "Failed to add confirmation to retry queue"
            ),
        }
    }

    /// Arm the retry timer if there is queued work and nothing pending
    fn process_retry_queue(&mut self) {
        if self.engine.timer.is_running() {
            return;
        }

        if let Some(id) = &self.engine.retry_in_flight {
            tracing::debug!(target: "confirmations::engine", confirmation_id = %id, "Retry already in flight");
            return;
        }

        if self.engine.state.retry_queue().is_empty() {
            tracing::debug!(target: "confirmations::engine", "No failed confirmations to retry");
            return;
        }

        let events = self.events.clone();
        let fires_at = self.engine.timer.start(move |generation| {
            let _ = events.send(EngineEvent::RetryTimerFired { generation });
        });

        tracing::info!(
            target: "confirmations::engine",
            queued = self.engine.state.retry_queue().len(),
            fires_at = %fires_at,
            "Retry sending failed confirmations"
        );
    }

    fn stop_retrying(&mut self) {
        self.engine.timer.stop();
    }

    async fn on_retry(&mut self, generation: u64) {
        if !self.engine.timer.fired(generation) {
            tracing::debug!(target: "confirmations::engine", generation, "Ignoring stale retry timer");
            return;
        }

        let Some(confirmation) = self.engine.state.pop_failed_confirmation().await else {
            return;
        };

        log_retry_queue_event("removed", &confirmation, self.engine.state.retry_queue().len());

        self.engine.retry_in_flight = Some(confirmation.id.clone());
        self.redeem(confirmation, Origin::RetryQueue);
    }
}

/// Cloneable handle to a running engine
#[derive(Clone)]
pub struct ConfirmationsHandle {
    sender: mpsc::UnboundedSender<EngineEvent>,
}

impl ConfirmationsHandle {
    /// Confirm a transaction
    ///
    /// Returns once the request is queued; the outcome is reported to the
    /// observer.
    pub fn confirm(&self, transaction: TransactionInfo) -> Result<(), EngineError> {
        self.send(EngineEvent::Confirm(transaction))
    }

    /// Arm the retry timer if the queue has work
    pub fn process_retry_queue(&self) -> Result<(), EngineError> {
        self.send(EngineEvent::ProcessRetryQueue)
    }

    /// Feed freshly issued tokens into the ledger
    pub async fn add_unblinded_tokens(&self, tokens: Vec<UnblindedToken>) -> Result<usize, EngineError> {
        self.request(|reply| EngineEvent::AddUnblindedTokens(tokens, reply))
            .await
    }

    /// Prune redeemed payment tokens
    pub async fn remove_payment_tokens(
        &self,
        tokens: Vec<UnblindedPaymentToken>,
    ) -> Result<usize, EngineError> {
        self.request(|reply| EngineEvent::RemovePaymentTokens(tokens, reply))
            .await
    }

    pub async fn stats(&self) -> Result<EngineStats, EngineError> {
        self.request(EngineEvent::Stats).await
    }

    pub async fn snapshot(&self) -> Result<ConfirmationsSnapshot, EngineError> {
        self.request(EngineEvent::Snapshot).await
    }

    /// Stop the engine; pending redemptions are abandoned
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.request(EngineEvent::Shutdown).await
    }

    fn send(&self, event: EngineEvent) -> Result<(), EngineError> {
        self.sender.send(event).map_err(|_| EngineError::Stopped)
    }

    async fn request<T>(
        &self,
        event: impl FnOnce(oneshot::Sender<T>) -> EngineEvent,
    ) -> Result<T, EngineError> {
        let (reply, response) = oneshot::channel();
        self.send(event(reply))?;
        response.await.map_err(|_| EngineError::Stopped)
    }
}
