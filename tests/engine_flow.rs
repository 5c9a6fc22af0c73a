//! End-to-end confirmation engine scenarios

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ad_confirmations::confirmations::{
    ConfirmationEngine, ConfirmationEvent, ConfirmationsHandle, ConfirmationsState,
    DefaultUserDataProvider, EngineConfig, EventPublisher, RedemptionOutcome,
    RedemptionTransport, UserDataProvider,
};
use ad_confirmations::{
    AdType, Confirmation, ConfirmationType, ConfirmationsSnapshot, DigestTokenCipher,
    JsonFileStateStore, MemoryStateStore, StateStore, TokenCipher, TransactionInfo,
    UnblindedPaymentToken, UnblindedToken,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, Semaphore};

/// Transport replaying a fixed list of outcomes, then `Sent`
struct ScriptedTransport {
    outcomes: Mutex<VecDeque<RedemptionOutcome>>,
    calls: mpsc::UnboundedSender<Confirmation>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    fn new(outcomes: Vec<RedemptionOutcome>) -> (Arc<Self>, mpsc::UnboundedReceiver<Confirmation>) {
        let (calls, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            calls,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        (transport, rx)
    }
}

#[async_trait]
impl RedemptionTransport for ScriptedTransport {
    async fn redeem(&self, confirmation: &Confirmation) -> RedemptionOutcome {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        tokio::task::yield_now().await;

        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RedemptionOutcome::Sent);
        let _ = self.calls.send(confirmation.clone());

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    fn transport_type(&self) -> &'static str {
        "scripted"
    }
}

/// User data provider that waits for a permit per call
struct GatedUserData {
    gate: Arc<Semaphore>,
    inner: DefaultUserDataProvider,
}

#[async_trait]
impl UserDataProvider for GatedUserData {
    async fn build(
        &self,
        created_at: DateTime<Utc>,
        creative_instance_id: &str,
        confirmation_type: ConfirmationType,
    ) -> serde_json::Value {
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        self.inner
            .build(created_at, creative_instance_id, confirmation_type)
            .await
    }
}

struct Harness {
    handle: ConfirmationsHandle,
    events: broadcast::Receiver<ConfirmationEvent>,
}

async fn start(
    store: Arc<dyn StateStore>,
    transport: Arc<dyn RedemptionTransport>,
    user_data: Arc<dyn UserDataProvider>,
) -> Harness {
    let state = ConfirmationsState::load(store).await.unwrap();
    let publisher = EventPublisher::default();
    let events = publisher.subscribe();

    let (handle, _task) = ConfirmationEngine::new(EngineConfig::default(), state, transport, user_data)
        .with_observer(Arc::new(publisher))
        .spawn();

    Harness { handle, events }
}

async fn start_with(store: Arc<dyn StateStore>, transport: Arc<dyn RedemptionTransport>) -> Harness {
    start(store, transport, Arc::new(DefaultUserDataProvider::default())).await
}

async fn next_event(events: &mut broadcast::Receiver<ConfirmationEvent>) -> ConfirmationEvent {
    tokio::time::timeout(Duration::from_secs(120), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn expect_confirmed(events: &mut broadcast::Receiver<ConfirmationEvent>) -> Confirmation {
    match next_event(events).await {
        ConfirmationEvent::Confirmed { confirmation } => confirmation,
        other => panic!("expected confirmed, got {:?}", other),
    }
}

async fn expect_failed(events: &mut broadcast::Receiver<ConfirmationEvent>) -> Confirmation {
    match next_event(events).await {
        ConfirmationEvent::FailedToConfirm { confirmation } => confirmation,
        other => panic!("expected failure, got {:?}", other),
    }
}

fn transaction(id: &str) -> TransactionInfo {
    TransactionInfo::new(id, "creative_1", 1.0, ConfirmationType::Viewed, AdType::AdNotification)
}

fn issue(count: usize) -> Vec<UnblindedToken> {
    DigestTokenCipher::new()
        .generate(count)
        .into_iter()
        .map(|t| UnblindedToken::new(t.as_str(), "issuer"))
        .collect()
}

fn payment(value: &str) -> UnblindedPaymentToken {
    UnblindedPaymentToken::new(value, "issuer", ConfirmationType::Viewed, AdType::AdNotification)
}

fn queued(id: &str) -> Confirmation {
    Confirmation {
        id: id.to_string(),
        transaction_id: format!("tx_{}", id),
        creative_instance_id: "creative_1".to_string(),
        confirmation_type: ConfirmationType::Viewed,
        ad_type: AdType::AdNotification,
        value: 1.0,
        created_at: Utc::now(),
        unblinded_token: Some(UnblindedToken::new("spent", "issuer")),
        credential: Some("credential".to_string()),
        was_created: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_successful_redemption_updates_ledger() {
    let store = MemoryStateStore::new();
    let (transport, _calls) = ScriptedTransport::new(vec![RedemptionOutcome::Redeemed(payment("p1"))]);
    let mut h = start_with(Arc::new(store.clone()), transport).await;

    h.handle.add_unblinded_tokens(issue(3)).await.unwrap();
    h.handle.confirm(transaction("tx_1")).unwrap();

    let confirmation = expect_confirmed(&mut h.events).await;
    assert!(confirmation.is_rewarded());
    assert!(confirmation.was_created);

    let stats = h.handle.stats().await.unwrap();
    assert_eq!(stats.unblinded_tokens, 2);
    assert_eq!(stats.unblinded_payment_tokens, 1);

    let saved = store.snapshot().await;
    assert_eq!(saved.unblinded_tokens.len(), 2);
    assert_eq!(saved.unblinded_payment_tokens, vec![payment("p1")]);
}

#[tokio::test]
async fn test_duplicate_payment_token_is_a_failure() {
    let (transport, _calls) = ScriptedTransport::new(vec![
        RedemptionOutcome::Redeemed(payment("p1")),
        RedemptionOutcome::Redeemed(payment("p1")),
    ]);
    let mut h = start_with(Arc::new(MemoryStateStore::new()), transport).await;

    h.handle.add_unblinded_tokens(issue(2)).await.unwrap();

    h.handle.confirm(transaction("tx_1")).unwrap();
    expect_confirmed(&mut h.events).await;

    h.handle.confirm(transaction("tx_2")).unwrap();
    let failed = expect_failed(&mut h.events).await;
    assert_eq!(failed.transaction_id, "tx_2");

    let stats = h.handle.stats().await.unwrap();
    assert_eq!(stats.unblinded_payment_tokens, 1);
    // not retryable
    assert_eq!(stats.failed_confirmations, 0);
    assert!(!stats.retry_scheduled);
}

#[tokio::test]
async fn test_unrewarded_confirmation_is_sent() {
    let (transport, mut calls) = ScriptedTransport::new(vec![]);
    let mut h = start_with(Arc::new(MemoryStateStore::new()), transport).await;

    h.handle.confirm(transaction("tx_1")).unwrap();

    let confirmation = expect_confirmed(&mut h.events).await;
    assert!(!confirmation.is_rewarded());
    assert!(!confirmation.was_created);

    let sent = calls.recv().await.unwrap();
    assert!(sent.unblinded_token.is_none());
    assert!(sent.credential.is_none());
    assert_eq!(sent.confirmation_type, ConfirmationType::Viewed);
}

#[tokio::test]
async fn test_non_retryable_failure_is_dropped() {
    let (transport, _calls) =
        ScriptedTransport::new(vec![RedemptionOutcome::Failed { should_retry: false }]);
    let mut h = start_with(Arc::new(MemoryStateStore::new()), transport).await;

    h.handle.add_unblinded_tokens(issue(1)).await.unwrap();
    h.handle.confirm(transaction("tx_1")).unwrap();

    expect_failed(&mut h.events).await;

    let stats = h.handle.stats().await.unwrap();
    assert_eq!(stats.failed_confirmations, 0);
    assert_eq!(stats.unblinded_tokens, 0);
    assert!(!stats.retry_scheduled);
}

#[tokio::test]
async fn test_invalid_transaction_is_discarded() {
    let (transport, mut calls) = ScriptedTransport::new(vec![]);
    let mut h = start_with(Arc::new(MemoryStateStore::new()), transport).await;

    let mut invalid = transaction("tx_bad");
    invalid.ad_type = AdType::Undefined;
    h.handle.confirm(invalid).unwrap();
    h.handle.confirm(transaction("tx_good")).unwrap();

    let confirmation = expect_confirmed(&mut h.events).await;
    assert_eq!(confirmation.transaction_id, "tx_good");
    assert_eq!(calls.recv().await.unwrap().transaction_id, "tx_good");
    assert!(calls.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_unrewarded_failure_is_rebuilt_and_retried() {
    let (transport, _calls) =
        ScriptedTransport::new(vec![RedemptionOutcome::Failed { should_retry: true }]);
    let mut h = start_with(Arc::new(MemoryStateStore::new()), transport).await;

    let started = tokio::time::Instant::now();
    h.handle.confirm(transaction("tx_1")).unwrap();

    let failed = expect_failed(&mut h.events).await;
    let retried = expect_confirmed(&mut h.events).await;

    assert!(started.elapsed() >= Duration::from_secs(15));
    assert_ne!(retried.id, failed.id);
    assert_eq!(retried.transaction_id, failed.transaction_id);
    assert_eq!(retried.creative_instance_id, failed.creative_instance_id);
    assert_eq!(retried.value, failed.value);
    assert_eq!(retried.created_at, failed.created_at);
    assert!(!retried.was_created);

    let stats = h.handle.stats().await.unwrap();
    assert_eq!(stats.failed_confirmations, 0);
    assert!(!stats.retry_in_flight);
}

#[tokio::test(start_paused = true)]
async fn test_rewarded_failure_is_requeued_as_is() {
    let (transport, mut calls) =
        ScriptedTransport::new(vec![RedemptionOutcome::Failed { should_retry: true }]);
    let mut h = start_with(Arc::new(MemoryStateStore::new()), transport).await;

    h.handle.add_unblinded_tokens(issue(2)).await.unwrap();
    h.handle.confirm(transaction("tx_1")).unwrap();

    let failed = expect_failed(&mut h.events).await;
    let retried = expect_confirmed(&mut h.events).await;

    assert_eq!(retried.id, failed.id);
    assert_eq!(retried.credential, failed.credential);
    let first = calls.recv().await.unwrap();
    let second = calls.recv().await.unwrap();
    assert_eq!(first.id, second.id);

    // one spend for the transaction, not one per attempt
    assert_eq!(h.handle.stats().await.unwrap().unblinded_tokens, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_queue_drains_oldest_first() {
    let store = MemoryStateStore::with_snapshot(ConfirmationsSnapshot {
        failed_confirmations: vec![queued("a"), queued("b"), queued("c")],
        ..Default::default()
    });
    let (transport, mut calls) =
        ScriptedTransport::new(vec![RedemptionOutcome::Failed { should_retry: true }]);
    let mut h = start_with(Arc::new(store.clone()), transport.clone()).await;

    let mut order = Vec::new();
    for _ in 0..4 {
        order.push(calls.recv().await.unwrap().id);
    }
    assert_eq!(order, vec!["a", "b", "c", "a"]);

    assert_eq!(expect_failed(&mut h.events).await.id, "a");
    for id in ["b", "c", "a"] {
        assert_eq!(expect_confirmed(&mut h.events).await.id, id);
    }

    assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(store.snapshot().await.failed_confirmations.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retry_waits_for_backoff() {
    let store = MemoryStateStore::with_snapshot(ConfirmationsSnapshot {
        failed_confirmations: vec![queued("a")],
        ..Default::default()
    });
    let (transport, mut calls) = ScriptedTransport::new(vec![]);
    let h = start_with(Arc::new(store), transport).await;

    let stats = h.handle.stats().await.unwrap();
    assert!(stats.retry_scheduled);
    assert_eq!(stats.failed_confirmations, 1);

    tokio::time::sleep(Duration::from_secs(14)).await;
    assert!(calls.try_recv().is_err());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(calls.recv().await.unwrap().id, "a");
}

#[tokio::test(start_paused = true)]
async fn test_success_restarts_backoff() {
    let store = MemoryStateStore::with_snapshot(ConfirmationsSnapshot {
        failed_confirmations: vec![queued("a")],
        ..Default::default()
    });
    let (transport, mut calls) = ScriptedTransport::new(vec![]);
    let mut h = start_with(Arc::new(store), transport).await;
    assert!(h.handle.stats().await.unwrap().retry_scheduled);

    tokio::time::sleep(Duration::from_secs(10)).await;
    h.handle.confirm(transaction("tx_fresh")).unwrap();
    assert_eq!(expect_confirmed(&mut h.events).await.transaction_id, "tx_fresh");
    assert_eq!(calls.recv().await.unwrap().transaction_id, "tx_fresh");

    assert!(h.handle.stats().await.unwrap().retry_scheduled);

    // the original 15 s deadline has passed without a retry
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(calls.try_recv().is_err());
    assert_eq!(h.handle.stats().await.unwrap().failed_confirmations, 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(calls.recv().await.unwrap().id, "a");
    assert_eq!(expect_confirmed(&mut h.events).await.id, "a");
}

#[tokio::test(start_paused = true)]
async fn test_rebuild_attaches_newly_available_token() {
    let gate = Arc::new(Semaphore::new(1));
    let user_data = Arc::new(GatedUserData {
        gate: gate.clone(),
        inner: DefaultUserDataProvider::default(),
    });
    let (transport, _calls) = ScriptedTransport::new(vec![
        RedemptionOutcome::Failed { should_retry: true },
        RedemptionOutcome::Redeemed(payment("p1")),
    ]);
    let mut h = start(Arc::new(MemoryStateStore::new()), transport, user_data).await;

    h.handle.confirm(transaction("tx_1")).unwrap();
    let failed = expect_failed(&mut h.events).await;
    assert!(!failed.was_created);

    // the rebuild is blocked on user data; a token arrives meanwhile
    h.handle.add_unblinded_tokens(issue(1)).await.unwrap();
    gate.add_permits(1);

    let retried = expect_confirmed(&mut h.events).await;
    assert_eq!(retried.transaction_id, "tx_1");
    assert_ne!(retried.id, failed.id);
    assert!(retried.was_created);
    assert!(retried.is_rewarded());

    let stats = h.handle.stats().await.unwrap();
    assert_eq!(stats.unblinded_tokens, 0);
    assert_eq!(stats.unblinded_payment_tokens, 1);
}

#[tokio::test(start_paused = true)]
async fn test_issuers_out_of_date_is_retried() {
    let (transport, _calls) = ScriptedTransport::new(vec![RedemptionOutcome::IssuersOutOfDate]);
    let mut h = start_with(Arc::new(MemoryStateStore::new()), transport).await;

    h.handle.add_unblinded_tokens(issue(1)).await.unwrap();
    h.handle.confirm(transaction("tx_1")).unwrap();

    assert!(matches!(
        next_event(&mut h.events).await,
        ConfirmationEvent::IssuersOutOfDate
    ));
    expect_failed(&mut h.events).await;
    assert_eq!(h.handle.stats().await.unwrap().failed_confirmations, 1);

    expect_confirmed(&mut h.events).await;
}

#[tokio::test(start_paused = true)]
async fn test_retry_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("confirmations.json");

    let (failing, _calls) =
        ScriptedTransport::new(vec![RedemptionOutcome::Failed { should_retry: true }]);
    let mut first = start_with(Arc::new(JsonFileStateStore::new(&path)), failing).await;

    first.handle.add_unblinded_tokens(issue(1)).await.unwrap();
    first.handle.confirm(transaction("tx_1")).unwrap();
    let failed = expect_failed(&mut first.events).await;
    first.handle.shutdown().await.unwrap();

    let saved = JsonFileStateStore::new(&path).load().await.unwrap();
    assert_eq!(saved.failed_confirmations.len(), 1);
    assert_eq!(saved.failed_confirmations[0].id, failed.id);
    assert!(saved.unblinded_tokens.is_empty());

    let (transport, _calls) = ScriptedTransport::new(vec![RedemptionOutcome::Redeemed(payment("p1"))]);
    let mut second = start_with(Arc::new(JsonFileStateStore::new(&path)), transport).await;

    let retried = expect_confirmed(&mut second.events).await;
    assert_eq!(retried.id, failed.id);

    let saved = JsonFileStateStore::new(&path).load().await.unwrap();
    assert!(saved.failed_confirmations.is_empty());
    assert_eq!(saved.unblinded_payment_tokens, vec![payment("p1")]);
}

#[tokio::test]
async fn test_remove_payment_tokens() {
    let (transport, _calls) = ScriptedTransport::new(vec![RedemptionOutcome::Redeemed(payment("p1"))]);
    let mut h = start_with(Arc::new(MemoryStateStore::new()), transport).await;

    h.handle.add_unblinded_tokens(issue(1)).await.unwrap();
    h.handle.confirm(transaction("tx_1")).unwrap();
    expect_confirmed(&mut h.events).await;

    assert_eq!(h.handle.remove_payment_tokens(vec![payment("p1")]).await.unwrap(), 1);
    assert!(h.handle.snapshot().await.unwrap().unblinded_payment_tokens.is_empty());
}
