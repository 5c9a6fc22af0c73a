//! Confirmations CLI
//!
//! Drives the confirmation engine against the configured state store with
//! a simulated redemption server.
//!
//! Usage:
//!   confirmations-cli confirm <transaction_id> <creative_instance_id> <type> <ad_type> <value>
//!   confirmations-cli retry
//!   confirmations-cli status
//!   confirmations-cli queue
//!   confirmations-cli issue <count>

use ad_confirmations::common::{init_from_config, ConfirmationsError, Result, StorageBackend};
use ad_confirmations::confirmations::{
    ConfirmationEngine, ConfirmationEvent, ConfirmationsHandle, ConfirmationsState,
    DefaultUserDataProvider, EventPublisher, SimulatedTransport,
};
use ad_confirmations::{
    AdType, ConfirmationType, ConfirmationsConfig, DigestTokenCipher, JsonFileStateStore,
    MemoryStateStore, SqliteStateStore, StateStore, StorageError, TokenCipher, TransactionInfo,
    UnblindedToken,
};
use dotenv::dotenv;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() {
    dotenv().ok();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    let config = match ConfirmationsConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate_for_production() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = init_from_config(&config) {
        eprintln!("Warning: {}", e);
    }

    let result = match args[1].as_str() {
        "confirm" => cmd_confirm(&config, &args[2..]).await,
        "retry" => cmd_retry(&config).await,
        "status" => cmd_status(&config).await,
        "queue" => cmd_queue(&config).await,
        "issue" => cmd_issue(&config, &args[2..]).await,
        "config" => {
            config.print_summary();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error [{}]: {}", e.error_code(), e);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("Ad Confirmations - Confirmation & Redemption Engine");
    println!();
    println!("Usage:");
    println!("  confirmations-cli confirm <tx> <creative> <type> <ad_type> <value>");
    println!("                                       Confirm an ad event");
    println!("  confirmations-cli retry              Drain the retry queue");
    println!("  confirmations-cli status             Show ledger and queue counts");
    println!("  confirmations-cli queue              List failed confirmations");
    println!("  confirmations-cli issue <count>      Add freshly issued tokens");
    println!("  confirmations-cli config             Show configuration");
    println!();
    println!("Examples:");
    println!("  confirmations-cli issue 10");
    println!("  confirmations-cli confirm tx_1 creative_1 view ad_notification 0.05");
    println!();
    println!("Environment:");
    println!("  CONFIRMATIONS_STORAGE                memory, sqlite or json");
    println!("  CONFIRMATIONS_STATE_PATH             State file location");
    println!("  CONFIRMATIONS_RETRY_AFTER_SECS       Retry backoff (default: 15)");
    println!("  CONFIRMATIONS_SIMULATED_FAILURE_RATE Injected failure rate");
}

fn open_store(config: &ConfirmationsConfig) -> std::result::Result<Arc<dyn StateStore>, StorageError> {
    Ok(match config.storage {
        StorageBackend::Memory => Arc::new(MemoryStateStore::new()),
        StorageBackend::Sqlite => Arc::new(SqliteStateStore::new(&config.state_path)?),
        StorageBackend::Json => Arc::new(JsonFileStateStore::new(&config.state_path)),
    })
}

async fn load_state(config: &ConfirmationsConfig) -> Result<ConfirmationsState> {
    let store = open_store(config)?;
    Ok(ConfirmationsState::load(store).await?)
}

async fn start_engine(
    config: &ConfirmationsConfig,
) -> Result<(ConfirmationsHandle, broadcast::Receiver<ConfirmationEvent>)> {
    let state = load_state(config).await?;
    let publisher = EventPublisher::default();
    let events = publisher.subscribe();

    let transport =
        SimulatedTransport::new().with_failure_rate(config.simulated_failure_rate);
    let user_data = DefaultUserDataProvider::new(config.build_channel.clone());

    let (handle, _task) = ConfirmationEngine::new(
        config.engine_config(),
        state,
        Arc::new(transport),
        Arc::new(user_data),
    )
    .with_observer(Arc::new(publisher))
    .with_reward_policy(Arc::new(config.reward_policy()))
    .spawn();

    Ok((handle, events))
}

/// Wait until no rebuilt confirmation is still on its way to the queue
async fn settle(handle: &ConfirmationsHandle) -> Result<()> {
    for _ in 0..100 {
        if handle.stats().await?.rebuilds_pending == 0 {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

fn print_event(event: &ConfirmationEvent) {
    match event {
        ConfirmationEvent::Confirmed { confirmation } => {
            println!("Confirmed: {}", confirmation);
            println!("  Rewarded: {}", confirmation.is_rewarded());
        }
        ConfirmationEvent::FailedToConfirm { confirmation } => {
            println!("Failed: {}", confirmation);
        }
        ConfirmationEvent::IssuersOutOfDate => {
            println!("Issuers are out of date");
        }
    }
}

async fn cmd_confirm(config: &ConfirmationsConfig, args: &[String]) -> Result<()> {
    if args.len() < 5 {
        println!("Usage: confirmations-cli confirm <transaction_id> <creative_instance_id> <type> <ad_type> <value>");
        return Ok(());
    }

    let confirmation_type: ConfirmationType = args[2]
        .parse()
        .map_err(|e| ConfirmationsError::validation(format!("{}", e)))?;
    let ad_type: AdType = args[3]
        .parse()
        .map_err(|e| ConfirmationsError::validation(format!("{}", e)))?;
    let value: f64 = args[4]
        .parse()
        .map_err(|_| ConfirmationsError::validation("invalid value"))?;

    let transaction = TransactionInfo::new(
        args[0].clone(),
        args[1].clone(),
        value,
        confirmation_type,
        ad_type,
    );
    if !transaction.is_valid() {
        return Err(ConfirmationsError::validation("transaction is missing required fields"));
    }

    let (handle, mut events) = start_engine(config).await?;
    handle.confirm(transaction)?;

    loop {
        match events.recv().await {
            Ok(ConfirmationEvent::IssuersOutOfDate) => print_event(&ConfirmationEvent::IssuersOutOfDate),
            Ok(event) => {
                print_event(&event);
                break;
            }
            Err(_) => break,
        }
    }

    settle(&handle).await?;

    let stats = handle.stats().await?;
    println!();
    println!("Unblinded tokens: {}", stats.unblinded_tokens);
    println!("Payment tokens: {}", stats.unblinded_payment_tokens);
    println!("Failed confirmations: {}", stats.failed_confirmations);
    if stats.failed_confirmations > 0 {
        println!();
        println!("Use 'confirmations-cli retry' to drain the retry queue.");
    }

    handle.shutdown().await?;
    Ok(())
}

async fn cmd_retry(config: &ConfirmationsConfig) -> Result<()> {
    let (handle, mut events) = start_engine(config).await?;

    let stats = handle.stats().await?;
    if stats.failed_confirmations == 0 {
        println!("No failed confirmations to retry.");
        handle.shutdown().await?;
        return Ok(());
    }

    println!("=== Draining Retry Queue ===");
    println!();
    println!("Queued: {}", stats.failed_confirmations);
    println!("Retry every {} seconds", config.retry_after_secs);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping...");
                break;
            }
        }

        settle(&handle).await?;
        let stats = handle.stats().await?;
        if stats.failed_confirmations == 0 && !stats.retry_in_flight {
            println!();
            println!("Retry queue is empty.");
            break;
        }
    }

    handle.shutdown().await?;
    Ok(())
}

async fn cmd_status(config: &ConfirmationsConfig) -> Result<()> {
    let state = load_state(config).await?;
    let ledger = state.ledger();

    println!("=== Confirmations Status ===");
    println!();
    println!("Store: {}", state.store_type());
    println!();
    println!("Ledger:");
    println!("  Unblinded Tokens: {}", ledger.token_count());
    println!("  Payment Tokens: {}", ledger.payment_token_count());
    println!();
    println!("Retry Queue:");
    println!("  Failed Confirmations: {}", state.retry_queue().len());
    if let Some(oldest) = state.retry_queue().front() {
        println!("  Oldest: {} ({})", oldest.id, oldest.created_at.to_rfc3339());
    }

    Ok(())
}

async fn cmd_queue(config: &ConfirmationsConfig) -> Result<()> {
    let state = load_state(config).await?;
    let queue = state.retry_queue();

    if queue.is_empty() {
        println!("No failed confirmations.");
        return Ok(());
    }

    println!("=== Failed Confirmations ({}) ===", queue.len());
    println!();

    for confirmation in queue.iter() {
        println!("---");
        println!("ID: {}", confirmation.id);
        println!("Transaction: {}", confirmation.transaction_id);
        println!("Creative Instance: {}", confirmation.creative_instance_id);
        println!("Type: {} / {}", confirmation.confirmation_type, confirmation.ad_type);
        println!("Value: {}", confirmation.value);
        println!("Created: {}", confirmation.created_at.to_rfc3339());
        println!("Rewarded: {}", confirmation.is_rewarded());
        println!();
    }

    Ok(())
}

async fn cmd_issue(config: &ConfirmationsConfig, args: &[String]) -> Result<()> {
    if args.is_empty() {
        println!("Usage: confirmations-cli issue <count>");
        return Ok(());
    }

    let count: usize = args[0]
        .parse()
        .map_err(|_| ConfirmationsError::validation("invalid count"))?;

    let cipher = DigestTokenCipher::new();
    let public_key = SimulatedTransport::new().public_key().to_string();
    let tokens: Vec<UnblindedToken> = cipher
        .generate(count)
        .into_iter()
        .map(|token| UnblindedToken::new(token.as_str(), public_key.clone()))
        .collect();

    let mut state = load_state(config).await?;
    let added = state.add_unblinded_tokens(tokens).await;

    println!("Issued {} unblinded tokens", added);
    println!("  Total: {}", state.ledger().token_count());

    Ok(())
}
