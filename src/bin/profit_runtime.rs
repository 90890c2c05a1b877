//! Profit Runtime
//!
//! Wires the profit engine into a long-running process:
//! - Opens the SQLite ledger (schema migrations run on open)
//! - Reconciles the profit state before accepting any trade
//! - Spawns the snapshot and rollover schedulers
//! - Reads newline-delimited JSON trades, warnings and top-pools reports from stdin
//!
//! Usage:
//!   bot-feed | cargo run --release --bin profit_runtime
//!
//! Environment variables:
//!   ARBWATCH_DB_PATH - SQLite database path (default: arb_bots.db)
//!   ARBWATCH_CHAINS - Tracked chains (default: bsc,sol,eth,sui)
//!   SNAPSHOT_INTERVAL_SECS - Snapshot upsert period (default: 60)
//!   INGEST_CHANNEL_BUFFER - Channel size (default: 10000)
//!   RUST_LOG - Log filter (default: info)

use arbwatch::profit::{
    config::EngineConfig,
    db::{Ledger, SqliteLedger},
    engine::{EngineOptions, ProfitEngine},
    ingestion::{read_jsonl, start_ingestion, InboundMessage},
    scheduler::spawn_scheduler,
    BroadcastEvent, ChannelBroadcaster, EventBroadcaster, TopBoard, WarningBuffer,
};
use dotenv::dotenv;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::{broadcast, mpsc};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Profit Runtime");

    let config = EngineConfig::from_env();
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Chains: {}", config.chains.join(", "));
    info!("   ├─ Snapshot interval: {}s", config.snapshot_interval_secs);
    info!(
        "   ├─ Retention: trades {}d, snapshots {} months",
        config.trade_retention_days, config.snapshot_retention_months
    );
    info!("   └─ Channel buffer: {} messages", config.channel_buffer);

    info!("🔧 Initializing database...");
    let ledger: Arc<dyn Ledger> = Arc::new(SqliteLedger::open(&config.db_path)?);
    info!("✅ Database initialized");

    let broadcaster = Arc::new(ChannelBroadcaster::new(config.broadcast_capacity));
    tokio::spawn(log_events(broadcaster.subscribe()));
    let sink: Arc<dyn EventBroadcaster> = broadcaster.clone();

    // Nothing may ingest until this succeeds
    let engine = match ProfitEngine::bootstrap(
        ledger,
        sink.clone(),
        EngineOptions {
            chains: config.chains.clone(),
            retention: config.retention(),
        },
    )
    .await
    {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!("❌ Initial reconciliation failed: {}", e);
            return Err(e.into());
        }
    };

    let warnings = Arc::new(WarningBuffer::new(config.warning_buffer_size, sink.clone()));
    let tops = Arc::new(TopBoard::new(sink));

    info!("🚀 Spawning background tasks...");
    let mut scheduler = spawn_scheduler(engine.clone(), config.snapshot_interval());
    info!("   ├─ ✅ Scheduler spawned");

    let (tx, rx) = mpsc::channel::<InboundMessage>(config.channel_buffer);
    let ingestion = tokio::spawn(start_ingestion(rx, engine.clone(), warnings, tops));
    info!("   ├─ ✅ Ingestion task spawned");

    let chains = config.chains.clone();
    tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        if let Err(e) = read_jsonl(stdin, tx, chains).await {
            error!("❌ stdin reader failed: {}", e);
        }
    });
    info!("   └─ ✅ stdin reader spawned");

    info!("🔄 Press CTRL+C to shutdown gracefully");

    let mut outcome: Result<(), Box<dyn std::error::Error>> = Ok(());
    tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
            Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
        },
        rollover = &mut scheduler.rollover => match rollover {
            Ok(Ok(())) => warn!("⚠️  Rollover scheduler exited"),
            Ok(Err(e)) => {
                error!("❌ Stopping: profit state could not be rebuilt ({})", e);
                outcome = Err(e.into());
            }
            Err(e) => {
                error!("❌ Rollover scheduler panicked: {}", e);
                outcome = Err(e.into());
            }
        },
    }

    scheduler.abort();
    ingestion.abort();

    info!("🔄 Persisting final snapshots...");
    if let Err(e) = engine.persist_snapshots().await {
        error!("❌ Final snapshot persist failed: {}", e);
    }

    info!("✅ Profit runtime stopped");
    outcome
}

/// Mirror dashboard events into the debug log
async fn log_events(mut rx: broadcast::Receiver<BroadcastEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => debug!("📣 {} {}", event.name, event.payload),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("📣 event log lagged, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
