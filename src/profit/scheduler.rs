//! Periodic background tasks
//!
//! - snapshot task: every interval, upsert each chain's `today` into its
//!   daily snapshot row
//! - rollover task: shortly after each local midnight, purge expired data and
//!   rebuild the profit state for the new day
//!
//! A failed snapshot tick is logged and retried on the next tick. A failed
//! rollover ends the rollover task with the error so the runtime can stop
//! instead of serving windows for the wrong day.

use super::engine::{ProfitEngine, RolloverReport};
use super::error::EngineError;
use super::windows::until_next_midnight;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Delay past midnight before rolling over, so the new day's clock is settled
const ROLLOVER_GRACE: Duration = Duration::from_secs(1);

/// Snapshot task - runs until cancelled
pub async fn snapshot_task(engine: Arc<ProfitEngine>, period: Duration) {
    log::info!("⏰ Starting snapshot scheduler (interval: {:?})", period);

    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately; the state was just reconciled
    timer.tick().await;

    loop {
        timer.tick().await;
        if let Err(e) = engine.persist_snapshots().await {
            log::error!("❌ Snapshot tick failed: {}", e);
        }
    }
}

/// Rollover task - returns only when a rollover fails
pub async fn rollover_task(engine: Arc<ProfitEngine>) -> Result<(), EngineError> {
    log::info!("🌙 Starting daily rollover scheduler");

    loop {
        let wait = until_next_midnight(engine.now()) + ROLLOVER_GRACE;
        log::debug!("   └─ Next rollover in {}s", wait.as_secs());
        tokio::time::sleep(wait).await;

        let report = run_rollover_once(&engine).await?;
        log::info!("✅ Rollover complete for {}", report.day);
    }
}

/// Run a single rollover and push the fresh aggregates to subscribers
pub async fn run_rollover_once(engine: &ProfitEngine) -> Result<RolloverReport, EngineError> {
    match engine.run_rollover().await {
        Ok(report) => {
            engine.publish_aggregates();
            Ok(report)
        }
        Err(e) => {
            log::error!("❌ Daily rollover failed: {}", e);
            Err(e)
        }
    }
}

/// Handles for the spawned background tasks
pub struct SchedulerHandles {
    pub snapshot: JoinHandle<()>,
    pub rollover: JoinHandle<Result<(), EngineError>>,
}

impl SchedulerHandles {
    pub fn abort(&self) {
        self.snapshot.abort();
        self.rollover.abort();
    }
}

pub fn spawn_scheduler(engine: Arc<ProfitEngine>, snapshot_period: Duration) -> SchedulerHandles {
    SchedulerHandles {
        snapshot: tokio::spawn(snapshot_task(engine.clone(), snapshot_period)),
        rollover: tokio::spawn(rollover_task(engine)),
    }
}
