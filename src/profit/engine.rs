//! Profit Engine - owns the live profit state and every operation on it
//!
//! ```text
//! TradeInput
//!     ↓
//! ProfitEngine::ingest()
//!     ↓ Ledger::append_trades()     (durable first; failure leaves the book untouched)
//!     ↓ ProfitBook::record_trade()  (cache + tag index under one write lock)
//!     ↓ EventBroadcaster            (newTrade, profitUpdate, welcomeUpdate, tagProfitUpdate)
//! ```
//!
//! An engine only exists once the initial reconciliation has succeeded, so
//! nothing can ingest into or read from an unreconciled book.
//!
//! Rollover holds `rebuild_gate` exclusively while it reads the ledger and swaps
//! the book; ingestion holds it shared across append + apply. A trade is
//! therefore either fully visible to the rebuild (and included in it) or
//! applied after the swap, never both.

use super::broadcast::{
    publish_json, EventBroadcaster, NEW_TRADE, PROFIT_UPDATE, TAG_PROFIT_UPDATE, WELCOME_UPDATE,
};
use super::db::{Ledger, TradeQuery};
use super::error::{EngineError, LedgerError};
use super::reconciler::StatsReconciler;
use super::state::ProfitBook;
use super::types::{
    normalize_chain, ChainProfit, NewTradeNotice, ProfitInfo, ProfitSnapshotRow, ProfitSummary,
    ProfitWindowStats, TagTotal, TradeInput, TradeRecord, WelcomeInfo,
};
use super::windows::{DayRange, RetentionPolicy};
use chrono::{DateTime, Local, NaiveDate};
use parking_lot::RwLock;
use std::sync::Arc;

type Clock = Box<dyn Fn() -> DateTime<Local> + Send + Sync>;

/// Static engine settings
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Tracked chains, already normalized
    pub chains: Vec<String>,
    pub retention: RetentionPolicy,
}

/// Outcome of one daily rollover
///
/// Retention counts are `None` when that delete failed (logged, non-fatal).
#[derive(Debug, Clone, PartialEq)]
pub struct RolloverReport {
    pub day: NaiveDate,
    pub finalized_day: Option<NaiveDate>,
    pub trades_deleted: Option<usize>,
    pub snapshots_deleted: Option<usize>,
}

pub struct ProfitEngine {
    ledger: Arc<dyn Ledger>,
    reconciler: StatsReconciler,
    broadcaster: Arc<dyn EventBroadcaster>,
    chains: Vec<String>,
    retention: RetentionPolicy,
    book: RwLock<ProfitBook>,
    rebuild_gate: tokio::sync::RwLock<()>,
    now_fn: Clock,
}

impl ProfitEngine {
    /// Reconcile from the ledger and return a ready engine
    ///
    /// Fails if the ledger cannot be read; callers must treat that as fatal.
    pub async fn bootstrap(
        ledger: Arc<dyn Ledger>,
        broadcaster: Arc<dyn EventBroadcaster>,
        options: EngineOptions,
    ) -> Result<Self, EngineError> {
        Self::bootstrap_with_clock(ledger, broadcaster, options, Box::new(Local::now)).await
    }

    /// Same as [`bootstrap`](Self::bootstrap) with a custom clock (for tests)
    pub async fn bootstrap_with_clock(
        ledger: Arc<dyn Ledger>,
        broadcaster: Arc<dyn EventBroadcaster>,
        options: EngineOptions,
        now_fn: Clock,
    ) -> Result<Self, EngineError> {
        let reconciler = StatsReconciler::new(ledger.clone());
        let today = now_fn().date_naive();

        log::info!("🔧 Reconciling profit state for {} chains ({})", options.chains.len(), today);
        let book = reconciler.rebuild(&options.chains, today).await?;
        log::info!("✅ Profit state ready");

        Ok(Self {
            ledger,
            reconciler,
            broadcaster,
            chains: options.chains,
            retention: options.retention,
            book: RwLock::new(book),
            rebuild_gate: tokio::sync::RwLock::new(()),
            now_fn,
        })
    }

    pub fn now(&self) -> DateTime<Local> {
        (self.now_fn)()
    }

    pub fn chains(&self) -> &[String] {
        &self.chains
    }

    pub fn is_tracked(&self, chain: &str) -> bool {
        self.chains.iter().any(|c| c == chain)
    }

    /// Record one trade: append, apply, broadcast
    pub async fn ingest(&self, trade: TradeInput) -> Result<TradeRecord, EngineError> {
        let mut records = self.ingest_batch(vec![trade]).await?;
        records.pop().ok_or(EngineError::Ledger(LedgerError::ShortAppend {
            expected: 1,
            returned: 0,
        }))
    }

    /// Record several trades atomically
    ///
    /// Every trade must name a tracked chain, otherwise nothing is written.
    /// If the append fails nothing is applied to the in-memory state.
    pub async fn ingest_batch(&self, trades: Vec<TradeInput>) -> Result<Vec<TradeRecord>, EngineError> {
        if trades.is_empty() {
            return Ok(Vec::new());
        }

        let trades: Vec<TradeInput> = trades.into_iter().map(TradeInput::normalized).collect();
        if let Some(bad) = trades.iter().find(|t| !self.is_tracked(&t.chain)) {
            return Err(EngineError::UntrackedChain(bad.chain.clone()));
        }

        let notices = {
            let _gate = self.rebuild_gate.read().await;
            // Stamped under the gate: a rollover either runs before this clock
            // read or sees the appended trade
            let created_at = self.now().timestamp();
            let records = self.ledger.append_trades(&trades, created_at).await?;
            if records.len() != trades.len() {
                return Err(LedgerError::ShortAppend {
                    expected: trades.len(),
                    returned: records.len(),
                }
                .into());
            }

            let mut book = self.book.write();
            records
                .into_iter()
                .map(|trade| {
                    let tx_count = book.record_trade(&trade).unwrap_or(0);
                    NewTradeNotice { trade, tx_count }
                })
                .collect::<Vec<_>>()
        };

        for notice in &notices {
            log::debug!("💰 newTrade {} on {} (today tx={})", notice.trade.hash, notice.trade.chain, notice.tx_count);
            publish_json(self.broadcaster.as_ref(), NEW_TRADE, notice);
        }
        self.publish_aggregates();

        Ok(notices.into_iter().map(|n| n.trade).collect())
    }

    /// Push the current aggregates to subscribers
    pub fn publish_aggregates(&self) {
        let (profits, welcome, tags) = {
            let book = self.book.read();
            (
                Self::profits_of(&book),
                Self::welcome_of(&book),
                book.tags.totals(),
            )
        };
        let broadcaster = self.broadcaster.as_ref();
        publish_json(broadcaster, WELCOME_UPDATE, &welcome);
        publish_json(broadcaster, PROFIT_UPDATE, &profits);
        publish_json(broadcaster, TAG_PROFIT_UPDATE, &tags);
    }

    /// Copy of a chain's six windows
    pub fn snapshot(&self, chain: &str) -> Option<ProfitWindowStats> {
        self.book.read().snapshot(&normalize_chain(chain))
    }

    pub fn tag_totals(&self) -> Vec<TagTotal> {
        self.book.read().tags.totals()
    }

    /// Six windows for every tracked chain
    pub fn profits(&self) -> Vec<ChainProfit> {
        Self::profits_of(&self.book.read())
    }

    /// Today's income and count per chain
    pub fn welcome(&self) -> Vec<WelcomeInfo> {
        Self::welcome_of(&self.book.read())
    }

    pub fn profit_summary(&self) -> Vec<ProfitSummary> {
        let book = self.book.read();
        book.cache
            .iter()
            .map(|(chain, stats)| ProfitSummary::from_stats(chain, stats))
            .collect()
    }

    pub async fn recent_trades(&self, limit: usize) -> Result<Vec<TradeRecord>, EngineError> {
        Ok(self.ledger.recent_trades(limit).await?)
    }

    pub async fn search_trades(&self, query: &TradeQuery) -> Result<Vec<TradeRecord>, EngineError> {
        Ok(self.ledger.search_trades(query).await?)
    }

    /// Upsert each chain's `today` into its snapshot row
    ///
    /// Rows are keyed by the day the book was reconciled for. Once the wall
    /// clock has passed that day the write is skipped; the rollover finalizes
    /// the closed day from raw trades instead.
    ///
    /// Every chain is attempted; the first failure is returned after the rest.
    /// Holds `rebuild_gate` shared throughout, so a write can never land on
    /// top of a row the rollover has just finalized.
    pub async fn persist_snapshots(&self) -> Result<usize, EngineError> {
        let _gate = self.rebuild_gate.read().await;
        let today = self.now().date_naive();
        let (day, rows) = {
            let book = self.book.read();
            let rows: Vec<ProfitSnapshotRow> = book
                .cache
                .iter()
                .map(|(chain, stats)| ProfitSnapshotRow::new(chain, book.day(), stats.today))
                .collect();
            (book.day(), rows)
        };

        if day != today {
            log::debug!("⏸️  Snapshot skipped: book is for {}, rollover to {} pending", day, today);
            return Ok(0);
        }

        let mut written = 0;
        let mut first_err = None;
        for row in &rows {
            match self.ledger.upsert_snapshot(row).await {
                Ok(()) => written += 1,
                Err(e) => {
                    log::error!("❌ Failed to persist snapshot for {}: {}", row.chain, e);
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e.into()),
            None => {
                log::debug!("✅ Persisted {} snapshot rows for {}", written, day);
                Ok(written)
            }
        }
    }

    /// Daily retention + rebuild
    ///
    /// 1. finalize the closed day's snapshot rows from raw trades
    /// 2. delete expired trades and snapshot rows
    /// 3. rebuild cache and tag index off to the side, settle the new day's
    ///    `today` from raw trades, then swap
    ///
    /// Trades stamped after midnight but applied to the closing book are
    /// picked up by the settle step; no snapshot row exists for them yet.
    ///
    /// Steps 1 and 2 log and continue on failure. A step 3 failure is returned
    /// and the previous book stays installed.
    pub async fn run_rollover(&self) -> Result<RolloverReport, EngineError> {
        let _gate = self.rebuild_gate.write().await;

        let now = self.now();
        let today = now.date_naive();

        let closing_day = self.book.read().day();
        let finalized_day = if closing_day < today {
            match self.finalize_day(closing_day).await {
                Ok(()) => Some(closing_day),
                Err(e) => {
                    log::error!("❌ Failed to finalize snapshots for {}: {}", closing_day, e);
                    None
                }
            }
        } else {
            None
        };

        let trade_cutoff = self.retention.trade_cutoff(now);
        let trades_deleted = match self.ledger.delete_trades_before(trade_cutoff).await {
            Ok(n) => Some(n),
            Err(e) => {
                log::error!("❌ Trade retention cleanup failed: {}", e);
                None
            }
        };

        let snapshot_cutoff = self.retention.snapshot_cutoff(today);
        let snapshots_deleted = match self.ledger.delete_snapshots_before(snapshot_cutoff).await {
            Ok(n) => Some(n),
            Err(e) => {
                log::error!("❌ Snapshot retention cleanup failed: {}", e);
                None
            }
        };

        let mut fresh = self.reconciler.rebuild(&self.chains, today).await?;
        self.reconciler.settle_today(&mut fresh).await?;
        *self.book.write() = fresh;

        log::info!(
            "🧹 Rollover to {}: deleted {:?} trades (before {}), {:?} snapshot rows (before {})",
            today,
            trades_deleted,
            trade_cutoff,
            snapshots_deleted,
            snapshot_cutoff,
        );

        Ok(RolloverReport {
            day: today,
            finalized_day,
            trades_deleted,
            snapshots_deleted,
        })
    }

    /// Overwrite `day`'s snapshot rows with totals from raw trades
    async fn finalize_day(&self, day: NaiveDate) -> Result<(), LedgerError> {
        let range = DayRange::day(day).to_time_range();
        for chain in &self.chains {
            let trades = self.ledger.trades_between(chain, range).await?;
            let row = ProfitSnapshotRow::new(chain, day, ProfitInfo::from_trades(&trades));
            self.ledger.upsert_snapshot(&row).await?;
        }
        Ok(())
    }

    fn profits_of(book: &ProfitBook) -> Vec<ChainProfit> {
        book.cache
            .iter()
            .map(|(chain, stats)| ChainProfit {
                chain: chain.to_string(),
                stats: *stats,
            })
            .collect()
    }

    fn welcome_of(book: &ProfitBook) -> Vec<WelcomeInfo> {
        book.cache
            .iter()
            .map(|(chain, stats)| WelcomeInfo {
                chain: chain.to_string(),
                income: stats.today.income,
                tx_count: stats.today.tx_count,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profit::broadcast::{BroadcastEvent, ChannelBroadcaster};
    use crate::profit::db::SqliteLedger;
    use crate::profit::windows::TimeRange;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use parking_lot::Mutex;

    fn chains() -> Vec<String> {
        vec!["bsc".to_string(), "sol".to_string()]
    }

    fn options() -> EngineOptions {
        EngineOptions {
            chains: chains(),
            retention: RetentionPolicy::default(),
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, 0, 0).single().unwrap()
    }

    fn input(chain: &str, income: f64, tags: &[&str]) -> TradeInput {
        TradeInput {
            chain: chain.to_string(),
            builder: "b".to_string(),
            hash: format!("0x{}", income),
            victim_hashes: vec![],
            gross: income * 2.0,
            bribe: 0.1,
            income,
            ratio: 0.5,
            extra_info: String::new(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Engine whose clock can be moved by the test
    async fn engine_at(
        ledger: Arc<dyn Ledger>,
        broadcaster: Arc<dyn EventBroadcaster>,
        start: DateTime<Local>,
    ) -> (ProfitEngine, Arc<Mutex<DateTime<Local>>>) {
        let clock = Arc::new(Mutex::new(start));
        let handle = clock.clone();
        let engine = ProfitEngine::bootstrap_with_clock(
            ledger,
            broadcaster,
            options(),
            Box::new(move || *handle.lock()),
        )
        .await
        .unwrap();
        (engine, clock)
    }

    enum AppendFault {
        DiskFull,
        /// Accepts the write but returns no records
        Empty,
    }

    struct FailingLedger {
        inner: SqliteLedger,
        fault: AppendFault,
    }

    #[async_trait]
    impl Ledger for FailingLedger {
        async fn append_trades(&self, _: &[TradeInput], _: i64) -> Result<Vec<TradeRecord>, LedgerError> {
            match self.fault {
                AppendFault::DiskFull => Err(LedgerError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))),
                AppendFault::Empty => Ok(Vec::new()),
            }
        }
        async fn trades_between(&self, chain: &str, range: TimeRange) -> Result<Vec<TradeRecord>, LedgerError> {
            self.inner.trades_between(chain, range).await
        }
        async fn upsert_snapshot(&self, row: &ProfitSnapshotRow) -> Result<(), LedgerError> {
            self.inner.upsert_snapshot(row).await
        }
        async fn snapshots_between(&self, chain: &str, range: DayRange) -> Result<Vec<ProfitSnapshotRow>, LedgerError> {
            self.inner.snapshots_between(chain, range).await
        }
        async fn delete_trades_before(&self, cutoff: i64) -> Result<usize, LedgerError> {
            self.inner.delete_trades_before(cutoff).await
        }
        async fn delete_snapshots_before(&self, cutoff: NaiveDate) -> Result<usize, LedgerError> {
            self.inner.delete_snapshots_before(cutoff).await
        }
        async fn recent_trades(&self, limit: usize) -> Result<Vec<TradeRecord>, LedgerError> {
            self.inner.recent_trades(limit).await
        }
        async fn search_trades(&self, query: &TradeQuery) -> Result<Vec<TradeRecord>, LedgerError> {
            self.inner.search_trades(query).await
        }
    }

    #[derive(Default)]
    struct RecordingBroadcaster {
        events: Mutex<Vec<BroadcastEvent>>,
    }

    impl EventBroadcaster for RecordingBroadcaster {
        fn publish(&self, name: &str, payload: serde_json::Value) {
            self.events.lock().push(BroadcastEvent {
                name: name.to_string(),
                payload,
            });
        }
    }

    #[tokio::test]
    async fn test_ingest_bsc_three_trades() {
        let ledger = Arc::new(SqliteLedger::open_in_memory().unwrap());
        let (engine, _) = engine_at(ledger, Arc::new(ChannelBroadcaster::new(16)), at(2024, 5, 15, 12)).await;

        for income in [3.0, 4.0, 5.0] {
            engine.ingest(input("bsc", income, &[])).await.unwrap();
        }

        let stats = engine.snapshot("bsc").unwrap();
        assert_eq!(stats.today.income, 12.0);
        assert_eq!(stats.today.tx_count, 3);
        assert_eq!(engine.snapshot("sol").unwrap().today.tx_count, 0);
    }

    #[tokio::test]
    async fn test_ingest_normalizes_and_rejects_untracked() {
        let ledger = Arc::new(SqliteLedger::open_in_memory().unwrap());
        let (engine, _) = engine_at(ledger.clone(), Arc::new(ChannelBroadcaster::new(16)), at(2024, 5, 15, 12)).await;

        engine.ingest(input("BSC", 1.0, &[])).await.unwrap();
        assert_eq!(engine.snapshot("bsc").unwrap().today.tx_count, 1);

        let err = engine.ingest(input("doge", 1.0, &[])).await.unwrap_err();
        assert!(matches!(err, EngineError::UntrackedChain(ref c) if c == "doge"));

        // Mixed batch is rejected as a whole
        let err = engine
            .ingest_batch(vec![input("bsc", 2.0, &[]), input("doge", 2.0, &[])])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UntrackedChain(_)));
        assert_eq!(ledger.recent_trades(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_append_leaves_cache_untouched() {
        let ledger = Arc::new(FailingLedger {
            inner: SqliteLedger::open_in_memory().unwrap(),
            fault: AppendFault::DiskFull,
        });
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let (engine, _) = engine_at(ledger, broadcaster.clone(), at(2024, 5, 15, 12)).await;

        let result = engine.ingest(input("bsc", 10.0, &["A"])).await;
        assert!(matches!(result, Err(EngineError::Ledger(_))));
        assert_eq!(engine.snapshot("bsc").unwrap().today, ProfitInfo::default());
        assert!(engine.tag_totals().is_empty());
        assert!(broadcaster.events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_ingest_broadcasts_trade_and_aggregates() {
        let ledger = Arc::new(SqliteLedger::open_in_memory().unwrap());
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let (engine, _) = engine_at(ledger, broadcaster.clone(), at(2024, 5, 15, 12)).await;

        engine.ingest(input("sol", 1.0, &[])).await.unwrap();
        engine.ingest(input("sol", 10.0, &["A", "B"])).await.unwrap();

        let events = broadcaster.events.lock();
        let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            &names[4..],
            &[NEW_TRADE, WELCOME_UPDATE, PROFIT_UPDATE, TAG_PROFIT_UPDATE]
        );

        let trade = &events[4].payload;
        assert_eq!(trade["chain"], "sol");
        assert_eq!(trade["txCount"], 2);
        assert_eq!(trade["tags"], serde_json::json!(["A", "B"]));

        let profits = events[6].payload.as_array().unwrap();
        assert_eq!(profits.len(), 2);
        assert_eq!(profits[1]["chain"], "sol");
        assert_eq!(profits[1]["today"]["income"], 11.0);

        let tags = events[7].payload.as_array().unwrap();
        assert_eq!(tags.len(), 2);
        assert!(tags.iter().all(|t| t["total"] == 10.0));
    }

    #[tokio::test]
    async fn test_batch_ingest_publishes_one_aggregate_round() {
        let ledger = Arc::new(SqliteLedger::open_in_memory().unwrap());
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let (engine, _) = engine_at(ledger, broadcaster.clone(), at(2024, 5, 15, 12)).await;

        let records = engine
            .ingest_batch(vec![input("bsc", 1.0, &[]), input("sol", 2.0, &[]), input("bsc", 3.0, &[])])
            .await
            .unwrap();
        assert_eq!(records.len(), 3);

        let events = broadcaster.events.lock();
        let new_trades: Vec<&BroadcastEvent> = events.iter().filter(|e| e.name == NEW_TRADE).collect();
        assert_eq!(new_trades.len(), 3);
        assert_eq!(new_trades[2].payload["txCount"], 2);
        assert_eq!(events.iter().filter(|e| e.name == PROFIT_UPDATE).count(), 1);
    }

    #[tokio::test]
    async fn test_summaries() {
        let ledger = Arc::new(SqliteLedger::open_in_memory().unwrap());
        let (engine, _) = engine_at(ledger, Arc::new(ChannelBroadcaster::new(16)), at(2024, 5, 15, 12)).await;
        engine.ingest(input("bsc", 5.0, &[])).await.unwrap();

        let welcome = engine.welcome();
        assert_eq!(welcome[0], WelcomeInfo { chain: "bsc".to_string(), income: 5.0, tx_count: 1 });
        assert_eq!(welcome[1].tx_count, 0);

        let summary = engine.profit_summary();
        assert_eq!(summary[0].day, 5.0);
        assert_eq!(summary[0].day_ratio, 0.5);
        assert_eq!(summary[1].day_ratio, 0.0);

        assert_eq!(engine.profits().len(), 2);
        assert_eq!(engine.recent_trades(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_persist_does_not_double_count() {
        let ledger: Arc<dyn Ledger> = Arc::new(SqliteLedger::open_in_memory().unwrap());
        let now = at(2024, 5, 15, 12);
        let (engine, _) = engine_at(ledger.clone(), Arc::new(ChannelBroadcaster::new(16)), now).await;

        // Monday's closed row so the cold start takes the snapshot path
        ledger
            .upsert_snapshot(&ProfitSnapshotRow {
                chain: "bsc".to_string(),
                day: now.date_naive() - Duration::days(2),
                gross: 2.0,
                income: 1.0,
                tx_count: 1,
            })
            .await
            .unwrap();

        for income in [3.0, 4.0, 5.0] {
            engine.ingest(input("bsc", income, &[])).await.unwrap();
        }
        for _ in 0..4 {
            assert_eq!(engine.persist_snapshots().await.unwrap(), 2);
        }

        let (cold, _) = engine_at(ledger, Arc::new(ChannelBroadcaster::new(16)), now).await;
        let stats = cold.snapshot("bsc").unwrap();
        assert_eq!(stats.today.income, 12.0);
        assert_eq!(stats.today.tx_count, 3);
        assert_eq!(stats.this_week.income, 13.0);
        assert_eq!(stats.this_week.tx_count, 4);
    }

    #[tokio::test]
    async fn test_persist_skipped_after_midnight_until_rollover() {
        let ledger: Arc<dyn Ledger> = Arc::new(SqliteLedger::open_in_memory().unwrap());
        let (engine, clock) = engine_at(ledger.clone(), Arc::new(ChannelBroadcaster::new(16)), at(2024, 5, 15, 23)).await;
        engine.ingest(input("bsc", 3.0, &[])).await.unwrap();

        *clock.lock() = at(2024, 5, 16, 0);
        assert_eq!(engine.persist_snapshots().await.unwrap(), 0);
        let rows = ledger
            .snapshots_between("bsc", DayRange::day(at(2024, 5, 16, 0).date_naive()))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_rollover_advances_windows() {
        let ledger: Arc<dyn Ledger> = Arc::new(SqliteLedger::open_in_memory().unwrap());
        // Tuesday
        let (engine, clock) = engine_at(ledger.clone(), Arc::new(ChannelBroadcaster::new(16)), at(2024, 5, 14, 10)).await;
        engine.ingest(input("bsc", 3.0, &["A"])).await.unwrap();
        engine.ingest(input("bsc", 4.0, &["A"])).await.unwrap();
        engine.persist_snapshots().await.unwrap();
        // Lands after the last minute tick; finalization must still count it
        engine.ingest(input("bsc", 5.0, &["B"])).await.unwrap();

        // Wednesday midnight
        *clock.lock() = Local.with_ymd_and_hms(2024, 5, 15, 0, 0, 1).single().unwrap();
        let report = engine.run_rollover().await.unwrap();
        assert_eq!(report.finalized_day, Some(at(2024, 5, 14, 0).date_naive()));
        assert_eq!(report.trades_deleted, Some(0));

        let stats = engine.snapshot("bsc").unwrap();
        assert_eq!(stats.today, ProfitInfo::default());
        assert_eq!(stats.yesterday.income, 12.0);
        assert_eq!(stats.yesterday.tx_count, 3);
        assert_eq!(stats.this_week.income, 12.0);
        assert!(engine.tag_totals().is_empty());

        *clock.lock() = at(2024, 5, 15, 9);
        engine.ingest(input("bsc", 1.0, &["C"])).await.unwrap();
        let stats = engine.snapshot("bsc").unwrap();
        assert_eq!(stats.today.tx_count, 1);
        assert_eq!(engine.tag_totals().len(), 1);
    }

    #[tokio::test]
    async fn test_rollover_applies_retention() {
        let ledger: Arc<dyn Ledger> = Arc::new(SqliteLedger::open_in_memory().unwrap());
        // Late in the month, so a 15-day-old trade still falls in this month
        let now = Local.with_ymd_and_hms(2024, 5, 31, 0, 0, 1).single().unwrap();
        let today = now.date_naive();

        let old_ts = (now - Duration::days(15)).timestamp();
        let kept_ts = (now - Duration::days(10)).timestamp();
        ledger.append_trade(&input("bsc", 50.0, &[]), old_ts).await.unwrap();
        ledger.append_trade(&input("bsc", 2.0, &[]), kept_ts).await.unwrap();
        let april = NaiveDate::from_ymd_opt(2024, 4, 20).unwrap();
        for (day, income) in [(today - Duration::days(90), 100.0), (april, 7.0)] {
            ledger
                .upsert_snapshot(&ProfitSnapshotRow { chain: "bsc".to_string(), day, gross: income, income, tx_count: 1 })
                .await
                .unwrap();
        }

        let (engine, _) = engine_at(ledger.clone(), Arc::new(ChannelBroadcaster::new(16)), now).await;
        assert_eq!(engine.snapshot("bsc").unwrap().this_month.income, 52.0);

        let report = engine.run_rollover().await.unwrap();
        assert_eq!(report.trades_deleted, Some(1));
        assert_eq!(report.snapshots_deleted, Some(1));
        assert_eq!(report.finalized_day, None);

        let everything = TimeRange { start: 0, end: i64::MAX };
        let trades = ledger.trades_between("bsc", everything).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].income, 2.0);

        let rows = ledger
            .snapshots_between("bsc", DayRange::new(today - Duration::days(365), today))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].income, 7.0);

        // Purged data is gone from the windows too
        let stats = engine.snapshot("bsc").unwrap();
        assert_eq!(stats.this_month.income, 2.0);
        assert_eq!(stats.this_month.tx_count, 1);
        assert_eq!(stats.last_month.income, 7.0);
        assert_eq!(stats.last_month.tx_count, 1);
    }

    #[tokio::test]
    async fn test_trade_after_midnight_survives_rollover() {
        let ledger: Arc<dyn Ledger> = Arc::new(SqliteLedger::open_in_memory().unwrap());
        // Wednesday
        let (engine, clock) = engine_at(ledger.clone(), Arc::new(ChannelBroadcaster::new(16)), at(2024, 5, 15, 12)).await;
        engine.ingest(input("bsc", 3.0, &[])).await.unwrap();
        engine.persist_snapshots().await.unwrap();

        // Thursday 00:00:00, before the rollover task has fired
        *clock.lock() = at(2024, 5, 16, 0);
        engine.ingest(input("bsc", 7.0, &["T"])).await.unwrap();

        *clock.lock() = Local.with_ymd_and_hms(2024, 5, 16, 0, 0, 1).single().unwrap();
        let report = engine.run_rollover().await.unwrap();
        assert_eq!(report.finalized_day, Some(at(2024, 5, 15, 0).date_naive()));

        let stats = engine.snapshot("bsc").unwrap();
        assert_eq!(stats.today.tx_count, 1);
        assert_eq!(stats.today.income, 7.0);
        assert_eq!(stats.yesterday.income, 3.0);
        assert_eq!(stats.this_week.tx_count, 2);
        assert_eq!(stats.this_week.income, 10.0);
        assert_eq!(stats.this_month.tx_count, 2);
        assert_eq!(engine.tag_totals()[0].total, stats.today.income);

        // The next tick persists the settled value, so a cold start agrees
        *clock.lock() = at(2024, 5, 16, 1);
        engine.persist_snapshots().await.unwrap();
        let (cold, _) = engine_at(ledger, Arc::new(ChannelBroadcaster::new(16)), at(2024, 5, 16, 1)).await;
        assert_eq!(cold.snapshot("bsc").unwrap().today, stats.today);
        assert_eq!(cold.snapshot("bsc").unwrap().this_week.tx_count, 2);
    }

    #[tokio::test]
    async fn test_trade_waiting_on_rebuild_is_stamped_after_it() {
        let ledger: Arc<dyn Ledger> = Arc::new(SqliteLedger::open_in_memory().unwrap());
        let (engine, clock) = engine_at(
            ledger.clone(),
            Arc::new(ChannelBroadcaster::new(16)),
            Local.with_ymd_and_hms(2024, 5, 15, 23, 59, 59).single().unwrap(),
        )
        .await;
        let engine = Arc::new(engine);

        let gate = engine.rebuild_gate.write().await;
        let pending = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.ingest(input("bsc", 4.0, &[])).await })
        };
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(ledger.recent_trades(10).await.unwrap().is_empty());

        let after = Local.with_ymd_and_hms(2024, 5, 16, 0, 0, 5).single().unwrap();
        *clock.lock() = after;
        drop(gate);

        let record = pending.await.unwrap().unwrap();
        assert_eq!(record.created_at, after.timestamp());

        engine.run_rollover().await.unwrap();
        assert_eq!(engine.snapshot("bsc").unwrap().today.tx_count, 1);
        let closed = ledger
            .snapshots_between("bsc", DayRange::day(at(2024, 5, 15, 0).date_naive()))
            .await
            .unwrap();
        assert_eq!(closed[0].tx_count, 0);
    }

    #[tokio::test]
    async fn test_persist_waits_for_rebuild_gate() {
        let ledger: Arc<dyn Ledger> = Arc::new(SqliteLedger::open_in_memory().unwrap());
        let (engine, clock) = engine_at(
            ledger.clone(),
            Arc::new(ChannelBroadcaster::new(16)),
            Local.with_ymd_and_hms(2024, 5, 15, 23, 59, 59).single().unwrap(),
        )
        .await;
        let engine = Arc::new(engine);
        engine.ingest(input("bsc", 1.0, &[])).await.unwrap();
        let wednesday = at(2024, 5, 15, 0).date_naive();

        // A rollover in progress has just finalized Wednesday with more trades
        let gate = engine.rebuild_gate.write().await;
        let tick = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.persist_snapshots().await })
        };
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        let finalized = ProfitSnapshotRow {
            chain: "bsc".to_string(),
            day: wednesday,
            gross: 6.0,
            income: 3.0,
            tx_count: 3,
        };
        ledger.upsert_snapshot(&finalized).await.unwrap();
        *clock.lock() = Local.with_ymd_and_hms(2024, 5, 16, 0, 0, 1).single().unwrap();
        drop(gate);

        assert_eq!(tick.await.unwrap().unwrap(), 0);
        let rows = ledger.snapshots_between("bsc", DayRange::day(wednesday)).await.unwrap();
        assert_eq!(rows, vec![finalized]);
    }

    #[tokio::test]
    async fn test_short_append_is_an_error() {
        let ledger = Arc::new(FailingLedger {
            inner: SqliteLedger::open_in_memory().unwrap(),
            fault: AppendFault::Empty,
        });
        let (engine, _) = engine_at(ledger, Arc::new(ChannelBroadcaster::new(16)), at(2024, 5, 15, 12)).await;

        let err = engine.ingest(input("bsc", 1.0, &[])).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Ledger(LedgerError::ShortAppend { expected: 1, returned: 0 })
        ));
        assert_eq!(engine.snapshot("bsc").unwrap().today, ProfitInfo::default());
    }
}
