//! Rebuilds window statistics from the ledger
//!
//! Closed windows (yesterday, last week, last month) come from daily snapshot
//! rows. Open windows normally do too, except when the persisted `today` and
//! `thisWeek` transaction counts are equal: that means no fresh snapshot row
//! has been written for today yet, so today/yesterday/this week/this month are
//! recomputed from raw trades instead.

use super::db::Ledger;
use super::error::{EngineError, LedgerError};
use super::state::ProfitBook;
use super::tags::TagProfitIndex;
use super::types::{ProfitInfo, ProfitWindowStats};
use super::windows::{DayRange, WindowRanges};
use chrono::NaiveDate;
use std::sync::Arc;

/// Where a chain's open windows were taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsSource {
    Snapshots,
    RawTrades,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainReconciliation {
    pub stats: ProfitWindowStats,
    pub source: StatsSource,
}

pub struct StatsReconciler {
    ledger: Arc<dyn Ledger>,
}

impl StatsReconciler {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Rebuild the six windows for one chain as of local date `today`
    pub async fn reconcile_chain(
        &self,
        chain: &str,
        today: NaiveDate,
    ) -> Result<ChainReconciliation, LedgerError> {
        let ranges = WindowRanges::for_day(today);

        let mut stats = ProfitWindowStats {
            today: self.snapshot_total(chain, ranges.today).await?,
            yesterday: self.snapshot_total(chain, ranges.yesterday).await?,
            this_week: self.snapshot_total(chain, ranges.this_week).await?,
            last_week: self.snapshot_total(chain, ranges.last_week).await?,
            this_month: self.snapshot_total(chain, ranges.this_month).await?,
            last_month: self.snapshot_total(chain, ranges.last_month).await?,
        };

        if stats.today.tx_count != stats.this_week.tx_count {
            return Ok(ChainReconciliation {
                stats,
                source: StatsSource::Snapshots,
            });
        }

        stats.today = self.trade_total(chain, ranges.today).await?;
        stats.yesterday = self.trade_total(chain, ranges.yesterday).await?;
        stats.this_week = self.trade_total(chain, ranges.this_week).await?;
        stats.this_month = self.trade_total(chain, ranges.this_month).await?;

        Ok(ChainReconciliation {
            stats,
            source: StatsSource::RawTrades,
        })
    }

    /// Clear `index` and refill it from `today`'s trades for `chains`
    pub async fn rebuild_tags(
        &self,
        chains: &[String],
        today: NaiveDate,
        index: &mut TagProfitIndex,
    ) -> Result<(), EngineError> {
        index.clear();
        let range = DayRange::day(today).to_time_range();
        for chain in chains {
            let trades = self
                .ledger
                .trades_between(chain, range)
                .await
                .map_err(|source| EngineError::Reconcile {
                    chain: chain.clone(),
                    source,
                })?;
            for trade in &trades {
                index.record_trade(trade);
            }
        }
        Ok(())
    }

    /// Build a complete replacement book for `today`
    ///
    /// Nothing is installed here; the caller swaps the result in once it is
    /// complete, so a failure leaves the live state as it was.
    pub async fn rebuild(
        &self,
        chains: &[String],
        today: NaiveDate,
    ) -> Result<ProfitBook, EngineError> {
        let mut book = ProfitBook::new(chains, today);

        for chain in chains {
            let outcome = self
                .reconcile_chain(chain, today)
                .await
                .map_err(|source| EngineError::Reconcile {
                    chain: chain.clone(),
                    source,
                })?;
            log::info!(
                "🔄 Reconciled {} from {:?}: today income={:.4} tx={} | week tx={} | month tx={}",
                chain,
                outcome.source,
                outcome.stats.today.income,
                outcome.stats.today.tx_count,
                outcome.stats.this_week.tx_count,
                outcome.stats.this_month.tx_count,
            );
            book.cache.install(chain, outcome.stats);
        }

        self.rebuild_tags(chains, today, &mut book.tags).await?;
        log::info!("🏷️  Tag index rebuilt: {} entries", book.tags.totals().len());

        Ok(book)
    }

    /// Replace each chain's `today` with the raw-trade total for `book.day()`
    ///
    /// The difference is folded into `this_week` and `this_month`, which always
    /// contain today. Used right after midnight, when trades already stamped
    /// with the new day have no snapshot row yet.
    pub async fn settle_today(&self, book: &mut ProfitBook) -> Result<(), EngineError> {
        let range = DayRange::day(book.day());
        let chains = book.cache.chains().to_vec();
        for chain in &chains {
            let Some(mut stats) = book.snapshot(chain) else {
                continue;
            };
            let raw = self
                .trade_total(chain, range)
                .await
                .map_err(|source| EngineError::Reconcile {
                    chain: chain.clone(),
                    source,
                })?;
            if raw == stats.today {
                continue;
            }

            log::info!(
                "🔄 Settled {} today from raw trades: tx {} -> {}",
                chain,
                stats.today.tx_count,
                raw.tx_count,
            );
            stats.this_week = stats.this_week.replace_part(stats.today, raw);
            stats.this_month = stats.this_month.replace_part(stats.today, raw);
            stats.today = raw;
            book.cache.install(chain, stats);
        }
        Ok(())
    }

    async fn snapshot_total(&self, chain: &str, range: DayRange) -> Result<ProfitInfo, LedgerError> {
        let rows = self.ledger.snapshots_between(chain, range).await?;
        Ok(ProfitInfo::from_snapshots(&rows))
    }

    async fn trade_total(&self, chain: &str, range: DayRange) -> Result<ProfitInfo, LedgerError> {
        let trades = self.ledger.trades_between(chain, range.to_time_range()).await?;
        Ok(ProfitInfo::from_trades(&trades))
    }
}
