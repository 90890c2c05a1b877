//! Durable ledger for trades and daily profit snapshots
//!
//! Tables (see `/sql/`):
//! - `trade_info` - INSERT only (append-only trade records)
//! - `profit_snapshots` - UPSERT on (chain, day)
//!
//! The engine only relies on chain equality and half-open time/day range
//! predicates, so any store implementing [`Ledger`] with those semantics works.

use super::error::LedgerError;
use super::types::{ProfitSnapshotRow, TradeInput, TradeRecord};
use super::windows::{DayRange, TimeRange};
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, Row};
use std::path::Path;
use std::sync::Arc;

/// Schema files, applied in order. Each uses `IF NOT EXISTS` so re-running is harmless.
const MIGRATIONS: &[(&str, &str)] = &[
    ("01_trade_info.sql", include_str!("../../sql/01_trade_info.sql")),
    ("02_profit_snapshots.sql", include_str!("../../sql/02_profit_snapshots.sql")),
];

/// Storage contract used by the engine, the reconciler and the scheduler
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Append trades stamped with `created_at`, all or nothing
    async fn append_trades(
        &self,
        trades: &[TradeInput],
        created_at: i64,
    ) -> Result<Vec<TradeRecord>, LedgerError>;

    /// Trades for `chain` with `created_at` in `range`, oldest first
    async fn trades_between(
        &self,
        chain: &str,
        range: TimeRange,
    ) -> Result<Vec<TradeRecord>, LedgerError>;

    /// Insert or overwrite the row for `(row.chain, row.day)`
    async fn upsert_snapshot(&self, row: &ProfitSnapshotRow) -> Result<(), LedgerError>;

    /// Snapshot rows for `chain` with `day` in `range`
    async fn snapshots_between(
        &self,
        chain: &str,
        range: DayRange,
    ) -> Result<Vec<ProfitSnapshotRow>, LedgerError>;

    /// Delete trades created before `cutoff`; returns rows removed
    async fn delete_trades_before(&self, cutoff: i64) -> Result<usize, LedgerError>;

    /// Delete snapshot rows for days before `cutoff`; returns rows removed
    async fn delete_snapshots_before(&self, cutoff: NaiveDate) -> Result<usize, LedgerError>;

    /// Newest trades across all chains
    async fn recent_trades(&self, limit: usize) -> Result<Vec<TradeRecord>, LedgerError>;

    /// Filtered trade search
    async fn search_trades(&self, query: &TradeQuery) -> Result<Vec<TradeRecord>, LedgerError>;

    async fn append_trade(
        &self,
        trade: &TradeInput,
        created_at: i64,
    ) -> Result<TradeRecord, LedgerError> {
        let mut records = self
            .append_trades(std::slice::from_ref(trade), created_at)
            .await?;
        records.pop().ok_or(LedgerError::ShortAppend {
            expected: 1,
            returned: 0,
        })
    }
}

/// Columns a search may be ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    Income,
    Gross,
    Bribe,
    Ratio,
    #[default]
    CreatedAt,
    Id,
    Builder,
    Hash,
}

impl SortField {
    /// Parse a client-supplied field name; unknown names fall back to `created_at`
    pub fn parse(name: &str) -> Self {
        match name {
            "income" => Self::Income,
            "gross" => Self::Gross,
            "bribe" => Self::Bribe,
            "ratio" => Self::Ratio,
            "id" => Self::Id,
            "builder" => Self::Builder,
            "hash" => Self::Hash,
            _ => Self::CreatedAt,
        }
    }

    fn column(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Gross => "gross",
            Self::Bribe => "bribe",
            Self::Ratio => "ratio",
            Self::CreatedAt => "created_at",
            Self::Id => "id",
            Self::Builder => "builder",
            Self::Hash => "hash",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(name: &str) -> Self {
        if name.eq_ignore_ascii_case("asc") {
            Self::Asc
        } else {
            Self::Desc
        }
    }

    fn keyword(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

pub const DEFAULT_SEARCH_LIMIT: usize = 500;
pub const MAX_SEARCH_LIMIT: usize = 1000;

/// Trade search filters
///
/// `range` defaults to the current local day when `None`.
#[derive(Debug, Clone, Default)]
pub struct TradeQuery {
    pub chain: Option<String>,
    /// Substring match on hash, builder or extra info
    pub keyword: Option<String>,
    /// Exact tag membership
    pub tag: Option<String>,
    pub sort: SortField,
    pub order: SortOrder,
    pub limit: Option<usize>,
    pub range: Option<TimeRange>,
}

impl TradeQuery {
    /// Limit clamped to `1..=MAX_SEARCH_LIMIT`; out-of-range values use the default
    pub fn effective_limit(&self) -> usize {
        match self.limit {
            Some(limit) if limit > 0 && limit <= MAX_SEARCH_LIMIT => limit,
            _ => DEFAULT_SEARCH_LIMIT,
        }
    }

    fn effective_range(&self) -> TimeRange {
        self.range
            .unwrap_or_else(|| DayRange::day(Local::now().date_naive()).to_time_range())
    }
}

/// Run schema migrations
///
/// Idempotent: every statement uses `IF NOT EXISTS`.
pub fn run_schema_migrations(conn: &Connection) -> Result<(), LedgerError> {
    log::info!("🔧 Running schema migrations");
    for (name, sql) in MIGRATIONS {
        log::debug!("   ├─ Executing: {}", name);
        conn.execute_batch(sql)?;
    }
    log::info!("✅ Schema migrations completed ({} files)", MIGRATIONS.len());
    Ok(())
}

/// SQLite implementation of [`Ledger`]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    /// Open (or create) the database file and apply the schema
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        log::info!("📊 SQLite journal mode: {}", mode);

        Self::with_connection(conn)
    }

    /// Private in-memory database, mainly for tests
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, LedgerError> {
        run_schema_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

const TRADE_COLUMNS: &str = "id, chain, builder, hash, vic_hashes, gross, bribe, income, ratio, \
                             extra_info, tags, created_at";

fn json_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn trade_from_row(row: &Row<'_>) -> rusqlite::Result<TradeRecord> {
    Ok(TradeRecord {
        id: row.get(0)?,
        chain: row.get(1)?,
        builder: row.get(2)?,
        hash: row.get(3)?,
        victim_hashes: json_list(row, 4)?,
        gross: row.get(5)?,
        bribe: row.get(6)?,
        income: row.get(7)?,
        ratio: row.get(8)?,
        extra_info: row.get(9)?,
        tags: json_list(row, 10)?,
        created_at: row.get(11)?,
    })
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<ProfitSnapshotRow> {
    let tx_count: i64 = row.get(4)?;
    Ok(ProfitSnapshotRow {
        chain: row.get(0)?,
        day: row.get(1)?,
        gross: row.get(2)?,
        income: row.get(3)?,
        tx_count: tx_count.max(0) as u64,
    })
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn append_trades(
        &self,
        trades: &[TradeInput],
        created_at: i64,
    ) -> Result<Vec<TradeRecord>, LedgerError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut records = Vec::with_capacity(trades.len());
        {
            let mut stmt = tx.prepare_cached(
                r#"
                INSERT INTO trade_info (
                    chain, builder, hash, vic_hashes, gross, bribe, income, ratio,
                    extra_info, tags, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )?;
            for trade in trades {
                let vic_hashes = serde_json::to_string(&trade.victim_hashes)?;
                let tags = serde_json::to_string(&trade.tags)?;
                stmt.execute(params![
                    trade.chain,
                    trade.builder,
                    trade.hash,
                    vic_hashes,
                    trade.gross,
                    trade.bribe,
                    trade.income,
                    trade.ratio,
                    trade.extra_info,
                    tags,
                    created_at,
                ])?;
                records.push(TradeRecord::from_input(trade, tx.last_insert_rowid(), created_at));
            }
        }
        tx.commit()?;
        Ok(records)
    }

    async fn trades_between(
        &self,
        chain: &str,
        range: TimeRange,
    ) -> Result<Vec<TradeRecord>, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TRADE_COLUMNS} FROM trade_info \
             WHERE chain = ?1 AND created_at >= ?2 AND created_at < ?3 \
             ORDER BY created_at ASC, id ASC"
        ))?;
        let trades = stmt
            .query_map(params![chain, range.start, range.end], trade_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(trades)
    }

    async fn upsert_snapshot(&self, row: &ProfitSnapshotRow) -> Result<(), LedgerError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO profit_snapshots (chain, day, gross, income, tx_count, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(chain, day) DO UPDATE SET
                gross = excluded.gross,
                income = excluded.income,
                tx_count = excluded.tx_count,
                updated_at = excluded.updated_at
            "#,
            params![
                row.chain,
                row.day,
                row.gross,
                row.income,
                row.tx_count as i64,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    async fn snapshots_between(
        &self,
        chain: &str,
        range: DayRange,
    ) -> Result<Vec<ProfitSnapshotRow>, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT chain, day, gross, income, tx_count FROM profit_snapshots \
             WHERE chain = ?1 AND day >= ?2 AND day < ?3 ORDER BY day ASC",
        )?;
        let rows = stmt
            .query_map(params![chain, range.start, range.end], snapshot_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn delete_trades_before(&self, cutoff: i64) -> Result<usize, LedgerError> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM trade_info WHERE created_at < ?1", params![cutoff])?;
        Ok(deleted)
    }

    async fn delete_snapshots_before(&self, cutoff: NaiveDate) -> Result<usize, LedgerError> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM profit_snapshots WHERE day < ?1", params![cutoff])?;
        Ok(deleted)
    }

    async fn recent_trades(&self, limit: usize) -> Result<Vec<TradeRecord>, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TRADE_COLUMNS} FROM trade_info ORDER BY created_at DESC, id DESC LIMIT ?1"
        ))?;
        let trades = stmt
            .query_map(params![limit as i64], trade_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(trades)
    }

    async fn search_trades(&self, query: &TradeQuery) -> Result<Vec<TradeRecord>, LedgerError> {
        let range = query.effective_range();
        let mut clauses = vec!["created_at >= ?".to_string(), "created_at < ?".to_string()];
        let mut values = vec![Value::Integer(range.start), Value::Integer(range.end)];

        if let Some(chain) = &query.chain {
            clauses.push("chain = ?".to_string());
            values.push(Value::Text(chain.clone()));
        }
        if let Some(keyword) = &query.keyword {
            let pattern = format!("%{}%", keyword);
            clauses.push("(hash LIKE ? OR builder LIKE ? OR extra_info LIKE ?)".to_string());
            for _ in 0..3 {
                values.push(Value::Text(pattern.clone()));
            }
        }
        if let Some(tag) = &query.tag {
            clauses.push("EXISTS (SELECT 1 FROM json_each(trade_info.tags) WHERE value = ?)".to_string());
            values.push(Value::Text(tag.clone()));
        }
        values.push(Value::Integer(query.effective_limit() as i64));

        let sql = format!(
            "SELECT {TRADE_COLUMNS} FROM trade_info WHERE {} ORDER BY {} {}, id {} LIMIT ?",
            clauses.join(" AND "),
            query.sort.column(),
            query.order.keyword(),
            query.order.keyword(),
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let trades = stmt
            .query_map(params_from_iter(values), trade_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(trades)
    }
}
