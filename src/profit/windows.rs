//! Calendar window boundaries and retention cutoffs
//!
//! All windows are computed in local time. Weeks start on Monday. Ranges are
//! half-open (`start` inclusive, `end` exclusive); open windows end at the
//! start of tomorrow so they cover everything recorded so far today.

use chrono::{DateTime, Datelike, Duration, Local, LocalResult, Months, NaiveDate, NaiveTime, TimeZone};

/// Half-open range of calendar days `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DayRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// A single day
    pub fn day(day: NaiveDate) -> Self {
        Self { start: day, end: next_day(day) }
    }

    /// Local-midnight timestamps bounding this range
    pub fn to_time_range(&self) -> TimeRange {
        TimeRange {
            start: local_day_start(self.start),
            end: local_day_start(self.end),
        }
    }
}

/// Half-open range of unix timestamps (seconds) `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// The six windows for a given local date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRanges {
    pub today: DayRange,
    pub yesterday: DayRange,
    pub this_week: DayRange,
    pub last_week: DayRange,
    pub this_month: DayRange,
    pub last_month: DayRange,
}

impl WindowRanges {
    pub fn for_day(today: NaiveDate) -> Self {
        let tomorrow = next_day(today);
        let yesterday = today - Duration::days(1);
        let week_start = today - Duration::days(today.weekday().num_days_from_monday() as i64);
        let last_week_start = week_start - Duration::days(7);
        let month_start = today.with_day(1).unwrap_or(today);
        let last_month_start = month_start
            .checked_sub_months(Months::new(1))
            .unwrap_or(month_start);

        Self {
            today: DayRange::new(today, tomorrow),
            yesterday: DayRange::new(yesterday, today),
            this_week: DayRange::new(week_start, tomorrow),
            last_week: DayRange::new(last_week_start, week_start),
            this_month: DayRange::new(month_start, tomorrow),
            last_month: DayRange::new(last_month_start, month_start),
        }
    }
}

/// How long raw trades and daily snapshot rows are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub trade_days: i64,
    pub snapshot_months: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            trade_days: 14,
            snapshot_months: 2,
        }
    }
}

impl RetentionPolicy {
    /// Trades created strictly before this timestamp are purged
    pub fn trade_cutoff(&self, now: DateTime<Local>) -> i64 {
        (now - Duration::days(self.trade_days)).timestamp()
    }

    /// Snapshot rows for days strictly before this date are purged
    pub fn snapshot_cutoff(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_sub_months(Months::new(self.snapshot_months))
            .unwrap_or(today)
    }
}

fn next_day(day: NaiveDate) -> NaiveDate {
    day.succ_opt().unwrap_or(day)
}

/// Unix timestamp of local midnight starting `day`
///
/// Ambiguous midnights resolve to the earlier instant; a midnight that falls in
/// a DST gap resolves to the first valid local hour.
pub fn local_day_start(day: NaiveDate) -> i64 {
    let midnight = day.and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => dt.timestamp(),
        LocalResult::Ambiguous(earliest, _) => earliest.timestamp(),
        LocalResult::None => Local
            .from_local_datetime(&(midnight + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.timestamp())
            .unwrap_or_else(|| midnight.and_utc().timestamp()),
    }
}

/// Time left until the next local midnight
pub fn until_next_midnight(now: DateTime<Local>) -> std::time::Duration {
    let next = local_day_start(next_day(now.date_naive()));
    let secs = (next - now.timestamp()).max(1);
    std::time::Duration::from_secs(secs as u64)
}
