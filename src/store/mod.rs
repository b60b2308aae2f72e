//! Append-only per-series time-series persistence.
//!
//! The orchestrator is the only writer. Readers always get points sorted by `ts`
//! with epoch cutoffs already applied.

pub mod db_storage;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, NaiveDate};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use crate::models::{DailyAverage, SeriesPoint};

pub use db_storage::DbSampleStore;

pub const DAY_MS: i64 = 86_400_000;

pub trait SampleStore: Send + Sync {
    /// Adds one point. Never overwrites or deduplicates.
    fn append(&self, series_id: &str, ts_ms: i64, value: u64) -> Result<()>;

    /// Points with `from_ms <= ts <= to_ms`, ascending. Malformed rows are skipped.
    fn read_range(&self, series_id: &str, from_ms: i64, to_ms: i64) -> Result<Vec<SeriesPoint>>;

    fn latest(&self, series_id: &str) -> Result<Option<SeriesPoint>>;

    /// Every series id with at least one stored row.
    fn series_ids(&self) -> Result<Vec<String>>;

    /// Trailing window `[now - lookback_days, now]`, ascending.
    fn read(&self, series_id: &str, lookback_days: u32, now_ms: i64) -> Result<Vec<SeriesPoint>> {
        let from = now_ms.saturating_sub(i64::from(lookback_days) * DAY_MS);
        self.read_range(series_id, from, now_ms)
    }
}

/// Per-series minimum valid timestamp. Older samples belong to a superseded game
/// configuration and are hidden from every reader (they stay in storage).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpochCutoffs {
    cutoffs: HashMap<String, i64>,
}

impl EpochCutoffs {
    pub fn new(cutoffs: impl IntoIterator<Item = (String, i64)>) -> Self {
        Self {
            cutoffs: cutoffs.into_iter().collect(),
        }
    }

    /// Parses `series=ms,series=ms`. Bad pairs are logged and dropped.
    pub fn parse(raw: &str) -> Self {
        let mut cutoffs = HashMap::new();
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let parsed = pair
                .rsplit_once('=')
                .and_then(|(series, ts)| Some((series.trim(), ts.trim().parse::<i64>().ok()?)));
            match parsed {
                Some((series, ts)) if !series.is_empty() => {
                    cutoffs.insert(series.to_string(), ts);
                }
                _ => warn!(pair, "ignoring malformed epoch cutoff"),
            }
        }
        Self { cutoffs }
    }

    pub fn cutoff(&self, series_id: &str) -> Option<i64> {
        self.cutoffs.get(series_id).copied()
    }

    /// Lower bound to use when reading `series_id`.
    pub fn clamp_from(&self, series_id: &str, from_ms: i64) -> i64 {
        match self.cutoff(series_id) {
            Some(cutoff) => from_ms.max(cutoff),
            None => from_ms,
        }
    }
}

/// Local calendar date of an instant in the fixed reporting timezone.
pub fn local_date(ts_ms: i64, tz: FixedOffset) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(ts_ms).map(|dt| dt.with_timezone(&tz).date_naive())
}

/// Groups points by local calendar date and averages `value`.
///
/// One row per date with at least one point, ascending. The still-accumulating
/// current day is included; callers reporting completed days drop it themselves.
pub fn daily_averages(points: &[SeriesPoint], tz: FixedOffset) -> Vec<DailyAverage> {
    let mut by_date: BTreeMap<NaiveDate, (u128, usize)> = BTreeMap::new();
    for p in points {
        let Some(date) = local_date(p.ts, tz) else {
            continue;
        };
        let slot = by_date.entry(date).or_insert((0, 0));
        slot.0 += u128::from(p.value);
        slot.1 += 1;
    }

    by_date
        .into_iter()
        .map(|(date, (sum, count))| DailyAverage {
            date,
            avg: sum as f64 / count as f64,
            count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ts(y: i32, m: u32, d: u32, h: u32, min: u32) -> i64 {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .unwrap()
            .timestamp_millis()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn daily_averages_group_by_local_date() {
        let points = vec![
            SeriesPoint { ts: ts(2024, 5, 1, 10, 0), value: 100 },
            SeriesPoint { ts: ts(2024, 5, 1, 22, 0), value: 300 },
            SeriesPoint { ts: ts(2024, 5, 2, 1, 0), value: 50 },
        ];

        let rows = daily_averages(&points, utc());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(rows[0].avg, 200.0);
        assert_eq!(rows[0].count, 2);
        assert_eq!(rows[1].avg, 50.0);

        // UTC+3: 22:00 on May 1st is already May 2nd locally
        let plus3 = FixedOffset::east_opt(3 * 3600).unwrap();
        let shifted = daily_averages(&points, plus3);
        assert_eq!(shifted[0].avg, 100.0);
        assert_eq!(shifted[1].date, NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());
        assert_eq!(shifted[1].avg, 175.0);
        assert_eq!(shifted[1].count, 2);
    }

    #[test]
    fn daily_averages_is_idempotent() {
        let points: Vec<_> = (0..50)
            .map(|i| SeriesPoint {
                ts: ts(2024, 5, 1, 0, 0) + i * 3_600_000,
                value: (i as u64 * 37) % 1000,
            })
            .collect();
        let a = daily_averages(&points, utc());
        let b = daily_averages(&points, utc());
        assert_eq!(a, b);
        assert!(daily_averages(&[], utc()).is_empty());
    }

    #[test]
    fn epoch_cutoffs_parse_and_clamp() {
        let cutoffs = EpochCutoffs::parse("crazy-time:a=1700000000000, bogus, x=notanumber,");
        assert_eq!(cutoffs.cutoff("crazy-time:a"), Some(1_700_000_000_000));
        assert_eq!(cutoffs.cutoff("x"), None);
        assert_eq!(cutoffs.clamp_from("crazy-time:a", 0), 1_700_000_000_000);
        assert_eq!(cutoffs.clamp_from("crazy-time", 5), 5);
    }
}
