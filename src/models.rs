use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A point of a series as returned by lookback reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub ts: i64,
    pub value: u64,
}

/// Average of one series over one local calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyAverage {
    pub date: NaiveDate,
    pub avg: f64,
    pub count: usize,
}

/// Sum of per-series daily averages for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTotal {
    pub date: NaiveDate,
    pub avg_players: f64,
    /// Number of series with data on this date
    pub games: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyTotal {
    /// ISO week, `YYYY-Www`
    pub week: String,
    pub avg_players: f64,
    pub days: usize,
}

/// Pre-collection history row from the static seed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedDay {
    pub date: NaiveDate,
    pub players: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllTimeHigh {
    pub value: f64,
    pub date: NaiveDate,
}

/// A 60-second bucket of raw samples summed across series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MinuteBucket {
    /// Bucket start, ms epoch
    pub at: i64,
    pub value: u64,
    pub games: usize,
}

/// Boundary shape of a successful (or stale) acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquisitionResponse {
    pub ok: bool,
    pub slug: String,
    pub variant: Option<String>,
    pub players: u64,
    pub fetched_at: DateTime<Utc>,
    pub stale: bool,
    pub via: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub via_detail: Option<String>,
}
