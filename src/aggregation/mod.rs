//! Cross-game rollups read from the sample store.
//!
//! Everything is computed per request from raw samples; nothing is cached or
//! persisted here. Epoch cutoffs are already applied by the store, and values are
//! rounded only when building response bodies.

pub mod rollups;
pub mod seed;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use tracing::debug;

use crate::{
    games::GameCatalog,
    models::{AllTimeHigh, DailyAverage, DailyTotal, MinuteBucket, SeedDay, SeriesPoint, WeeklyTotal},
    store::{daily_averages, local_date, SampleStore},
};

pub use rollups::{all_time_high, daily_totals, minute_buckets, peak_bucket, weekly_totals};

/// Lookback used for the all-time high when no retention limit is known.
pub const DEFAULT_HISTORY_DAYS: u32 = 400;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResponse {
    pub ok: bool,
    pub days: u32,
    pub totals: Vec<DailyTotal>,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_game: Option<BTreeMap<String, Vec<DailyAverage>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly: Option<Vec<WeeklyTotal>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeakView {
    pub value: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Averages {
    pub days7: Vec<DailyTotal>,
    pub days30: Vec<DailyTotal>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodaySamples {
    pub today_buckets: Vec<MinuteBucket>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewResponse {
    pub ok: bool,
    pub ath: Option<AllTimeHigh>,
    pub today_peak: Option<PeakView>,
    pub averages: Averages,
    pub samples: TodaySamples,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryOptions {
    pub days: u32,
    pub per_game: bool,
    pub weekly: bool,
}

pub struct AggregationService {
    store: Arc<dyn SampleStore>,
    catalog: Arc<GameCatalog>,
    tz: FixedOffset,
    seed: Vec<SeedDay>,
    history_days: u32,
}

impl AggregationService {
    pub fn new(
        store: Arc<dyn SampleStore>,
        catalog: Arc<GameCatalog>,
        tz: FixedOffset,
        seed: Vec<SeedDay>,
    ) -> Self {
        Self {
            store,
            catalog,
            tz,
            seed,
            history_days: DEFAULT_HISTORY_DAYS,
        }
    }

    pub fn with_history_days(mut self, days: u32) -> Self {
        self.history_days = days.max(1);
        self
    }

    pub fn timezone(&self) -> FixedOffset {
        self.tz
    }

    pub fn today(&self, now_ms: i64) -> NaiveDate {
        local_date(now_ms, self.tz).unwrap_or_else(|| Utc::now().with_timezone(&self.tz).date_naive())
    }

    /// Start of local day `date`, in ms epoch.
    fn day_start_ms(&self, date: NaiveDate) -> i64 {
        date.and_hms_opt(0, 0, 0)
            .and_then(|dt| self.tz.from_local_datetime(&dt).single())
            .map(|dt| dt.timestamp_millis())
            .unwrap_or(0)
    }

    /// Local midnight `lookback_days` calendar days before today. Windows start
    /// here so the oldest reported day is never clipped.
    pub fn window_start_ms(&self, lookback_days: u32, now_ms: i64) -> i64 {
        let first_day = self.today(now_ms) - chrono::Duration::days(i64::from(lookback_days));
        self.day_start_ms(first_day)
    }

    fn per_series_daily(
        &self,
        series_ids: &[String],
        lookback_days: u32,
        now_ms: i64,
    ) -> Result<Vec<(String, Vec<DailyAverage>)>> {
        let from = self.window_start_ms(lookback_days, now_ms);
        let mut out = Vec::with_capacity(series_ids.len());
        for series_id in series_ids {
            let points = self.store.read_range(series_id, from, now_ms)?;
            if points.is_empty() {
                continue;
            }
            out.push((series_id.clone(), daily_averages(&points, self.tz)));
        }
        Ok(out)
    }

    /// Cross-series daily totals over whole calendar days, current day included.
    pub fn daily_totals(
        &self,
        series_ids: &[String],
        lookback_days: u32,
        now_ms: i64,
    ) -> Result<Vec<DailyTotal>> {
        let per_series = self.per_series_daily(series_ids, lookback_days, now_ms)?;
        Ok(daily_totals(per_series.iter().map(|(_, rows)| rows.as_slice())))
    }

    /// Raw samples of every catalog series since local midnight of `now_ms`.
    pub fn today_samples(&self, now_ms: i64) -> Result<Vec<(String, Vec<SeriesPoint>)>> {
        let from = self.day_start_ms(self.today(now_ms));
        let mut out = Vec::new();
        for series_id in self.catalog.series_ids() {
            let points = self.store.read_range(&series_id, from, now_ms)?;
            if !points.is_empty() {
                out.push((series_id, points));
            }
        }
        Ok(out)
    }

    pub fn todays_peak(&self, now_ms: i64) -> Result<(Vec<MinuteBucket>, Option<MinuteBucket>)> {
        let samples = self.today_samples(now_ms)?;
        let buckets = minute_buckets(
            samples.iter().map(|(id, pts)| (id.as_str(), pts.as_slice())),
            self.tz,
            self.today(now_ms),
        );
        let peak = peak_bucket(&buckets).cloned();
        Ok((buckets, peak))
    }

    fn last_updated(&self, series_ids: &[String]) -> Result<Option<DateTime<Utc>>> {
        let mut newest: Option<i64> = None;
        for series_id in series_ids {
            if let Some(p) = self.store.latest(series_id)? {
                newest = Some(newest.map_or(p.ts, |n| n.max(p.ts)));
            }
        }
        Ok(newest.and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }

    pub fn summary(&self, opts: SummaryOptions, now_ms: i64) -> Result<SummaryResponse> {
        let days = opts.days.max(1);
        let series_ids = self.catalog.series_ids();
        let today = self.today(now_ms);
        let per_series = self.per_series_daily(&series_ids, days, now_ms)?;

        let totals = rollups::completed_days(
            daily_totals(per_series.iter().map(|(_, rows)| rows.as_slice())),
            today,
        );
        let weekly = opts.weekly.then(|| round_weekly(weekly_totals(&totals)));
        let per_game = opts.per_game.then(|| {
            per_series
                .into_iter()
                .map(|(id, rows)| {
                    let rows = rows
                        .into_iter()
                        .filter(|r| r.date < today)
                        .map(round_average)
                        .collect();
                    (id, rows)
                })
                .collect()
        });
        debug!(days, dates = totals.len(), "lobby summary built");

        Ok(SummaryResponse {
            ok: true,
            days,
            totals: round_totals(totals),
            last_updated: self.last_updated(&series_ids)?,
            per_game,
            weekly,
        })
    }

    pub fn overview(&self, now_ms: i64) -> Result<OverviewResponse> {
        let series_ids = self.catalog.series_ids();
        let today = self.today(now_ms);
        let history = rollups::completed_days(
            self.daily_totals(&series_ids, self.history_days, now_ms)?,
            today,
        );

        let ath = all_time_high(&history, &self.seed).map(|a| AllTimeHigh {
            value: a.value.round(),
            date: a.date,
        });
        let (today_buckets, peak) = self.todays_peak(now_ms)?;
        let today_peak = peak.and_then(|b| {
            Utc.timestamp_millis_opt(b.at)
                .single()
                .map(|at| PeakView { value: b.value, at })
        });

        // Window bounds are calendar days before today
        let window_start = |n: i64| today - chrono::Duration::days(n);
        let within = |n: i64| -> Vec<DailyTotal> {
            history
                .iter()
                .filter(|t| t.date >= window_start(n))
                .cloned()
                .collect()
        };

        Ok(OverviewResponse {
            ok: true,
            ath,
            today_peak,
            averages: Averages {
                days7: round_totals(within(7)),
                days30: round_totals(within(30)),
            },
            samples: TodaySamples { today_buckets },
            generated_at: Utc
                .timestamp_millis_opt(now_ms)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

fn round_totals(totals: Vec<DailyTotal>) -> Vec<DailyTotal> {
    totals
        .into_iter()
        .map(|t| DailyTotal {
            avg_players: t.avg_players.round(),
            ..t
        })
        .collect()
}

fn round_weekly(weeks: Vec<WeeklyTotal>) -> Vec<WeeklyTotal> {
    weeks
        .into_iter()
        .map(|w| WeeklyTotal {
            avg_players: w.avg_players.round(),
            ..w
        })
        .collect()
}

pub fn round_average(row: DailyAverage) -> DailyAverage {
    DailyAverage {
        avg: row.avg.round(),
        ..row
    }
}
