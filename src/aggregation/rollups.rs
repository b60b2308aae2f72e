//! Pure cross-series rollups over per-series daily averages and raw samples.

use chrono::{Datelike, FixedOffset, NaiveDate};
use std::collections::{BTreeMap, HashMap};

use crate::{
    models::{AllTimeHigh, DailyAverage, DailyTotal, MinuteBucket, SeedDay, SeriesPoint, WeeklyTotal},
    store::local_date,
};

pub const BUCKET_MS: i64 = 60_000;

/// Per date, sums the averages of every series with data on that date.
/// Series with no row for a date are omitted, never counted as zero.
pub fn daily_totals<'a, I>(per_series: I) -> Vec<DailyTotal>
where
    I: IntoIterator<Item = &'a [DailyAverage]>,
{
    let mut by_date: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for rows in per_series {
        for row in rows {
            let slot = by_date.entry(row.date).or_insert((0.0, 0));
            slot.0 += row.avg;
            slot.1 += 1;
        }
    }
    by_date
        .into_iter()
        .map(|(date, (avg_players, games))| DailyTotal {
            date,
            avg_players,
            games,
        })
        .collect()
}

/// Drops `today` (and anything after it) so only completed days remain.
pub fn completed_days(totals: Vec<DailyTotal>, today: NaiveDate) -> Vec<DailyTotal> {
    totals.into_iter().filter(|t| t.date < today).collect()
}

/// `YYYY-Www` label of the ISO week containing `date`.
pub fn iso_week_label(date: NaiveDate) -> String {
    let week = date.iso_week();
    format!("{:04}-W{:02}", week.year(), week.week())
}

/// Groups daily totals by ISO week, averaging `avg_players` over contributing days.
pub fn weekly_totals(totals: &[DailyTotal]) -> Vec<WeeklyTotal> {
    let mut by_week: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for t in totals {
        let slot = by_week.entry(iso_week_label(t.date)).or_insert((0.0, 0));
        slot.0 += t.avg_players;
        slot.1 += 1;
    }
    by_week
        .into_iter()
        .map(|(week, (sum, days))| WeeklyTotal {
            week,
            avg_players: sum / days as f64,
            days,
        })
        .collect()
}

/// Maximum over the static seed and the dynamic daily totals.
/// Ties keep the earliest date.
pub fn all_time_high(totals: &[DailyTotal], seed: &[SeedDay]) -> Option<AllTimeHigh> {
    let candidates = seed
        .iter()
        .map(|s| (s.players, s.date))
        .chain(totals.iter().map(|t| (t.avg_players, t.date)))
        .filter(|(v, _)| v.is_finite());

    let mut best: Option<AllTimeHigh> = None;
    for (value, date) in candidates {
        let better = match &best {
            None => true,
            Some(b) => value > b.value || (value == b.value && date < b.date),
        };
        if better {
            best = Some(AllTimeHigh { value, date });
        }
    }
    best
}

/// Buckets raw samples of local date `day` into 60s buckets.
///
/// Within a bucket each series contributes its max sample (overlapping
/// collection runs), then contributions are summed across series.
pub fn minute_buckets<'a, I>(per_series: I, tz: FixedOffset, day: NaiveDate) -> Vec<MinuteBucket>
where
    I: IntoIterator<Item = (&'a str, &'a [SeriesPoint])>,
{
    let mut buckets: BTreeMap<i64, HashMap<&'a str, u64>> = BTreeMap::new();
    for (series_id, points) in per_series {
        for p in points {
            if local_date(p.ts, tz) != Some(day) {
                continue;
            }
            let at = p.ts.div_euclid(BUCKET_MS) * BUCKET_MS;
            let max = buckets.entry(at).or_default().entry(series_id).or_insert(0);
            *max = (*max).max(p.value);
        }
    }
    buckets
        .into_iter()
        .map(|(at, per_series)| MinuteBucket {
            at,
            value: per_series.values().sum(),
            games: per_series.len(),
        })
        .collect()
}

/// Bucket with the largest summed value; earliest wins ties.
pub fn peak_bucket(buckets: &[MinuteBucket]) -> Option<&MinuteBucket> {
    buckets
        .iter()
        .fold(None, |best: Option<&MinuteBucket>, b| match best {
            Some(cur) if cur.value >= b.value => Some(cur),
            _ => Some(b),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn avg(date: NaiveDate, avg: f64) -> DailyAverage {
        DailyAverage { date, avg, count: 1 }
    }

    fn ms(h: u32, min: u32, s: u32) -> i64 {
        Utc.with_ymd_and_hms(2024, 5, 1, h, min, s)
            .single()
            .unwrap()
            .timestamp_millis()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn cross_game_total_sums_series_for_a_date() {
        let a = vec![avg(d(2024, 5, 1), 100.0)];
        let b = vec![avg(d(2024, 5, 1), 250.0), avg(d(2024, 5, 2), 10.0)];
        let totals = daily_totals([a.as_slice(), b.as_slice()]);

        assert_eq!(totals.len(), 2);
        assert_eq!(
            totals[0],
            DailyTotal {
                date: d(2024, 5, 1),
                avg_players: 350.0,
                games: 2
            }
        );
        // B alone on May 2nd; A is omitted, not counted as zero
        assert_eq!(totals[1].games, 1);
        assert_eq!(totals[1].avg_players, 10.0);
    }

    #[test]
    fn completed_days_drops_today() {
        let totals = daily_totals([vec![
            avg(d(2024, 5, 1), 1.0),
            avg(d(2024, 5, 2), 2.0),
        ]
        .as_slice()]);
        let done = completed_days(totals, d(2024, 5, 2));
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].date, d(2024, 5, 1));
    }

    #[test]
    fn weekly_totals_use_iso_weeks() {
        // 2024-12-30 is in ISO week 2025-W01
        assert_eq!(iso_week_label(d(2024, 12, 30)), "2025-W01");
        assert_eq!(iso_week_label(d(2024, 5, 1)), "2024-W18");

        let totals = vec![
            DailyTotal { date: d(2024, 4, 29), avg_players: 100.0, games: 2 },
            DailyTotal { date: d(2024, 5, 1), avg_players: 200.0, games: 2 },
            DailyTotal { date: d(2024, 5, 6), avg_players: 50.0, games: 1 },
        ];
        let weeks = weekly_totals(&totals);
        assert_eq!(weeks.len(), 2);
        assert_eq!(weeks[0].week, "2024-W18");
        assert_eq!(weeks[0].avg_players, 150.0);
        assert_eq!(weeks[0].days, 2);
        assert_eq!(weeks[1].week, "2024-W19");
    }

    #[test]
    fn all_time_high_covers_seed_and_totals() {
        let seed = vec![
            SeedDay { date: d(2023, 1, 1), players: 500.0 },
            SeedDay { date: d(2023, 6, 1), players: 90_000.0 },
        ];
        let totals = vec![
            DailyTotal { date: d(2024, 5, 1), avg_players: 80_000.0, games: 16 },
            DailyTotal { date: d(2024, 5, 2), avg_players: 95_000.5, games: 16 },
        ];

        let ath = all_time_high(&totals, &seed).unwrap();
        assert_eq!(ath.date, d(2024, 5, 2));
        for v in seed.iter().map(|s| s.players).chain(totals.iter().map(|t| t.avg_players)) {
            assert!(ath.value >= v);
        }

        let seed_only = all_time_high(&[], &seed).unwrap();
        assert_eq!(seed_only.value, 90_000.0);
        assert!(all_time_high(&[], &[]).is_none());
    }

    #[test]
    fn buckets_take_max_per_series_then_sum() {
        let a = vec![
            SeriesPoint { ts: ms(10, 0, 5), value: 100 },
            // overlapping run for the same series and minute
            SeriesPoint { ts: ms(10, 0, 40), value: 120 },
            SeriesPoint { ts: ms(10, 1, 0), value: 90 },
        ];
        let b = vec![
            SeriesPoint { ts: ms(10, 0, 30), value: 300 },
            // previous day, excluded
            SeriesPoint { ts: ms(0, 0, 0) - 1_000, value: 9_999 },
        ];

        let buckets = minute_buckets(
            [("a", a.as_slice()), ("b", b.as_slice())],
            utc(),
            d(2024, 5, 1),
        );
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].at, ms(10, 0, 0));
        assert_eq!(buckets[0].value, 420);
        assert_eq!(buckets[0].games, 2);
        assert_eq!(buckets[1].value, 90);

        let peak = peak_bucket(&buckets).unwrap();
        assert_eq!(peak.value, 420);
        assert!(buckets.iter().all(|b| peak.value >= b.value));
        assert!(peak_bucket(&[]).is_none());
    }
}
