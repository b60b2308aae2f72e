//! SQLite-backed sample storage
//!
//! - WAL mode so reads proceed during writes
//! - One narrow table, indexed by (series_id, ts)
//! - Append-only: rows are never updated, only pruned past retention

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, types::Value, Connection, OpenFlags};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, info, warn};

use super::{EpochCutoffs, SampleStore, DAY_MS};
use crate::models::SeriesPoint;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS samples (
    series_id TEXT NOT NULL,
    ts INTEGER NOT NULL,
    value INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_samples_series_ts
    ON samples(series_id, ts);
"#;

/// Minimum spacing between opportunistic retention sweeps.
const PRUNE_INTERVAL_MS: i64 = 3_600_000;

pub struct DbSampleStore {
    conn: Mutex<Connection>,
    cutoffs: EpochCutoffs,
    retention_days: Option<u32>,
    last_prune_ms: AtomicI64,
}

impl DbSampleStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // we handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open sample database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize sample schema")?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))
            .unwrap_or(0);
        info!(path = db_path, samples = count, "sample store ready");

        Ok(Self {
            conn: Mutex::new(conn),
            cutoffs: EpochCutoffs::default(),
            retention_days: None,
            last_prune_ms: AtomicI64::new(0),
        })
    }

    pub fn with_epoch_cutoffs(mut self, cutoffs: EpochCutoffs) -> Self {
        self.cutoffs = cutoffs;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = Some(days);
        self
    }

    /// Deletes rows older than `cutoff_ms`. Returns the number removed.
    pub fn prune_before(&self, cutoff_ms: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn
            .execute("DELETE FROM samples WHERE ts < ?1", params![cutoff_ms])
            .context("Failed to prune samples")?;
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM samples", [], |row| row.get::<_, i64>(0))
            .map(|c| c as usize)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&self, series_id: &str, ts: Value, value: Value) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO samples (series_id, ts, value) VALUES (?1, ?2, ?3)",
            params![series_id, ts, value],
        )?;
        Ok(())
    }

    fn maybe_prune(&self) {
        let Some(days) = self.retention_days else {
            return;
        };
        let now = Utc::now().timestamp_millis();
        let last = self.last_prune_ms.load(Ordering::Relaxed);
        if now - last < PRUNE_INTERVAL_MS {
            return;
        }
        if self
            .last_prune_ms
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        match self.prune_before(now - i64::from(days) * DAY_MS) {
            Ok(0) => {}
            Ok(removed) => info!(removed, retention_days = days, "pruned old samples"),
            Err(e) => warn!(error = %e, "sample pruning failed"),
        }
    }
}

/// Decodes one stored row, rejecting anything that is not a non-negative integer pair.
fn decode_point(ts: Value, value: Value) -> Option<SeriesPoint> {
    let ts = match ts {
        Value::Integer(t) => t,
        _ => return None,
    };
    let value = match value {
        Value::Integer(v) if v >= 0 => v as u64,
        Value::Real(v) if v.is_finite() && v >= 0.0 && v.fract() == 0.0 => v as u64,
        _ => return None,
    };
    Some(SeriesPoint { ts, value })
}

impl SampleStore for DbSampleStore {
    fn append(&self, series_id: &str, ts_ms: i64, value: u64) -> Result<()> {
        let value = i64::try_from(value).context("sample value out of range")?;
        {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO samples (series_id, ts, value) VALUES (?1, ?2, ?3)",
                params![series_id, ts_ms, value],
            )
            .with_context(|| format!("Failed to append sample for {}", series_id))?;
        }
        self.maybe_prune();
        Ok(())
    }

    fn read_range(&self, series_id: &str, from_ms: i64, to_ms: i64) -> Result<Vec<SeriesPoint>> {
        let from_ms = self.cutoffs.clamp_from(series_id, from_ms);
        if from_ms > to_ms {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT ts, value FROM samples
             WHERE series_id = ?1 AND ts >= ?2 AND ts <= ?3
             ORDER BY ts ASC",
        )?;
        let rows = stmt.query_map(params![series_id, from_ms, to_ms], |row| {
            Ok((row.get::<_, Value>(0)?, row.get::<_, Value>(1)?))
        })?;

        let mut points = Vec::new();
        let mut skipped = 0usize;
        for row in rows {
            match row.ok().and_then(|(ts, value)| decode_point(ts, value)) {
                Some(p) if p.ts >= from_ms && p.ts <= to_ms => points.push(p),
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!(series = series_id, skipped, "skipped malformed sample rows");
        }

        points.sort_by_key(|p| p.ts);
        Ok(points)
    }

    fn latest(&self, series_id: &str) -> Result<Option<SeriesPoint>> {
        let from_ms = self.cutoffs.clamp_from(series_id, i64::MIN);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT ts, value FROM samples
             WHERE series_id = ?1 AND ts >= ?2
             ORDER BY ts DESC",
        )?;
        let mut rows = stmt.query(params![series_id, from_ms])?;
        while let Some(row) = rows.next()? {
            let decoded = match (row.get::<_, Value>(0), row.get::<_, Value>(1)) {
                (Ok(ts), Ok(value)) => decode_point(ts, value),
                _ => None,
            };
            if let Some(p) = decoded.filter(|p| p.ts >= from_ms) {
                return Ok(Some(p));
            }
        }
        Ok(None)
    }

    fn series_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT DISTINCT series_id FROM samples ORDER BY series_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }
}
