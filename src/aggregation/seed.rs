//! Pre-collection daily lobby totals, merged into the all-time high.

use anyhow::{Context, Result};
use std::fs;
use tracing::{info, warn};

use crate::models::SeedDay;

const BUNDLED_SEED: &str = include_str!("../../data/lobby_seed.json");

pub fn parse_seed(raw: &str) -> Result<Vec<SeedDay>> {
    let mut days: Vec<SeedDay> =
        serde_json::from_str(raw).context("seed must be a JSON array of {date, players}")?;
    days.retain(|d| d.players.is_finite() && d.players >= 0.0);
    days.sort_by_key(|d| d.date);
    Ok(days)
}

/// Loads the seed from `path`, or the bundled copy when no path is set.
/// Unreadable or malformed input logs a warning and yields an empty seed.
pub fn load_seed(path: Option<&str>) -> Vec<SeedDay> {
    let (source, raw) = match path {
        Some(p) => match fs::read_to_string(p) {
            Ok(raw) => (p, raw),
            Err(e) => {
                warn!(path = p, error = %e, "could not read lobby seed, using none");
                return Vec::new();
            }
        },
        None => ("bundled", BUNDLED_SEED.to_string()),
    };

    match parse_seed(&raw) {
        Ok(days) => {
            info!(source, days = days.len(), "lobby seed loaded");
            days
        }
        Err(e) => {
            warn!(source, error = %e, "malformed lobby seed, using none");
            Vec::new()
        }
    }
}
