//! Tiered acquisition for one `(slug, variant)`.
//!
//! Tiers run in order until one yields a count. A hit is appended to the sample
//! store; if every tier fails, the latest stored sample is served as stale.

use chrono::{TimeZone, Utc};
use std::{sync::Arc, time::Duration};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::{AcquisitionTier, TierKind};
use crate::{
    error::{AcquireError, TierError, UpstreamFailure},
    games::{GameCatalog, GameEntry},
    models::AcquisitionResponse,
    store::SampleStore,
};

/// `via` of a response served from the sample store.
pub const STALE_VIA: &str = "db-fallback";

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Bypass the lobby dedupe window (and the response cache at the route)
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    pub players: u64,
    pub via: String,
    pub via_detail: Option<String>,
    pub stale: bool,
    /// Time the value was observed; the stored sample's time when stale
    pub observed_at_ms: i64,
}

impl Acquisition {
    pub fn into_response(self, game: &GameEntry) -> AcquisitionResponse {
        AcquisitionResponse {
            ok: true,
            slug: game.upstream_slug.to_string(),
            variant: game.variant_key().map(str::to_string),
            players: self.players,
            fetched_at: Utc
                .timestamp_millis_opt(self.observed_at_ms)
                .single()
                .unwrap_or_else(Utc::now),
            stale: self.stale,
            via: self.via,
            via_detail: self.via_detail,
        }
    }
}

pub struct AcquisitionOrchestrator {
    catalog: Arc<GameCatalog>,
    tiers: Vec<Arc<dyn AcquisitionTier>>,
    store: Arc<dyn SampleStore>,
    route_budget: Duration,
}

impl AcquisitionOrchestrator {
    pub fn new(
        catalog: Arc<GameCatalog>,
        tiers: Vec<Arc<dyn AcquisitionTier>>,
        store: Arc<dyn SampleStore>,
        route_budget: Duration,
    ) -> Self {
        Self {
            catalog,
            tiers,
            store,
            route_budget,
        }
    }

    pub async fn fetch(
        &self,
        slug: &str,
        variant: Option<&str>,
        opts: FetchOptions,
    ) -> Result<Acquisition, AcquireError> {
        let game = self
            .catalog
            .find(slug, variant)
            .ok_or_else(|| AcquireError::UnknownGame {
                slug: slug.to_string(),
                variant: variant.map(str::to_string),
            })?;
        self.fetch_game(game, opts).await
    }

    pub async fn fetch_game(
        &self,
        game: &GameEntry,
        opts: FetchOptions,
    ) -> Result<Acquisition, AcquireError> {
        let series_id = game.series_id();
        let deadline = Instant::now() + self.route_budget;
        let mut failure = UpstreamFailure {
            slug: game.upstream_slug.to_string(),
            variant: game.variant_key().map(str::to_string),
            ..Default::default()
        };

        for tier in &self.tiers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let result = if remaining.is_zero() {
                Err(TierError::Timeout(self.route_budget))
            } else {
                timeout(remaining, tier.fetch(game, opts.force))
                    .await
                    .unwrap_or(Err(TierError::Timeout(remaining)))
            };

            match result {
                Ok(hit) => {
                    let observed_at_ms = hit
                        .observed_at_ms
                        .unwrap_or_else(|| Utc::now().timestamp_millis());
                    if let Err(e) = self.store.append(&series_id, observed_at_ms, hit.players) {
                        warn!(series = %series_id, error = %e, "failed to persist sample");
                    }
                    info!(
                        series = %series_id,
                        players = hit.players,
                        via = %hit.via,
                        "player count acquired"
                    );
                    return Ok(Acquisition {
                        players: hit.players,
                        via: hit.via,
                        via_detail: hit.via_detail,
                        stale: false,
                        observed_at_ms,
                    });
                }
                Err(e) if e.is_not_configured() => {
                    debug!(series = %series_id, tier = tier.label(), "tier not configured, skipping");
                }
                Err(e) => {
                    debug!(series = %series_id, tier = tier.label(), error = %e, "tier failed");
                    failure.via = tier.label().to_string();
                    failure.via_detail = Some(e.to_string());
                    let slot = match tier.kind() {
                        TierKind::Lobby => &mut failure.lobby_error,
                        TierKind::Plain => &mut failure.plain_error,
                        TierKind::Browser => &mut failure.browser_error,
                    };
                    *slot = Some(e.to_string());
                }
            }
        }

        match self.store.latest(&series_id) {
            Ok(Some(point)) => {
                warn!(
                    series = %series_id,
                    players = point.value,
                    sample_ts = point.ts,
                    "all tiers failed, serving stored sample"
                );
                Ok(Acquisition {
                    players: point.value,
                    via: STALE_VIA.to_string(),
                    via_detail: failure.via_detail.clone(),
                    stale: true,
                    observed_at_ms: point.ts,
                })
            }
            Ok(None) => {
                warn!(series = %series_id, "all tiers failed and no stored sample");
                Err(AcquireError::UpstreamUnavailable(Box::new(failure)))
            }
            Err(e) => {
                warn!(series = %series_id, error = %e, "stale lookup failed");
                Err(AcquireError::UpstreamUnavailable(Box::new(failure)))
            }
        }
    }
}
