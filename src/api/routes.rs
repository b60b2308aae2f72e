use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::debug;

use crate::{
    aggregation::{round_average, AggregationService, OverviewResponse, SummaryOptions, SummaryResponse},
    cache::{if_none_match_matches, CacheEntry, CacheKey, ResponseCache},
    error::{AcquireError, ApiError},
    games::{GameCatalog, LobbyField},
    middleware::request_logging_simple,
    models::{DailyAverage, SeriesPoint},
    scrapers::{AcquisitionOrchestrator, FetchOptions},
    store::{daily_averages, SampleStore},
};

/// Longest lookback any route accepts.
pub const MAX_LOOKBACK_DAYS: u32 = 400;

const DEFAULT_HISTORY_DAYS: u32 = 7;
const DEFAULT_SUMMARY_DAYS: u32 = 30;

/// Shared application state, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<GameCatalog>,
    pub orchestrator: Arc<AcquisitionOrchestrator>,
    pub store: Arc<dyn SampleStore>,
    pub cache: Arc<ResponseCache>,
    pub aggregation: Arc<AggregationService>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/games", get(list_games))
        .route("/api/players", get(get_all_players))
        .route("/api/players/:slug", get(get_players))
        .route("/api/series/:series_id/history", get(get_series_history))
        .route("/api/lobby/summary", get(get_lobby_summary))
        .route("/api/lobby/overview", get(get_lobby_overview))
        .layer(middleware::from_fn(request_logging_simple))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ===== Route Handlers =====

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_games(State(state): State<AppState>) -> Json<Vec<GameView>> {
    let games = state
        .catalog
        .entries()
        .iter()
        .map(|g| GameView {
            id: g.id,
            label: g.label,
            slug: g.upstream_slug,
            variant: g.variant_key(),
            series_id: g.series_id(),
            lobby_tier: matches!(
                state.catalog.lobby_field(g.upstream_slug, g.variant_key()),
                LobbyField::Configured(_)
            ),
        })
        .collect();
    Json(games)
}

/// Live count for one game, served from the response cache when fresh.
async fn get_players(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(params): Query<PlayersQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let variant = params
        .variant
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let entry = acquire_cached(&state, &slug, variant, flag(params.force.as_deref())).await?;
    Ok(respond_with_etag(entry, &headers))
}

/// Concurrent fan-out over every tracked game. Per-game failures are inlined.
async fn get_all_players(
    State(state): State<AppState>,
    Query(params): Query<ForceQuery>,
) -> Json<Value> {
    let force = flag(params.force.as_deref());
    let state = &state;
    let results = join_all(state.catalog.entries().iter().map(|game| async move {
        match acquire_cached(state, game.upstream_slug, game.variant_key(), force).await {
            Ok(entry) => serde_json::to_value(&entry.payload).unwrap_or(Value::Null),
            Err(e) => e.body(),
        }
    }))
    .await;

    Json(json!({
        "ok": true,
        "count": results.len(),
        "results": results,
    }))
}

async fn get_series_history(
    State(state): State<AppState>,
    Path(series_id): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    // Retired series stay readable while they have stored samples
    let known = state.catalog.find_series(&series_id).is_some()
        || state.store.series_ids()?.contains(&series_id);
    if !known {
        return Err(ApiError::NotFound(format!("series {series_id} is not tracked")));
    }
    let days = lookback_days(params.days, DEFAULT_HISTORY_DAYS)?;
    let now_ms = Utc::now().timestamp_millis();
    let from = state.aggregation.window_start_ms(days, now_ms);
    let points = state.store.read_range(&series_id, from, now_ms)?;
    let daily = daily_averages(&points, state.aggregation.timezone())
        .into_iter()
        .map(round_average)
        .collect();

    Ok(Json(HistoryResponse {
        ok: true,
        series_id,
        days,
        points,
        daily,
    }))
}

async fn get_lobby_summary(
    State(state): State<AppState>,
    Query(params): Query<SummaryQuery>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let opts = SummaryOptions {
        days: lookback_days(params.days, DEFAULT_SUMMARY_DAYS)?,
        per_game: flag(params.per_game.as_deref()),
        weekly: flag(params.weekly.as_deref()),
    };
    let summary = state
        .aggregation
        .summary(opts, Utc::now().timestamp_millis())?;
    Ok(Json(summary))
}

async fn get_lobby_overview(
    State(state): State<AppState>,
) -> Result<Json<OverviewResponse>, ApiError> {
    let overview = state.aggregation.overview(Utc::now().timestamp_millis())?;
    Ok(Json(overview))
}

// ===== Helpers =====

/// Cache → orchestrator → cache. Concurrent misses for one key share a single
/// acquisition through the per-key lock.
async fn acquire_cached(
    state: &AppState,
    slug: &str,
    variant: Option<&str>,
    force: bool,
) -> Result<CacheEntry, ApiError> {
    let game = state
        .catalog
        .find(slug, variant)
        .ok_or_else(|| AcquireError::UnknownGame {
            slug: slug.to_string(),
            variant: variant.map(str::to_string),
        })?;
    let key = CacheKey::new(slug, variant);

    if !force {
        if let Some(entry) = state.cache.get_fresh(&key, Utc::now().timestamp_millis()) {
            debug!(slug, ?variant, "response cache hit");
            return Ok(entry);
        }
    }

    let requested_at = Utc::now().timestamp_millis();
    let lock = state.cache.key_lock(&key);
    let _guard = lock.lock().await;

    // Another request may have filled the entry while this one waited.
    if let Some(entry) = state.cache.get(&key) {
        let filled_while_waiting = entry.fetched_at_ms > requested_at;
        let fresh = now_within_ttl(&state.cache, &entry);
        if filled_while_waiting || (!force && fresh) {
            return Ok(entry);
        }
    }

    let acquisition = state
        .orchestrator
        .fetch_game(game, FetchOptions { force })
        .await?;
    let payload = acquisition.into_response(game);
    Ok(state.cache.put(key, payload, Utc::now().timestamp_millis()))
}

fn now_within_ttl(cache: &ResponseCache, entry: &CacheEntry) -> bool {
    let age = Utc::now().timestamp_millis().saturating_sub(entry.fetched_at_ms);
    age < cache.ttl().as_millis() as i64
}

fn respond_with_etag(entry: CacheEntry, headers: &HeaderMap) -> Response {
    let etag = HeaderValue::from_str(&entry.etag).ok();
    let not_modified = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| if_none_match_matches(v, &entry.etag));

    let mut response = if not_modified {
        StatusCode::NOT_MODIFIED.into_response()
    } else {
        Json(entry.payload).into_response()
    };
    if let Some(etag) = etag {
        response.headers_mut().insert(header::ETAG, etag);
    }
    response
}

/// Query flags accept `1`, `true` or `yes` (any case); everything else is off.
fn flag(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1") | Some("true") | Some("yes")
    )
}

fn lookback_days(raw: Option<u32>, default: u32) -> Result<u32, ApiError> {
    match raw.unwrap_or(default) {
        0 => Err(ApiError::BadRequest("days must be at least 1".to_string())),
        d if d > MAX_LOOKBACK_DAYS => Err(ApiError::BadRequest(format!(
            "days must be at most {MAX_LOOKBACK_DAYS}"
        ))),
        d => Ok(d),
    }
}

// ===== Request/Response Types =====

#[derive(Deserialize)]
struct PlayersQuery {
    variant: Option<String>,
    force: Option<String>,
}

#[derive(Deserialize)]
struct ForceQuery {
    force: Option<String>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    days: Option<u32>,
}

#[derive(Deserialize)]
struct SummaryQuery {
    days: Option<u32>,
    #[serde(rename = "perGame")]
    per_game: Option<String>,
    weekly: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GameView {
    id: &'static str,
    label: &'static str,
    slug: &'static str,
    variant: Option<&'static str>,
    series_id: String,
    lobby_tier: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    ok: bool,
    series_id: String,
    days: u32,
    points: Vec<SeriesPoint>,
    daily: Vec<DailyAverage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_one_and_true() {
        assert!(flag(Some("1")));
        assert!(flag(Some("TRUE")));
        assert!(flag(Some(" true ")));
        assert!(!flag(Some("0")));
        assert!(!flag(Some("")));
        assert!(!flag(None));
    }

    #[test]
    fn lookback_is_bounded() {
        assert_eq!(lookback_days(None, 7).unwrap(), 7);
        assert_eq!(lookback_days(Some(400), 7).unwrap(), 400);
        assert!(matches!(lookback_days(Some(0), 7), Err(ApiError::BadRequest(_))));
        assert!(matches!(lookback_days(Some(401), 7), Err(ApiError::BadRequest(_))));
    }
}
