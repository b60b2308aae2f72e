//! Shared lobby API: one upstream payload carrying counts for every tracked game.
//!
//! The client keeps the last snapshot for a short window and serialises upstream
//! calls, so concurrent requests for different slugs share one fetch.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{parse_player_count, AcquisitionTier, TierHit, TierKind};
use crate::{
    error::TierError,
    games::{GameCatalog, GameEntry, LobbyField},
};

const COUNT_KEYS: &[&str] = &["players", "playerCount", "count", "value"];
const NAME_KEYS: &[&str] = &["key", "gameType", "game", "slug", "id"];
const TIMESTAMP_KEYS: &[&str] = &["timestamp", "updatedAt", "ts"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LobbySnapshot {
    pub counts: HashMap<String, u64>,
    /// Upstream observation time (ms epoch) when the payload carries one
    pub observed_at_ms: Option<i64>,
}

struct CachedSnapshot {
    fetched_at: Instant,
    snapshot: Arc<LobbySnapshot>,
}

/// Outcome of the most recent upstream attempt, successful or not.
struct LastAttempt {
    finished_at: Instant,
    result: Result<Arc<LobbySnapshot>, TierError>,
}

pub struct LobbyApiClient {
    http: Client,
    url: String,
    timeout: Duration,
    dedupe_window: Duration,
    cached: Mutex<Option<CachedSnapshot>>,
    last_attempt: Mutex<Option<LastAttempt>>,
    fetch_lock: tokio::sync::Mutex<()>,
    upstream_calls: AtomicU64,
}

impl LobbyApiClient {
    pub fn new(http: Client, url: impl Into<String>, timeout: Duration, dedupe_window: Duration) -> Self {
        Self {
            http,
            url: url.into(),
            timeout,
            dedupe_window,
            cached: Mutex::new(None),
            last_attempt: Mutex::new(None),
            fetch_lock: tokio::sync::Mutex::new(()),
            upstream_calls: AtomicU64::new(0),
        }
    }

    /// Number of upstream requests actually sent.
    pub fn upstream_calls(&self) -> u64 {
        self.upstream_calls.load(Ordering::Relaxed)
    }

    /// Upper bound on one `snapshot` call, lock wait included.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Result of an attempt that finished after `since`, failures included.
    fn attempt_since(&self, since: Instant) -> Option<Result<Arc<LobbySnapshot>, TierError>> {
        self.last_attempt
            .lock()
            .as_ref()
            .filter(|a| a.finished_at >= since)
            .map(|a| a.result.clone())
    }

    fn cached_fresh(&self) -> Option<Arc<LobbySnapshot>> {
        let now = Instant::now();
        self.cached
            .lock()
            .as_ref()
            .filter(|c| now.duration_since(c.fetched_at) < self.dedupe_window)
            .map(|c| c.snapshot.clone())
    }

    /// Current lobby snapshot. `force` skips the dedupe window but still joins an
    /// attempt that completed while this caller was waiting. Callers queued behind
    /// a failed attempt get its error instead of retrying upstream one by one.
    pub async fn snapshot(&self, force: bool) -> Result<Arc<LobbySnapshot>, TierError> {
        if !force {
            if let Some(s) = self.cached_fresh() {
                return Ok(s);
            }
        }

        let requested_at = Instant::now();
        let _guard = self.fetch_lock.lock().await;

        if let Some(result) = self.attempt_since(requested_at) {
            return result;
        }
        if !force {
            if let Some(s) = self.cached_fresh() {
                return Ok(s);
            }
        }

        let result = self.fetch_upstream().await;
        let finished_at = Instant::now();
        if let Ok(snapshot) = &result {
            *self.cached.lock() = Some(CachedSnapshot {
                fetched_at: finished_at,
                snapshot: snapshot.clone(),
            });
        }
        *self.last_attempt.lock() = Some(LastAttempt {
            finished_at,
            result: result.clone(),
        });
        result
    }

    async fn fetch_upstream(&self) -> Result<Arc<LobbySnapshot>, TierError> {
        self.upstream_calls.fetch_add(1, Ordering::Relaxed);
        let response = self
            .http
            .get(&self.url)
            .timeout(self.timeout)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            warn!(%status, "lobby api request failed");
            return Err(TierError::Http(format!("lobby api returned {status}")));
        }
        let body = response.text().await?;
        let snapshot = Arc::new(parse_lobby_payload(&body).map_err(|e| {
            warn!(
                error = %e,
                body_preview = %body.chars().take(300).collect::<String>(),
                "lobby payload rejected"
            );
            e
        })?);
        debug!(games = snapshot.counts.len(), "lobby snapshot refreshed");
        Ok(snapshot)
    }
}

fn count_from_value(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f.round() as u64)
        }),
        Value::String(s) => parse_player_count(s),
        Value::Object(obj) => COUNT_KEYS
            .iter()
            .find_map(|k| obj.get(*k))
            .and_then(count_from_value),
        _ => None,
    }
}

fn timestamp_from_value(v: &Value) -> Option<i64> {
    let raw = match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok().or_else(|| {
            chrono::DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|d| d.timestamp_millis())
        }),
        _ => None,
    }?;
    // Seconds vs milliseconds
    Some(if raw < 100_000_000_000 { raw * 1000 } else { raw })
}

/// Accepts `{field: count}` maps (optionally under `data`) or arrays of
/// `{key, players}` objects. Counts may be numbers, numeric strings or objects.
pub fn parse_lobby_payload(body: &str) -> Result<LobbySnapshot, TierError> {
    let root: Value = serde_json::from_str(body)
        .map_err(|e| TierError::MalformedUpstream(format!("lobby json: {e}")))?;

    let observed_at_ms = root
        .as_object()
        .and_then(|obj| TIMESTAMP_KEYS.iter().find_map(|k| obj.get(*k)))
        .and_then(timestamp_from_value);

    let games = match root.get("data") {
        Some(data @ (Value::Object(_) | Value::Array(_))) => data,
        _ => &root,
    };

    let mut counts = HashMap::new();
    match games {
        Value::Object(obj) => {
            for (field, v) in obj {
                if let Some(n) = count_from_value(v) {
                    counts.insert(field.clone(), n);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                let Some(obj) = item.as_object() else {
                    continue;
                };
                let name = NAME_KEYS
                    .iter()
                    .find_map(|k| obj.get(*k).and_then(Value::as_str));
                if let (Some(name), Some(n)) = (name, count_from_value(item)) {
                    counts.insert(name.to_string(), n);
                }
            }
        }
        _ => {}
    }

    if counts.is_empty() {
        return Err(TierError::MalformedUpstream(
            "lobby payload has no player counts".to_string(),
        ));
    }

    Ok(LobbySnapshot {
        counts,
        observed_at_ms,
    })
}

/// Tier 1: looks the game up in the shared lobby snapshot.
pub struct LobbyTier {
    client: Option<Arc<LobbyApiClient>>,
    catalog: Arc<GameCatalog>,
}

impl LobbyTier {
    /// `client` is `None` when no lobby endpoint is configured.
    pub fn new(client: Option<Arc<LobbyApiClient>>, catalog: Arc<GameCatalog>) -> Self {
        Self { client, catalog }
    }
}

#[async_trait]
impl AcquisitionTier for LobbyTier {
    fn kind(&self) -> TierKind {
        TierKind::Lobby
    }

    fn label(&self) -> &str {
        "lobby-api"
    }

    async fn fetch(&self, game: &GameEntry, force: bool) -> Result<TierHit, TierError> {
        let LobbyField::Configured(field) = self
            .catalog
            .lobby_field(game.upstream_slug, game.variant_key())
        else {
            return Err(TierError::NotConfigured);
        };
        let Some(client) = &self.client else {
            return Err(TierError::NotConfigured);
        };

        let bound = client.timeout();
        let snapshot = tokio::time::timeout(bound, client.snapshot(force))
            .await
            .unwrap_or(Err(TierError::Timeout(bound)))?;
        match snapshot.counts.get(field) {
            Some(&players) => Ok(TierHit {
                players,
                via: "lobby-api".to_string(),
                via_detail: Some(field.to_string()),
                observed_at_ms: snapshot.observed_at_ms,
            }),
            None => Err(TierError::MalformedUpstream(format!(
                "lobby payload missing field {field}"
            ))),
        }
    }
}
