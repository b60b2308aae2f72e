//! Live player-count tracking backend.
//!
//! Acquires current player counts for a fixed catalog of game-show pages through
//! tiered fallbacks, persists them as per-series samples and serves cross-game
//! rollups over HTTP.

pub mod aggregation;
pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod games;
pub mod middleware;
pub mod models;
pub mod scrapers;
pub mod store;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::{
    aggregation::{seed::load_seed, AggregationService},
    api::AppState,
    cache::ResponseCache,
    config::AppConfig,
    games::GameCatalog,
    scrapers::{
        browser::select_engine, AcquisitionOrchestrator, AcquisitionTier, BrowserTier,
        LobbyApiClient, LobbyTier, PageHtmlTier,
    },
    store::{DbSampleStore, SampleStore},
};

/// Wires store, tiers, cache and aggregation from configuration.
pub fn build_state(config: &AppConfig) -> Result<AppState> {
    let http = reqwest::Client::builder()
        .connect_timeout(config.http_timeout)
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .build()
        .context("Failed to build HTTP client")?;

    let catalog = Arc::new(GameCatalog::builtin());
    let store: Arc<dyn SampleStore> = Arc::new(
        DbSampleStore::new(&config.db_path)?
            .with_epoch_cutoffs(config.epoch_cutoffs.clone())
            .with_retention_days(config.retention_days),
    );

    let lobby_client = match &config.lobby_api_url {
        Some(url) => Some(Arc::new(LobbyApiClient::new(
            http.clone(),
            url.clone(),
            config.http_timeout,
            config.lobby_dedupe,
        ))),
        None => {
            info!("LOBBY_API_URL unset, lobby tier disabled");
            None
        }
    };
    let engine = select_engine(&config.browser, http.clone());
    info!(
        engine = engine.as_ref().map(|e| e.label()).unwrap_or("disabled"),
        "browser tier engine selected"
    );

    let tiers: Vec<Arc<dyn AcquisitionTier>> = vec![
        Arc::new(LobbyTier::new(lobby_client, catalog.clone())),
        Arc::new(PageHtmlTier::new(
            http.clone(),
            config.page_base_url.clone(),
            config.http_timeout,
        )),
        Arc::new(BrowserTier::new(
            engine,
            config.page_base_url.clone(),
            &config.browser,
        )),
    ];

    let orchestrator = Arc::new(AcquisitionOrchestrator::new(
        catalog.clone(),
        tiers,
        store.clone(),
        config.route_budget,
    ));
    let aggregation = Arc::new(
        AggregationService::new(
            store.clone(),
            catalog.clone(),
            config.timezone(),
            load_seed(config.seed_path.as_deref()),
        )
        .with_history_days(config.retention_days),
    );

    Ok(AppState {
        catalog,
        orchestrator,
        store,
        cache: Arc::new(ResponseCache::new(config.response_cache_ttl)),
        aggregation,
    })
}
