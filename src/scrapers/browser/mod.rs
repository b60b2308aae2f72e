//! Headless browser tier.
//!
//! The engine is picked once at startup ([`select_engine`]); both engines expose
//! the same [`BrowserSession`] surface, so the page script never branches on
//! the deployment environment.

pub mod script;
pub mod webdriver;

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{page_html::page_url, AcquisitionTier, TierHit, TierKind};
use crate::{
    config::{BrowserConfig, BrowserEngineKind},
    error::TierError,
    games::GameEntry,
};

pub use script::{read_counter_script, ScriptOutcome, ScriptTimings};
pub use webdriver::{LocalChromeEngine, RemoteWebDriverEngine};

/// One open browser page. Callers must `close` it on every exit path.
#[async_trait]
pub trait BrowserSession: Send {
    async fn goto(&mut self, url: &str) -> Result<(), TierError>;

    /// Clicks the first element matching any selector, in order.
    /// `Ok(false)` when nothing matched.
    async fn click_first(&mut self, selectors: &[&str]) -> Result<bool, TierError>;

    /// Text of the first element matching `selector`, if any.
    async fn read_text(&mut self, selector: &str) -> Result<Option<String>, TierError>;

    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait BrowserAutomationEngine: Send + Sync {
    /// Diagnostic label used in `via`.
    fn label(&self) -> &'static str;

    async fn open_session(&self) -> Result<Box<dyn BrowserSession>, TierError>;
}

/// Builds the configured engine, or `None` when the tier is disabled.
pub fn select_engine(
    config: &BrowserConfig,
    http: Client,
) -> Option<Arc<dyn BrowserAutomationEngine>> {
    match config.engine {
        BrowserEngineKind::Remote => match &config.webdriver_url {
            Some(url) => Some(Arc::new(RemoteWebDriverEngine::new(
                http,
                url.clone(),
                config.navigation_budget,
            ))),
            None => {
                warn!("BROWSER_ENGINE=remote but BROWSER_WEBDRIVER_URL is unset, browser tier disabled");
                None
            }
        },
        BrowserEngineKind::Local => Some(Arc::new(LocalChromeEngine::new(
            http,
            config.chromedriver_path.clone(),
            config.navigation_budget,
        ))),
        BrowserEngineKind::Disabled => None,
    }
}

pub struct BrowserTier {
    engine: Option<Arc<dyn BrowserAutomationEngine>>,
    base_url: String,
    timings: ScriptTimings,
    session_budget: std::time::Duration,
}

impl BrowserTier {
    pub fn new(
        engine: Option<Arc<dyn BrowserAutomationEngine>>,
        base_url: impl Into<String>,
        config: &BrowserConfig,
    ) -> Self {
        Self {
            engine,
            base_url: base_url.into(),
            timings: ScriptTimings::from(config),
            session_budget: config.session_budget(),
        }
    }

    pub fn with_timings(mut self, timings: ScriptTimings, session_budget: std::time::Duration) -> Self {
        self.timings = timings;
        self.session_budget = session_budget;
        self
    }
}

#[async_trait]
impl AcquisitionTier for BrowserTier {
    fn kind(&self) -> TierKind {
        TierKind::Browser
    }

    fn label(&self) -> &str {
        self.engine.as_ref().map(|e| e.label()).unwrap_or("browser")
    }

    async fn fetch(&self, game: &GameEntry, _force: bool) -> Result<TierHit, TierError> {
        let Some(engine) = self.engine.clone() else {
            return Err(TierError::NotConfigured);
        };
        let label = engine.label();
        let url = page_url(&self.base_url, game.upstream_slug);
        let variant = game.variant;
        let timings = self.timings.clone();
        let budget = self.session_budget;

        // The session lives in its own task so teardown still runs if the caller
        // stops waiting on us.
        let task = tokio::spawn(async move {
            let mut session = engine.open_session().await?;
            let outcome = timeout(
                budget,
                read_counter_script(session.as_mut(), &url, variant.as_ref(), &timings),
            )
            .await;
            session.close().await;
            debug!(url = %url, "browser session closed");
            outcome.unwrap_or(Err(TierError::Timeout(budget)))
        });

        let outcome = task
            .await
            .map_err(|e| TierError::Browser(format!("browser task failed: {e}")))??;

        let via = match game.variant {
            Some(v) => format!("{label}:{}", v.key),
            None => label.to_string(),
        };
        Ok(TierHit::new(outcome.players, via).with_detail(outcome.detail))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::games::GameCatalog;
    use std::{sync::atomic::Ordering, time::Duration};

    fn fast_timings() -> ScriptTimings {
        ScriptTimings {
            counter_wait: Duration::from_millis(200),
            variant_switch_wait: Duration::from_millis(100),
            poll_interval: Duration::from_millis(5),
        }
    }

    fn tier(page: Arc<FakePage>, label: &'static str) -> BrowserTier {
        let engine: Arc<dyn BrowserAutomationEngine> = Arc::new(FakeEngine { page, label });
        BrowserTier::new(Some(engine), "https://example.test", &BrowserConfig::default())
            .with_timings(fast_timings(), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn reads_counter_and_closes_session() {
        let page = FakePage::with_readings(&[None, Some("12,345")]);
        let catalog = GameCatalog::builtin();
        let game = catalog.find("crazy-time", None).unwrap();

        let hit = tier(page.clone(), "puppeteer").fetch(game, false).await.unwrap();
        assert_eq!(hit.players, 12345);
        assert_eq!(hit.via, "puppeteer");
        assert_eq!(page.opened.load(Ordering::SeqCst), 1);
        assert_eq!(page.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn variant_label_carries_variant_key() {
        let page = Arc::new(FakePage {
            readings: parking_lot::Mutex::new([Some("900".to_string())].into_iter().collect()),
            after_click: parking_lot::Mutex::new(Some(
                [Some("900".to_string()), Some("4,000".to_string())]
                    .into_iter()
                    .collect(),
            )),
            ..Default::default()
        });
        let catalog = GameCatalog::builtin();
        let game = catalog.find("crazy-time", Some("a")).unwrap();

        let hit = tier(page.clone(), "playwright").fetch(game, false).await.unwrap();
        assert_eq!(hit.players, 4000);
        assert_eq!(hit.via, "playwright:a");
        assert_eq!(page.clicks.lock().len(), 1);
    }

    #[tokio::test]
    async fn session_is_closed_when_navigation_fails() {
        let page = Arc::new(FakePage {
            fail_goto: true,
            ..Default::default()
        });
        let catalog = GameCatalog::builtin();
        let game = catalog.find("monopoly-live", None).unwrap();

        let err = tier(page.clone(), "puppeteer").fetch(game, false).await.unwrap_err();
        assert!(matches!(err, TierError::Browser(_)));
        assert_eq!(page.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_engine_skips_tier() {
        let catalog = GameCatalog::builtin();
        let game = catalog.find("monopoly-live", None).unwrap();
        let tier = BrowserTier::new(None, "https://example.test", &BrowserConfig::default());
        assert_eq!(tier.fetch(game, false).await, Err(TierError::NotConfigured));
    }

    #[test]
    fn remote_engine_requires_url() {
        let cfg = BrowserConfig {
            engine: BrowserEngineKind::Remote,
            ..BrowserConfig::default()
        };
        assert!(select_engine(&cfg, Client::new()).is_none());

        let cfg = BrowserConfig {
            engine: BrowserEngineKind::Remote,
            webdriver_url: Some("http://127.0.0.1:4444".into()),
            ..BrowserConfig::default()
        };
        assert_eq!(select_engine(&cfg, Client::new()).unwrap().label(), "puppeteer");

        let local = BrowserConfig::default();
        assert_eq!(select_engine(&local, Client::new()).unwrap().label(), "playwright");
    }
}
