//! Engine-agnostic page script for the browser tier.

use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

use super::BrowserSession;
use crate::{
    config::BrowserConfig,
    error::TierError,
    games::VariantSpec,
    scrapers::{page_html::COUNTER_SELECTORS, parse_player_count},
};

/// Cookie/consent "accept" buttons seen on the tracked pages.
pub const CONSENT_SELECTORS: &[&str] = &[
    "#onetrust-accept-btn-handler",
    "[data-testid='consent-accept']",
    "button[aria-label='Accept all']",
];

#[derive(Debug, Clone)]
pub struct ScriptTimings {
    pub counter_wait: Duration,
    pub variant_switch_wait: Duration,
    pub poll_interval: Duration,
}

impl From<&BrowserConfig> for ScriptTimings {
    fn from(cfg: &BrowserConfig) -> Self {
        Self {
            counter_wait: cfg.counter_wait,
            variant_switch_wait: cfg.variant_switch_wait,
            poll_interval: cfg.poll_interval,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutcome {
    pub players: u64,
    /// How the value was obtained, e.g. `switched,wait` or `immediate`
    pub detail: String,
}

/// Navigate, dismiss consent, optionally switch variant, then read the counter.
pub async fn read_counter_script(
    session: &mut dyn BrowserSession,
    url: &str,
    variant: Option<&VariantSpec>,
    timings: &ScriptTimings,
) -> Result<ScriptOutcome, TierError> {
    session.goto(url).await?;

    match session.click_first(CONSENT_SELECTORS).await {
        Ok(true) => debug!(url, "consent dialog dismissed"),
        Ok(false) => {}
        Err(e) => debug!(url, error = %e, "consent dismissal failed"),
    }

    let mut detail = Vec::with_capacity(2);

    if let Some(v) = variant {
        let before = read_counter_once(session).await;
        if !session.click_first(&[v.control_selector]).await? {
            return Err(TierError::NotFound(format!(
                "variant control for '{}' not on page",
                v.key
            )));
        }
        let changed =
            poll_until_changed(session, before, timings.variant_switch_wait, timings.poll_interval)
                .await;
        detail.push(if changed { "switched" } else { "switch-timeout" });
    }

    let players = match wait_for_counter(session, timings.counter_wait, timings.poll_interval).await
    {
        Some(n) => {
            detail.push("wait");
            n
        }
        None => match read_counter_once(session).await {
            Some(n) => {
                detail.push("immediate");
                n
            }
            None => {
                return Err(TierError::NotFound(format!(
                    "counter still empty after {:?}",
                    timings.counter_wait
                )))
            }
        },
    };

    Ok(ScriptOutcome {
        players,
        detail: detail.join(","),
    })
}

/// One pass over the counter selectors.
async fn read_counter_once(session: &mut dyn BrowserSession) -> Option<u64> {
    for selector in COUNTER_SELECTORS {
        if let Ok(Some(text)) = session.read_text(selector).await {
            if let Some(n) = parse_player_count(&text) {
                return Some(n);
            }
        }
    }
    None
}

/// Polls until the counter shows a numeric value different from `before`.
/// Returns `false` when `wait` elapses first.
pub async fn poll_until_changed(
    session: &mut dyn BrowserSession,
    before: Option<u64>,
    wait: Duration,
    interval: Duration,
) -> bool {
    let deadline = Instant::now() + wait;
    loop {
        sleep(interval).await;
        let current = read_counter_once(session).await;
        if current.is_some() && current != before {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
    }
}

/// Polls until the counter holds non-empty numeric text, up to `wait`.
async fn wait_for_counter(
    session: &mut dyn BrowserSession,
    wait: Duration,
    interval: Duration,
) -> Option<u64> {
    let deadline = Instant::now() + wait;
    loop {
        if let Some(n) = read_counter_once(session).await {
            return Some(n);
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::FakePage;
    use super::super::testing::FakeEngine;
    use super::super::BrowserAutomationEngine;
    use super::*;
    use std::sync::Arc;

    fn timings() -> ScriptTimings {
        ScriptTimings {
            counter_wait: Duration::from_millis(60),
            variant_switch_wait: Duration::from_millis(40),
            poll_interval: Duration::from_millis(5),
        }
    }

    const VARIANT: VariantSpec = VariantSpec {
        key: "a",
        control_selector: "[data-testid='table-switch-a']",
    };

    async fn run(page: Arc<FakePage>, variant: Option<&VariantSpec>) -> Result<ScriptOutcome, TierError> {
        let engine = FakeEngine {
            page,
            label: "puppeteer",
        };
        let mut session = engine.open_session().await.unwrap();
        let out = read_counter_script(session.as_mut(), "https://x.test/", variant, &timings()).await;
        session.close().await;
        out
    }

    #[tokio::test]
    async fn variant_switch_times_out_but_still_reads() {
        // counter never changes after the click
        let page = FakePage::with_readings(&[Some("500")]);
        let out = run(page.clone(), Some(&VARIANT)).await.unwrap();
        assert_eq!(out.players, 500);
        assert_eq!(out.detail, "switch-timeout,wait");
    }

    #[tokio::test]
    async fn variant_switch_detects_change() {
        let page = Arc::new(FakePage {
            readings: parking_lot::Mutex::new([Some("500".to_string())].into_iter().collect()),
            after_click: parking_lot::Mutex::new(Some(
                [None, Some("500".to_string()), Some("7,000".to_string())]
                    .into_iter()
                    .collect(),
            )),
            ..Default::default()
        });
        let out = run(page, Some(&VARIANT)).await.unwrap();
        assert_eq!(out.players, 7000);
        assert_eq!(out.detail, "switched,wait");
    }

    #[tokio::test]
    async fn empty_counter_fails_after_bounded_wait() {
        let page = FakePage::with_readings(&[Some("")]);
        let started = Instant::now();
        let err = run(page, None).await.unwrap_err();
        assert!(matches!(err, TierError::NotFound(_)));
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn missing_variant_control_is_not_found() {
        struct NoControls;
        #[async_trait::async_trait]
        impl BrowserSession for NoControls {
            async fn goto(&mut self, _url: &str) -> Result<(), TierError> {
                Ok(())
            }
            async fn click_first(&mut self, _selectors: &[&str]) -> Result<bool, TierError> {
                Ok(false)
            }
            async fn read_text(&mut self, _selector: &str) -> Result<Option<String>, TierError> {
                Ok(Some("1".into()))
            }
            async fn close(self: Box<Self>) {}
        }

        let mut session = NoControls;
        let err = read_counter_script(&mut session, "https://x.test/", Some(&VARIANT), &timings())
            .await
            .unwrap_err();
        assert!(matches!(err, TierError::NotFound(_)));
    }
}
