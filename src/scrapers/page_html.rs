//! Static page tier: plain GET of the game page, no script execution.
//!
//! Extraction order: known DOM id, then known test-id attribute, then a
//! free-text `N players` pattern.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::{parse_player_count, AcquisitionTier, TierHit, TierKind};
use crate::{error::TierError, games::GameEntry};

pub const COUNTER_DOM_ID: &str = "players-count";
pub const COUNTER_TEST_ID: &str = "player-count";

/// CSS selectors for the same counter, used by the browser tier.
pub const COUNTER_SELECTORS: &[&str] = &["#players-count", "[data-testid='player-count']"];

const BROWSER_UA: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Maximum bytes scanned after an attribute match for the element's text.
const ELEMENT_SCAN_LIMIT: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMethod {
    DomId,
    TestId,
    FreeText,
}

impl ExtractMethod {
    pub fn via(&self) -> &'static str {
        match self {
            ExtractMethod::DomId => "plain:id",
            ExtractMethod::TestId => "plain:testid",
            ExtractMethod::FreeText => "plain:text",
        }
    }
}

pub fn page_url(base_url: &str, slug: &str) -> String {
    format!("{}/{}/", base_url.trim_end_matches('/'), slug)
}

/// Finds the player counter in raw HTML, in priority order.
pub fn extract_player_count(html: &str) -> Option<(u64, ExtractMethod)> {
    if let Some(n) = element_text_by_attr(html, "id", COUNTER_DOM_ID).and_then(parse_player_count)
    {
        return Some((n, ExtractMethod::DomId));
    }
    if let Some(n) =
        element_text_by_attr(html, "data-testid", COUNTER_TEST_ID).and_then(parse_player_count)
    {
        return Some((n, ExtractMethod::TestId));
    }
    count_before_players(html).map(|n| (n, ExtractMethod::FreeText))
}

/// First non-blank text node after the opening tag carrying `attr="value"`.
fn element_text_by_attr<'a>(html: &'a str, attr: &str, value: &str) -> Option<&'a str> {
    for quote in ['"', '\''] {
        let needle = format!("{attr}={quote}{value}{quote}");
        let Some(pos) = html.find(&needle) else {
            continue;
        };
        let after_attr = &html[pos + needle.len()..];
        let Some(tag_end) = after_attr.find('>') else {
            continue;
        };
        let mut rest = &after_attr[tag_end + 1..];
        let mut scanned = 0usize;

        // Walk text nodes, skipping nested tags, until something non-blank shows up.
        while !rest.is_empty() && scanned < ELEMENT_SCAN_LIMIT {
            let text_end = rest.find('<').unwrap_or(rest.len());
            let text = rest[..text_end].trim();
            if !text.is_empty() {
                return Some(text);
            }
            scanned += text_end;
            let after_text = &rest[text_end..];
            match after_text.find('>') {
                Some(close) => {
                    scanned += close + 1;
                    rest = &after_text[close + 1..];
                }
                None => break,
            }
        }
    }
    None
}

/// Number directly preceding the word `players`, e.g. `12,345 players`.
fn count_before_players(html: &str) -> Option<u64> {
    let lower = html.to_ascii_lowercase();
    let mut search_from = 0usize;

    while let Some(rel) = lower[search_from..].find("players") {
        let pos = search_from + rel;
        search_from = pos + "players".len();

        let before = html[..pos].trim_end_matches(|c: char| c.is_whitespace());
        let start = before
            .char_indices()
            .rev()
            .take_while(|(_, c)| {
                c.is_ascii_digit() || matches!(c, ',' | '.' | ' ' | '\u{a0}' | '\u{202f}')
            })
            .last()
            .map(|(i, _)| i);
        let Some(start) = start else {
            continue;
        };
        if let Some(n) = parse_player_count(&before[start..]) {
            return Some(n);
        }
    }
    None
}

pub struct PageHtmlTier {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl PageHtmlTier {
    pub fn new(http: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl AcquisitionTier for PageHtmlTier {
    fn kind(&self) -> TierKind {
        TierKind::Plain
    }

    fn label(&self) -> &str {
        "plain"
    }

    async fn fetch(&self, game: &GameEntry, _force: bool) -> Result<TierHit, TierError> {
        // Variants need an interactive switch the static page can't do.
        if game.variant.is_some() {
            return Err(TierError::NotConfigured);
        }

        let url = page_url(&self.base_url, game.upstream_slug);
        let response = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .header(reqwest::header::USER_AGENT, BROWSER_UA)
            .header(reqwest::header::ACCEPT, "text/html")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TierError::Http(format!("{url} returned {status}")));
        }
        let html = response.text().await?;
        debug!(slug = game.upstream_slug, body_len = html.len(), "game page fetched");

        match extract_player_count(&html) {
            Some((players, method)) => Ok(TierHit::new(players, method.via())),
            None => Err(TierError::NotFound(format!(
                "no counter in {} bytes of html",
                html.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::GameCatalog;
    use httpmock::{Method::GET, MockServer};

    #[test]
    fn prefers_dom_id_over_test_id_and_text() {
        let html = r#"<div data-testid="player-count">999</div>
            <span id="players-count" class="x">12,345</span> 5 players"#;
        assert_eq!(extract_player_count(html), Some((12345, ExtractMethod::DomId)));
    }

    #[test]
    fn falls_back_to_test_id_with_nested_markup() {
        let html = r#"<div data-testid='player-count'><span> </span><b>8 765</b></div>"#;
        assert_eq!(extract_player_count(html), Some((8765, ExtractMethod::TestId)));
    }

    #[test]
    fn falls_back_to_free_text() {
        let html = "<p>Now playing: <strong>4,321 Players</strong> online</p>";
        // "Players" is preceded by a number inside the same text node
        assert_eq!(extract_player_count(html), Some((4321, ExtractMethod::FreeText)));
    }

    #[test]
    fn skips_players_word_without_number() {
        let html = "<h2>Top players</h2><p>1 200 players right now</p>";
        assert_eq!(extract_player_count(html), Some((1200, ExtractMethod::FreeText)));
        assert_eq!(extract_player_count("<p>no counter here</p>"), None);
    }

    #[test]
    fn empty_dom_id_element_falls_through() {
        let html = r#"<span id="players-count">--</span><i data-testid="player-count">77</i>"#;
        assert_eq!(extract_player_count(html), Some((77, ExtractMethod::TestId)));
    }

    #[tokio::test]
    async fn fetches_and_extracts_from_page() {
        let server = MockServer::start_async().await;
        let page = server
            .mock_async(|when, then| {
                when.method(GET).path("/crazy-time/");
                then.status(200)
                    .body(r#"<html><span id="players-count">10,001</span></html>"#);
            })
            .await;

        let catalog = GameCatalog::builtin();
        let game = catalog.find("crazy-time", None).unwrap();
        let tier = PageHtmlTier::new(Client::new(), server.base_url(), Duration::from_secs(2));
        let hit = tier.fetch(game, false).await.unwrap();

        page.assert_async().await;
        assert_eq!(hit.players, 10001);
        assert_eq!(hit.via, "plain:id");
    }

    #[tokio::test]
    async fn upstream_error_is_tier_local() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/monopoly-live/");
                then.status(503);
            })
            .await;

        let catalog = GameCatalog::builtin();
        let game = catalog.find("monopoly-live", None).unwrap();
        let tier = PageHtmlTier::new(Client::new(), server.base_url(), Duration::from_secs(2));
        assert!(matches!(
            tier.fetch(game, false).await,
            Err(TierError::Http(_))
        ));
    }

    #[tokio::test]
    async fn variants_are_not_configured_for_plain_fetch() {
        let catalog = GameCatalog::builtin();
        let game = catalog.find("crazy-time", Some("a")).unwrap();
        let tier = PageHtmlTier::new(Client::new(), "http://127.0.0.1:9", Duration::from_secs(1));
        assert_eq!(tier.fetch(game, false).await, Err(TierError::NotConfigured));
    }
}
