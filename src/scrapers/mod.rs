//! Acquisition tiers for live player counts.
//!
//! Tiers are tried in order by the [`orchestrator`]; the first hit wins.
//! 1. [`lobby_api`] - one shared payload with counts for every game
//! 2. [`page_html`] - plain GET of the game page + pattern extraction
//! 3. [`browser`] - headless browser automation

pub mod browser;
pub mod lobby_api;
pub mod orchestrator;
pub mod page_html;

use async_trait::async_trait;

use crate::{error::TierError, games::GameEntry};

pub use browser::BrowserTier;
pub use lobby_api::{LobbyApiClient, LobbyTier};
pub use orchestrator::{Acquisition, AcquisitionOrchestrator, FetchOptions};
pub use page_html::PageHtmlTier;

/// Which slot of the failure report a tier's error lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierKind {
    Lobby,
    Plain,
    Browser,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierHit {
    pub players: u64,
    /// Diagnostic strategy label, e.g. `lobby-api`, `plain:id`, `puppeteer:a`
    pub via: String,
    pub via_detail: Option<String>,
    /// Upstream-provided observation time, if the tier has one
    pub observed_at_ms: Option<i64>,
}

impl TierHit {
    pub fn new(players: u64, via: impl Into<String>) -> Self {
        Self {
            players,
            via: via.into(),
            via_detail: None,
            observed_at_ms: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.via_detail = Some(detail.into());
        self
    }
}

#[async_trait]
pub trait AcquisitionTier: Send + Sync {
    fn kind(&self) -> TierKind;

    /// Label reported as `via` when this tier fails last.
    fn label(&self) -> &str;

    /// Tries to read the current player count for `game`.
    /// [`TierError::NotConfigured`] means "skip", not failure.
    async fn fetch(&self, game: &GameEntry, force: bool) -> Result<TierHit, TierError>;
}

/// Parses a displayed counter such as `12,345`, `12 345` or `1.234 players`.
///
/// Takes the leading numeric run; separators (`,` `.` spaces) are dropped because
/// player counts are always integers. A letter glued to the number (`1.2K`, `12k`)
/// is an abbreviation and yields `None` rather than a misread count.
pub fn parse_player_count(text: &str) -> Option<u64> {
    let text = text.trim();
    let mut digits = String::with_capacity(text.len());
    let mut after_space = false;
    for c in text.chars() {
        match c {
            '0'..='9' => {
                digits.push(c);
                after_space = false;
            }
            ',' | '.' if !digits.is_empty() => after_space = false,
            ' ' | '\u{a0}' | '\u{202f}' | '\u{2009}' if !digits.is_empty() => after_space = true,
            c if c.is_alphabetic() && !digits.is_empty() && !after_space => return None,
            _ => break,
        }
    }
    if digits.is_empty() {
        return None;
    }
    digits.parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_counter_formats() {
        assert_eq!(parse_player_count("12,345"), Some(12345));
        assert_eq!(parse_player_count("  12 345 "), Some(12345));
        assert_eq!(parse_player_count("12\u{a0}345 players"), Some(12345));
        assert_eq!(parse_player_count("1.234"), Some(1234));
        assert_eq!(parse_player_count("0"), Some(0));
        assert_eq!(parse_player_count(""), None);
        assert_eq!(parse_player_count("players: 12"), None);
        assert_eq!(parse_player_count("--"), None);
    }

    #[test]
    fn abbreviated_counters_are_rejected() {
        assert_eq!(parse_player_count("1.2K"), None);
        assert_eq!(parse_player_count("12k players"), None);
        assert_eq!(parse_player_count("3,4M"), None);
        assert_eq!(parse_player_count("1.234 players"), Some(1234));
        assert_eq!(parse_player_count("12,345 Spieler"), Some(12345));
    }
}
