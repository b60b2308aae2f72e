//! Static catalog of tracked game shows.
//!
//! Every entry defines one series. The lobby tier uses a typed lookup keyed by
//! `(slug, variant)`; a missing mapping is [`LobbyField::NotConfigured`], never a
//! silent fallthrough to the default variant.

use serde::Serialize;
use std::collections::HashMap;

/// An alternate sub-mode of a game, tracked as its own series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VariantSpec {
    /// Suffix used in the series id, e.g. `a` for `crazy-time:a`
    pub key: &'static str,
    /// CSS selector of the UI control that switches the page to this mode
    #[serde(skip)]
    pub control_selector: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameEntry {
    pub id: &'static str,
    pub label: &'static str,
    pub upstream_slug: &'static str,
    pub variant: Option<VariantSpec>,
    pub lobby_field_key: Option<&'static str>,
}

impl GameEntry {
    pub fn series_id(&self) -> String {
        series_id(self.upstream_slug, self.variant.map(|v| v.key))
    }

    pub fn variant_key(&self) -> Option<&'static str> {
        self.variant.map(|v| v.key)
    }
}

/// `slug` for the default configuration, `slug:variant` otherwise.
pub fn series_id(slug: &str, variant: Option<&str>) -> String {
    match variant {
        Some(v) if !v.is_empty() => format!("{slug}:{v}"),
        _ => slug.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyField {
    Configured(&'static str),
    NotConfigured,
}

pub struct GameCatalog {
    entries: Vec<GameEntry>,
    lobby_fields: HashMap<(String, Option<String>), &'static str>,
}

impl GameCatalog {
    pub fn new(entries: Vec<GameEntry>) -> Self {
        let lobby_fields = entries
            .iter()
            .filter_map(|e| {
                e.lobby_field_key.map(|field| {
                    (
                        (
                            e.upstream_slug.to_string(),
                            e.variant_key().map(str::to_string),
                        ),
                        field,
                    )
                })
            })
            .collect();

        Self {
            entries,
            lobby_fields,
        }
    }

    pub fn builtin() -> Self {
        Self::new(builtin_entries())
    }

    pub fn entries(&self) -> &[GameEntry] {
        &self.entries
    }

    pub fn find(&self, slug: &str, variant: Option<&str>) -> Option<&GameEntry> {
        self.entries
            .iter()
            .find(|e| e.upstream_slug == slug && e.variant_key() == variant)
    }

    pub fn find_series(&self, series_id: &str) -> Option<&GameEntry> {
        self.entries.iter().find(|e| e.series_id() == series_id)
    }

    pub fn lobby_field(&self, slug: &str, variant: Option<&str>) -> LobbyField {
        match self
            .lobby_fields
            .get(&(slug.to_string(), variant.map(str::to_string)))
        {
            Some(field) => LobbyField::Configured(field),
            None => LobbyField::NotConfigured,
        }
    }

    pub fn series_ids(&self) -> Vec<String> {
        self.entries.iter().map(GameEntry::series_id).collect()
    }
}

const fn game(
    label: &'static str,
    slug: &'static str,
    lobby_field_key: Option<&'static str>,
) -> GameEntry {
    GameEntry {
        id: slug,
        label,
        upstream_slug: slug,
        variant: None,
        lobby_field_key,
    }
}

fn builtin_entries() -> Vec<GameEntry> {
    vec![
        game("Crazy Time", "crazy-time", Some("crazyTime")),
        GameEntry {
            id: "crazy-time:a",
            label: "Crazy Time A",
            upstream_slug: "crazy-time",
            variant: Some(VariantSpec {
                key: "a",
                control_selector: "[data-testid='table-switch-a']",
            }),
            lobby_field_key: None,
        },
        game("Monopoly Live", "monopoly-live", Some("monopoly")),
        game(
            "Monopoly Big Baller",
            "monopoly-big-baller",
            Some("monopolyBigBaller"),
        ),
        game("Funky Time", "funky-time", Some("funkyTime")),
        game("Lightning Roulette", "lightning-roulette", Some("lightningRoulette")),
        game(
            "XXXtreme Lightning Roulette",
            "xxxtreme-lightning-roulette",
            Some("xxxtremeLightningRoulette"),
        ),
        game("Dream Catcher", "dream-catcher", Some("dreamCatcher")),
        game("Mega Ball", "mega-ball", Some("megaBall")),
        game("Lightning Dice", "lightning-dice", Some("lightningDice")),
        game("Deal or No Deal", "deal-or-no-deal", Some("dealOrNoDeal")),
        game("Cash or Crash", "cash-or-crash", Some("cashOrCrash")),
        game("Crazy Coin Flip", "crazy-coin-flip", Some("crazyCoinFlip")),
        game("Red Door Roulette", "red-door-roulette", Some("redDoorRoulette")),
        game("Football Studio", "football-studio", Some("footballStudio")),
        game("Sweet Bonanza CandyLand", "sweet-bonanza-candyland", None),
    ]
}
