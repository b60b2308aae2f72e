//! Runtime configuration, read once at startup from the environment.

use chrono::{FixedOffset, Offset, Utc};
use dotenv::dotenv;
use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::warn;

use crate::store::EpochCutoffs;

/// Which headless-browser engine backs the last acquisition tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserEngineKind {
    /// Hosted WebDriver endpoint, for constrained/serverless deployments
    Remote,
    /// Locally spawned chromedriver
    Local,
    Disabled,
}

impl BrowserEngineKind {
    fn from_env() -> Self {
        match env::var("BROWSER_ENGINE")
            .map(|v| v.trim().to_ascii_lowercase())
            .as_deref()
        {
            Ok("remote") => return Self::Remote,
            Ok("local") => return Self::Local,
            Ok("off") | Ok("disabled") | Ok("none") => return Self::Disabled,
            Ok(other) if !other.is_empty() => {
                warn!(value = other, "unknown BROWSER_ENGINE, detecting from platform")
            }
            _ => {}
        }

        let serverless = ["AWS_LAMBDA_FUNCTION_NAME", "VERCEL", "K_SERVICE", "SERVERLESS"]
            .iter()
            .any(|k| env::var(k).map(|v| !v.is_empty()).unwrap_or(false));
        if serverless {
            Self::Remote
        } else {
            Self::Local
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub engine: BrowserEngineKind,
    pub webdriver_url: Option<String>,
    pub chromedriver_path: String,
    /// Bounded wait for a non-empty numeric counter
    pub counter_wait: Duration,
    /// Bounded wait for the counter to change after a variant switch
    pub variant_switch_wait: Duration,
    pub poll_interval: Duration,
    /// Navigation allowance on top of the two waits
    pub navigation_budget: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            engine: BrowserEngineKind::Local,
            webdriver_url: None,
            chromedriver_path: "chromedriver".to_string(),
            counter_wait: Duration::from_millis(15_000),
            variant_switch_wait: Duration::from_millis(3_500),
            poll_interval: Duration::from_millis(250),
            navigation_budget: Duration::from_millis(10_000),
        }
    }
}

impl BrowserConfig {
    /// Hard ceiling for one browser session, teardown included.
    pub fn session_budget(&self) -> Duration {
        self.counter_wait + self.variant_switch_wait + self.navigation_budget
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub db_path: String,
    pub lobby_api_url: Option<String>,
    pub lobby_dedupe: Duration,
    pub page_base_url: String,
    pub http_timeout: Duration,
    pub response_cache_ttl: Duration,
    pub route_budget: Duration,
    pub browser: BrowserConfig,
    pub tz_offset_minutes: i32,
    pub retention_days: u32,
    pub epoch_cutoffs: EpochCutoffs,
    pub seed_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            db_path: resolve_data_path(None, "playercount_samples.db"),
            lobby_api_url: None,
            lobby_dedupe: Duration::from_millis(5_000),
            page_base_url: "https://casinoscores.com".to_string(),
            http_timeout: Duration::from_millis(8_000),
            response_cache_ttl: Duration::from_secs(30),
            route_budget: Duration::from_secs(30),
            browser: BrowserConfig::default(),
            tz_offset_minutes: 0,
            retention_days: 400,
            epoch_cutoffs: EpochCutoffs::default(),
            seed_path: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("BIND_ADDR") {
            if !v.trim().is_empty() {
                cfg.bind_addr = v.trim().to_string();
            }
        }
        cfg.db_path = resolve_data_path(
            env::var("SAMPLES_DB_PATH").ok(),
            "playercount_samples.db",
        );
        cfg.lobby_api_url = non_empty_var("LOBBY_API_URL");
        cfg.lobby_dedupe = env_millis("LOBBY_DEDUPE_MS", 0).unwrap_or(cfg.lobby_dedupe);
        cfg.page_base_url = non_empty_var("PAGE_BASE_URL").unwrap_or(cfg.page_base_url);
        cfg.http_timeout = env_millis("HTTP_TIMEOUT_MS", 500).unwrap_or(cfg.http_timeout);
        cfg.response_cache_ttl = env::var("RESPONSE_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(cfg.response_cache_ttl);
        cfg.route_budget = env_millis("ROUTE_BUDGET_MS", 1_000).unwrap_or(cfg.route_budget);

        cfg.browser.engine = BrowserEngineKind::from_env();
        cfg.browser.webdriver_url = non_empty_var("BROWSER_WEBDRIVER_URL");
        cfg.browser.chromedriver_path =
            non_empty_var("CHROMEDRIVER_PATH").unwrap_or(cfg.browser.chromedriver_path);
        cfg.browser.counter_wait =
            env_millis("COUNTER_WAIT_MS", 100).unwrap_or(cfg.browser.counter_wait);
        cfg.browser.variant_switch_wait =
            env_millis("VARIANT_SWITCH_WAIT_MS", 100).unwrap_or(cfg.browser.variant_switch_wait);

        cfg.tz_offset_minutes = env::var("TZ_OFFSET_MINUTES")
            .ok()
            .and_then(|v| v.trim().parse::<i32>().ok())
            .filter(|v| v.abs() < 24 * 60)
            .unwrap_or(cfg.tz_offset_minutes);
        cfg.retention_days = env::var("RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(cfg.retention_days);

        if let Some(raw) = non_empty_var("EPOCH_CUTOFFS") {
            cfg.epoch_cutoffs = EpochCutoffs::parse(&raw);
        }
        cfg.seed_path = non_empty_var("LOBBY_SEED_PATH");

        cfg
    }

    /// The fixed timezone that defines local calendar days.
    pub fn timezone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.tz_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_millis(key: &str, min: u64) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v >= min)
        .map(Duration::from_millis)
}

fn default_data_path(filename: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join(filename)
        .to_string_lossy()
        .to_string()
}

/// Relative paths resolve against the crate directory, not the caller's cwd.
pub fn resolve_data_path(env_value: Option<String>, default_filename: &str) -> String {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let Some(raw) = env_value.filter(|v| !v.trim().is_empty()) else {
        return default_data_path(default_filename);
    };

    let p = PathBuf::from(raw.trim());
    if p.is_absolute() {
        return p.to_string_lossy().to_string();
    }

    base.join(p).to_string_lossy().to_string()
}

pub fn load_env() {
    // Standard dotenv search (cwd + parents)
    let _ = dotenv();

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidate = manifest_dir.join(".env");
    if candidate.exists() {
        let _ = dotenv::from_path(&candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_data_paths_resolve_against_manifest_dir() {
        let p = resolve_data_path(Some("data/x.db".into()), "default.db");
        assert!(p.ends_with("data/x.db"));
        assert!(Path::new(&p).is_absolute());

        let d = resolve_data_path(Some("   ".into()), "default.db");
        assert!(d.ends_with("default.db"));

        let abs = resolve_data_path(Some("/tmp/samples.db".into()), "default.db");
        assert_eq!(abs, "/tmp/samples.db");
    }

    #[test]
    fn timezone_uses_fixed_offset() {
        let cfg = AppConfig {
            tz_offset_minutes: 120,
            ..AppConfig::default()
        };
        assert_eq!(cfg.timezone().local_minus_utc(), 7200);
        assert_eq!(AppConfig::default().timezone().local_minus_utc(), 0);
    }

    #[test]
    fn session_budget_covers_both_waits() {
        let b = BrowserConfig::default();
        assert!(b.session_budget() > b.counter_wait + b.variant_switch_wait);
    }
}
