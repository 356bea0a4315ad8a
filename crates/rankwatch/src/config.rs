// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! Resolution order for the file: explicit path, `RANKWATCH_CONFIG`,
//! `./rankwatch.json`, `~/.rankwatch/config.json`, then built-in defaults.
//! A handful of deployment knobs can be overridden from the environment.

use crate::error::{RankwatchError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Env var naming an explicit config file.
pub const CONFIG_ENV: &str = "RANKWATCH_CONFIG";

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Size of the batch worker pool. Kept small on purpose.
    pub workers: usize,
    pub extractor: ExtractorConfig,
    pub classifier: ClassifierConfig,
    pub backoff: BackoffConfig,
    pub cache: CacheConfig,
    pub http: HttpConfig,
    pub browser: BrowserConfig,
    pub failure_log: FailureLogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            extractor: ExtractorConfig::default(),
            classifier: ClassifierConfig::default(),
            backoff: BackoffConfig::default(),
            cache: CacheConfig::default(),
            http: HttpConfig::default(),
            browser: BrowserConfig::default(),
            failure_log: FailureLogConfig::default(),
        }
    }
}

/// What to do when a page carries only sub-category ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryRankPolicy {
    /// Report the rank as absent rather than surface a category value.
    #[default]
    Reject,
    /// Fall back to the first prioritized category rank.
    Accept,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Pages shorter than this can never contain a legitimate rank.
    pub min_html_len: usize,
    /// Name of the primary marketplace ranking ("in Kindle Store").
    pub primary_store: String,
    /// Element ids that mark the sales-rank section, in priority order.
    pub container_ids: Vec<String>,
    pub category_policy: CategoryRankPolicy,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_html_len: 100,
            primary_store: "Kindle Store".to_string(),
            container_ids: vec![
                "SalesRank".to_string(),
                "detailBulletsWrapper_feature_div".to_string(),
                "productDetails_detailBullets_sections1".to_string(),
            ],
            category_policy: CategoryRankPolicy::Reject,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Below this length a page is blocked unconditionally.
    pub min_page_len: usize,
    /// CAPTCHA verdicts only apply to pages shorter than this.
    pub captcha_max_len: usize,
    /// Normal-page indicators needed to call a page clean.
    pub min_indicators: usize,
    /// Overrides for the built-in CAPTCHA phrase patterns (regex, case-insensitive).
    pub captcha_patterns: Option<Vec<String>>,
    /// Overrides for the built-in normal-page indicator patterns.
    pub indicator_patterns: Option<Vec<String>>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_page_len: 1_000,
            captcha_max_len: 5_000,
            min_indicators: 2,
            captcha_patterns: None,
            indicator_patterns: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Cooldown applied on the first block.
    pub base_delay_secs: u64,
    /// Cooldown cap.
    pub max_delay_secs: u64,
    /// How long the consecutive-block count outlives an expired cooldown.
    pub strike_memory_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 3_600,
            max_delay_secs: 86_400,
            strike_memory_secs: 7 * 86_400,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Connection URL; required for the redis backend.
    pub redis_url: Option<String>,
    /// TTL of raw HTML entries.
    pub html_ttl_secs: u64,
    /// TTL of derived values (last known rank).
    pub value_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: None,
            html_ttl_secs: 3_600,
            value_ttl_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_ms: u64,
    /// Fixed pause before each outbound Tier-1 request.
    pub pre_request_delay_ms: u64,
    /// Pause before the single retry on HTTP 500/503.
    pub retry_backoff_ms: u64,
    pub user_agent: String,
    pub accept_language: String,
    pub referer: Option<String>,
    pub proxy: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            pre_request_delay_ms: 5_000,
            retry_backoff_ms: 30_000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            referer: None,
            proxy: None,
        }
    }
}

/// The one browser identity used by both tiers. Never randomized.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                                      AppleWebKit/537.36 (KHTML, like Gecko) \
                                      Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub enabled: bool,
    pub headless: bool,
    /// Concurrent browser sessions, 1..=3.
    pub max_sessions: usize,
    /// How long a checkout waits for a pooled session before going ephemeral.
    pub checkout_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    /// Human-scale delay before navigation, drawn uniformly from this range.
    pub delay_min_secs: f64,
    pub delay_max_secs: f64,
    /// Backoff schedule for HTTP 500/503; its length bounds the retries.
    pub retry_backoff_secs: Vec<u64>,
    /// Pause range between scroll/pointer actions.
    pub interaction_pause_min_ms: u64,
    pub interaction_pause_max_ms: u64,
    /// Hosts that always skip Tier-1.
    pub browser_only_hosts: Vec<String>,
    pub chromium_path: Option<PathBuf>,
    pub proxy: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            headless: true,
            max_sessions: 1,
            checkout_timeout_ms: 300_000,
            navigation_timeout_ms: 30_000,
            idle_timeout_ms: 15_000,
            delay_min_secs: 45.0,
            delay_max_secs: 120.0,
            retry_backoff_secs: vec![60, 180, 600],
            interaction_pause_min_ms: 500,
            interaction_pause_max_ms: 2_000,
            browser_only_hosts: vec!["amazon.co.uk".to_string()],
            chromium_path: None,
            proxy: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureLogConfig {
    /// JSONL file; defaults to `~/.rankwatch/failures.jsonl`.
    pub path: Option<PathBuf>,
    pub max_bytes: u64,
    pub max_rotations: u32,
    pub snippet_chars: usize,
}

impl Default for FailureLogConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_bytes: 100 * 1024 * 1024,
            max_rotations: 5,
            snippet_chars: 500,
        }
    }
}

impl EngineConfig {
    /// Load a config file (JSON).
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RankwatchError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| RankwatchError::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// Resolve, load, apply environment overrides and validate.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_path(explicit) {
            Some(path) => {
                tracing::debug!("loading config from {}", path.display());
                Self::load(&path)?
            }
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RANKWATCH_*` overrides using `lookup` to read variables.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("RANKWATCH_REDIS_URL") {
            self.cache.redis_url = Some(url);
            self.cache.backend = CacheBackend::Redis;
        }
        if let Some(proxy) = lookup("RANKWATCH_PROXY") {
            self.http.proxy = Some(proxy.clone());
            self.browser.proxy = Some(proxy);
        }
        if let Some(v) = lookup("RANKWATCH_DELAY_MIN_SECS") {
            self.browser.delay_min_secs = parse_env("RANKWATCH_DELAY_MIN_SECS", &v)?;
        }
        if let Some(v) = lookup("RANKWATCH_DELAY_MAX_SECS") {
            self.browser.delay_max_secs = parse_env("RANKWATCH_DELAY_MAX_SECS", &v)?;
        }
        if let Some(v) = lookup("RANKWATCH_HEADLESS") {
            self.browser.headless = !matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "false" | "0" | "no" | "off"
            );
        }
        if let Some(v) = lookup("RANKWATCH_WORKERS") {
            self.workers = parse_env("RANKWATCH_WORKERS", &v)?;
        }
        Ok(())
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(RankwatchError::Config("workers must be at least 1".into()));
        }
        if self.cache.backend == CacheBackend::Redis
            && self.cache.redis_url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            return Err(RankwatchError::Config(
                "redis cache backend selected but no redis_url configured".into(),
            ));
        }
        if !(1..=3).contains(&self.browser.max_sessions) {
            return Err(RankwatchError::Config(format!(
                "browser.max_sessions must be between 1 and 3, got {}",
                self.browser.max_sessions
            )));
        }
        let (min, max) = (self.browser.delay_min_secs, self.browser.delay_max_secs);
        if !min.is_finite() || !max.is_finite() || min < 0.0 || min > max {
            return Err(RankwatchError::Config(format!(
                "invalid browser delay range {}..{}",
                self.browser.delay_min_secs, self.browser.delay_max_secs
            )));
        }
        if self.browser.interaction_pause_min_ms > self.browser.interaction_pause_max_ms {
            return Err(RankwatchError::Config("invalid interaction pause range".into()));
        }
        if self.backoff.base_delay_secs == 0 {
            return Err(RankwatchError::Config("backoff.base_delay_secs must be positive".into()));
        }
        if self.backoff.base_delay_secs > self.backoff.max_delay_secs {
            return Err(RankwatchError::Config(
                "backoff.base_delay_secs exceeds backoff.max_delay_secs".into(),
            ));
        }
        if self.classifier.min_page_len > self.classifier.captcha_max_len {
            return Err(RankwatchError::Config(
                "classifier.min_page_len exceeds classifier.captcha_max_len".into(),
            ));
        }
        if self.extractor.primary_store.trim().is_empty() {
            return Err(RankwatchError::Config("extractor.primary_store is empty".into()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RankwatchError::Config(format!("{key}: cannot parse {value:?}")))
}

/// Find the config file to load, if any.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(env_path));
    }

    let cwd = PathBuf::from("rankwatch.json");
    if cwd.exists() {
        return Some(cwd);
    }

    let home = dirs::home_dir()?.join(".rankwatch").join("config.json");
    home.exists().then_some(home)
}
