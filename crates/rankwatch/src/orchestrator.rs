// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! The fetch orchestrator: tiered decision policy and engine entry point.
//!
//! Per request:
//!
//! ```text
//! Start ─ cooling down? ──────────────────────────────▶ CoolingDown (no network)
//!   │
//!   ├─ Tier-1 ─ clean + rank ─────────────────────────▶ Success
//!   │     ├──── clean, no rank ───────────────────────▶ RankNotFound
//!   │     └──── blocked / captcha / network ─┐
//!   │                                        ▼
//!   └─ (browser-only) ──────────────────▶ Tier-2 ─ clean + rank ─▶ Success
//!                                              ├── captcha ──────▶ record block
//!                                              ├── blocked ──────▶ record block
//!                                              └── network ──────▶ returned as is
//! ```
//!
//! A Tier-1 block or CAPTCHA is recorded against the target once Tier-2 fails
//! to produce a rank, whatever the Tier-2 failure was.
//!
//! Every terminal transition records exactly one metrics update. Every failed
//! tier attempt appends one failure-log record.

use crate::audit::{FailureRecord, FailureSink, JsonlFailureLog};
use crate::cache::{self, Cache, Namespace};
use crate::classify::PageInspector;
use crate::config::EngineConfig;
use crate::error::{RankwatchError, Result};
use crate::fetch::{BrowserFetcher, HttpFetcher, TierFetcher};
use crate::metrics::MetricsRecorder;
use crate::renderer::chromium::ChromiumRenderer;
use crate::renderer::pool::RendererLauncher;
use crate::renderer::{Renderer, SessionPool};
use crate::state::BlockStore;
use crate::target::Target;
use crate::types::{FetchOutcome, FetchResult, RankValue, ReportStatus, Tier, TierPreference};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What the caller gets back for one target.
#[derive(Debug, Clone, Serialize)]
pub struct RankReport {
    pub url: String,
    pub status: ReportStatus,
    /// Freshly extracted rank; only set on success.
    pub rank: Option<RankValue>,
    /// Last tier that ran, if any.
    pub tier: Option<Tier>,
    pub retried: bool,
    pub duration_ms: u64,
    pub detail: Option<String>,
    /// Last successfully extracted rank, for information on failures.
    pub last_known: Option<RankValue>,
    pub blocked_until: Option<DateTime<Utc>>,
}

impl RankReport {
    fn new(target: &Target, status: ReportStatus) -> Self {
        Self {
            url: target.url().to_string(),
            status,
            rank: None,
            tier: None,
            retried: false,
            duration_ms: 0,
            detail: None,
            last_known: None,
            blocked_until: None,
        }
    }

    fn from_fetch(target: &Target, status: ReportStatus, result: &FetchResult) -> Self {
        let mut report = Self::new(target, status);
        report.tier = Some(result.tier);
        report.detail = result.detail.clone();
        report
    }

    pub fn is_success(&self) -> bool {
        self.status == ReportStatus::Success
    }
}

/// Collaborators, injected.
pub struct OrchestratorParts {
    pub tier1: Arc<dyn TierFetcher>,
    /// `None` when the browser tier is disabled.
    pub tier2: Option<Arc<dyn TierFetcher>>,
    pub blocks: Arc<BlockStore>,
    pub metrics: Arc<MetricsRecorder>,
    pub failures: Arc<dyn FailureSink>,
    pub cache: Arc<dyn Cache>,
}

/// Policy knobs that are not owned by a collaborator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub workers: usize,
    pub browser_only_hosts: Vec<String>,
    pub snippet_chars: usize,
    pub value_ttl: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            workers: config.workers,
            browser_only_hosts: config.browser.browser_only_hosts.clone(),
            snippet_chars: config.failure_log.snippet_chars,
            value_ttl: Duration::from_secs(config.cache.value_ttl_secs),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Which tiers one request may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Plan {
    tier1: bool,
    tier2: bool,
}

pub struct Orchestrator {
    tier1: Arc<dyn TierFetcher>,
    tier2: Option<Arc<dyn TierFetcher>>,
    blocks: Arc<BlockStore>,
    metrics: Arc<MetricsRecorder>,
    failures: Arc<dyn FailureSink>,
    cache: Arc<dyn Cache>,
    settings: OrchestratorSettings,
    pool: Option<Arc<SessionPool>>,
}

impl Orchestrator {
    pub fn new(parts: OrchestratorParts, settings: OrchestratorSettings) -> Self {
        Self {
            tier1: parts.tier1,
            tier2: parts.tier2,
            blocks: parts.blocks,
            metrics: parts.metrics,
            failures: parts.failures,
            cache: parts.cache,
            settings,
            pool: None,
        }
    }

    /// Wire up the production engine from configuration.
    pub async fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;

        let cache = cache::connect(&config.cache).await?;
        let inspector = Arc::new(PageInspector::from_config(config)?);
        let html_ttl = Duration::from_secs(config.cache.html_ttl_secs);

        let tier1: Arc<dyn TierFetcher> = Arc::new(HttpFetcher::new(
            &config.http,
            html_ttl,
            Arc::clone(&inspector),
            Arc::clone(&cache),
        )?);

        let pool = config.browser.enabled.then(|| {
            Arc::new(SessionPool::new(
                chromium_launcher(config),
                config.browser.max_sessions,
                Duration::from_millis(config.browser.checkout_timeout_ms),
            ))
        });
        let tier2 = pool.as_ref().map(|pool| {
            Arc::new(BrowserFetcher::new(
                &config.browser,
                html_ttl,
                Arc::clone(pool),
                Arc::clone(&inspector),
                Arc::clone(&cache),
            )) as Arc<dyn TierFetcher>
        });

        let failures: Arc<dyn FailureSink> =
            Arc::new(JsonlFailureLog::from_config(&config.failure_log)?);
        let blocks =
            Arc::new(BlockStore::new(config.backoff.clone()).with_cache(Arc::clone(&cache)));

        let mut orchestrator = Self::new(
            OrchestratorParts {
                tier1,
                tier2,
                blocks,
                metrics: Arc::new(MetricsRecorder::new()),
                failures,
                cache,
            },
            OrchestratorSettings::from_config(config),
        );
        orchestrator.pool = pool;
        Ok(orchestrator)
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    pub fn blocks(&self) -> &Arc<BlockStore> {
        &self.blocks
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// Close pooled browser sessions and the browser.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(pool) = &self.pool {
            pool.shutdown()
                .await
                .map_err(|e| RankwatchError::Browser(format!("{e:#}")))?;
        }
        Ok(())
    }

    // ── Caller-facing API ───────────────────────────────────────────────

    /// Resolve the rank of one URL. The returned value is fresh or absent,
    /// never the cached last-known rank.
    pub async fn extract_rank(
        &self,
        url: &str,
        preference: TierPreference,
    ) -> Result<Option<RankValue>> {
        Ok(self.resolve(url, preference).await?.rank)
    }

    pub async fn resolve(&self, url: &str, preference: TierPreference) -> Result<RankReport> {
        let target = Target::parse(url)?;
        self.resolve_target(&target, preference).await
    }

    /// Resolve many URLs through the bounded worker pool. Results arrive in
    /// completion order.
    pub fn resolve_stream<'a>(
        &'a self,
        urls: Vec<String>,
        preference: TierPreference,
    ) -> impl Stream<Item = (String, Result<RankReport>)> + 'a {
        stream::iter(urls)
            .map(move |url| async move {
                let report = self.resolve(&url, preference).await;
                (url, report)
            })
            .buffer_unordered(self.settings.workers.max(1))
    }

    pub async fn resolve_many(
        &self,
        urls: Vec<String>,
        preference: TierPreference,
    ) -> Vec<(String, Result<RankReport>)> {
        self.resolve_stream(urls, preference).collect().await
    }

    // ── State machine ───────────────────────────────────────────────────

    pub async fn resolve_target(
        &self,
        target: &Target,
        preference: TierPreference,
    ) -> Result<RankReport> {
        let start = Instant::now();

        if let Some(state) = self.blocks.block_state(target).await {
            tracing::info!(
                "skipping {target}: cooling down until {}",
                state.blocked_until.to_rfc3339()
            );
            let mut report = RankReport::new(target, ReportStatus::CoolingDown);
            report.detail = state.reason.clone();
            report.blocked_until = Some(state.blocked_until);
            return Ok(self.finish(report, start).await);
        }

        let plan = self.plan(target, preference)?;
        let mut retried = false;
        // A Tier-1 block verdict stands unless Tier-2 comes back with a rank.
        let mut tier1_block = None;

        if plan.tier1 {
            let result = self.tier1.fetch(target).await?;
            retried |= result.retried;

            match result.outcome {
                FetchOutcome::Success => {
                    let report = self.clean_page(target, &result).await;
                    return Ok(self.finish_with(report, retried, start).await);
                }
                outcome if plan.tier2 => {
                    tracing::info!(
                        "tier1 {} for {target}, escalating to tier2",
                        outcome.as_str()
                    );
                    self.log_failure(target, &result, None);
                    if outcome.is_block() {
                        tier1_block = Some(result);
                    }
                }
                _ => {
                    let report = self.terminal_failure(target, &result).await;
                    return Ok(self.finish_with(report, retried, start).await);
                }
            }
        }

        let tier2 = self.tier2.as_ref().ok_or_else(|| {
            RankwatchError::Config("browser tier requested but disabled".into())
        })?;
        let result = tier2.fetch(target).await?;
        retried |= result.retried;

        let mut report = match result.outcome {
            FetchOutcome::Success => self.clean_page(target, &result).await,
            _ => self.terminal_failure(target, &result).await,
        };
        if report.status != ReportStatus::Success && report.blocked_until.is_none() {
            if let Some(blocked) = &tier1_block {
                tracing::warn!(
                    "{target}: tier2 {} after a tier1 {}, keeping the block",
                    report.status,
                    blocked.outcome.as_str()
                );
                report.blocked_until = Some(self.escalate_block(target, blocked).await);
            }
        }
        Ok(self.finish_with(report, retried, start).await)
    }

    fn plan(&self, target: &Target, preference: TierPreference) -> Result<Plan> {
        let browser_only = self
            .settings
            .browser_only_hosts
            .iter()
            .any(|host| target.host_matches(host));

        let mut plan = match preference {
            TierPreference::HttpOnly => Plan {
                tier1: true,
                tier2: false,
            },
            TierPreference::BrowserOnly => Plan {
                tier1: false,
                tier2: true,
            },
            TierPreference::Auto => Plan {
                tier1: !browser_only,
                tier2: true,
            },
        };
        plan.tier2 &= self.tier2.is_some();

        if !plan.tier1 && !plan.tier2 {
            return Err(RankwatchError::Config(format!(
                "{target} needs the browser tier, which is disabled"
            )));
        }
        Ok(plan)
    }

    /// A page the classifier called clean.
    async fn clean_page(&self, target: &Target, result: &FetchResult) -> RankReport {
        match result.rank {
            Some(rank) => {
                self.blocks.record_success(target).await;
                self.remember_rank(target, rank).await;
                tracing::info!("{target}: rank {rank} via {}", result.tier);

                let mut report = RankReport::from_fetch(target, ReportStatus::Success, result);
                report.rank = Some(rank);
                report.last_known = Some(rank);
                report
            }
            None => {
                // A parsing gap, not a block.
                tracing::info!("{target}: clean page without a rank via {}", result.tier);
                let mut result = result.clone();
                result.detail = Some("rank_not_found".into());
                self.log_failure(target, &result, None);
                RankReport::from_fetch(target, ReportStatus::RankNotFound, &result)
            }
        }
    }

    /// A failed final tier attempt. Block verdicts escalate the cooldown;
    /// network conditions do not.
    async fn terminal_failure(&self, target: &Target, result: &FetchResult) -> RankReport {
        let status = ReportStatus::from(result.outcome);
        let mut report = RankReport::from_fetch(target, status, result);

        if result.outcome.is_block() {
            let blocked_until = self.escalate_block(target, result).await;
            report.blocked_until = Some(blocked_until);
            self.log_failure(target, result, Some(blocked_until));
        } else {
            self.log_failure(target, result, None);
        }
        report
    }

    /// Record a block verdict from `result` against the target.
    async fn escalate_block(&self, target: &Target, result: &FetchResult) -> DateTime<Utc> {
        let reason = result
            .detail
            .clone()
            .unwrap_or_else(|| result.outcome.as_str().to_string());
        let state = self
            .blocks
            .record_block(target, &format!("{}: {reason}", result.tier))
            .await;
        state.blocked_until
    }

    async fn finish_with(
        &self,
        mut report: RankReport,
        retried: bool,
        start: Instant,
    ) -> RankReport {
        report.retried = retried;
        self.finish(report, start).await
    }

    /// Fill timing and last-known rank, then record the one metrics update.
    async fn finish(&self, mut report: RankReport, start: Instant) -> RankReport {
        let elapsed = start.elapsed();
        report.duration_ms = elapsed.as_millis() as u64;
        if report.last_known.is_none() {
            report.last_known = self.last_known(&report.url).await;
        }

        let reason = match report.status {
            ReportStatus::Success => None,
            ReportStatus::RankNotFound | ReportStatus::CoolingDown => Some(report.status.as_str()),
            _ => report.detail.as_deref(),
        };
        self.metrics
            .record(elapsed, report.status, report.tier, report.retried, reason);
        report
    }

    fn log_failure(
        &self,
        target: &Target,
        result: &FetchResult,
        retry_after: Option<DateTime<Utc>>,
    ) {
        let failure_type = match result.detail.as_deref() {
            Some("rank_not_found") => "rank_not_found",
            _ => result.outcome.as_str(),
        };
        let mut record = FailureRecord::new(
            target.url(),
            result.tier,
            failure_type,
            result.detail.clone().unwrap_or_default(),
        );
        if let Some(html) = &result.html {
            record = record.with_page(html, self.settings.snippet_chars);
        }
        if let Some(at) = retry_after {
            record = record.with_retry_after(at);
        }
        if let Err(e) = self.failures.append(&record) {
            tracing::warn!("failed to write failure log: {e}");
        }
    }

    async fn remember_rank(&self, target: &Target, rank: RankValue) {
        let key = Namespace::Rank.key(target);
        if let Err(e) = self
            .cache
            .set(&key, &rank.to_string(), self.settings.value_ttl)
            .await
        {
            tracing::warn!("failed to store last known rank for {target}: {e}");
        }
    }

    async fn last_known(&self, url: &str) -> Option<RankValue> {
        let key = format!("{}{url}", Namespace::Rank.prefix());
        match self.cache.get(&key).await {
            Ok(value) => value.as_deref().and_then(RankValue::parse),
            Err(e) => {
                tracing::debug!("last known rank unavailable for {url}: {e}");
                None
            }
        }
    }
}

fn chromium_launcher(config: &EngineConfig) -> RendererLauncher {
    let browser = config.browser.clone();
    let user_agent = config.http.user_agent.clone();
    Box::new(move || {
        let browser = browser.clone();
        let user_agent = user_agent.clone();
        Box::pin(async move {
            let renderer = ChromiumRenderer::launch(&browser, &user_agent).await?;
            Ok(Arc::new(renderer) as Arc<dyn Renderer>)
        })
    })
}
