// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tier-2: full browser emulation with humanized interaction.
//!
//! Deliberately slow. Every fetch starts with a random pause of tens of
//! seconds, then scrolls and moves the pointer the way a reader would before
//! the rendered HTML is taken. HTTP 500/503 are retried on a fixed backoff
//! schedule; a CAPTCHA is returned at once and never retried.
//!
//! Every session call runs under a time budget. Overrunning one is a
//! `Timeout` and the session is closed rather than pooled.

use super::{elapsed_ms, TierFetcher};
use crate::cache::{Cache, Namespace};
use crate::classify::PageInspector;
use crate::config::BrowserConfig;
use crate::error::{RankwatchError, Result};
use crate::renderer::{NavigationTimeout, PooledSession, SessionPool};
use crate::target::Target;
use crate::types::{FetchOutcome, FetchResult, Tier, Verdict};
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

const INTERSTITIAL_LABELS: &[&str] = &["continue shopping"];
const DETAIL_LABELS: &[&str] = &["see all details", "see more product details"];
/// Pages with the interstitial are tiny; a product page that merely links
/// "Continue shopping" somewhere is not one.
const INTERSTITIAL_MAX_LEN: usize = 20_000;
const SCROLL_STEPS: &[f64] = &[0.2, 0.45, 0.7, 1.0];

/// A session call that outlived its budget. Carries the step name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StepTimeout(&'static str);

pub struct BrowserFetcher {
    pool: Arc<SessionPool>,
    inspector: Arc<PageInspector>,
    cache: Arc<dyn Cache>,
    config: BrowserConfig,
    html_ttl: Duration,
}

impl BrowserFetcher {
    pub fn new(
        config: &BrowserConfig,
        html_ttl: Duration,
        pool: Arc<SessionPool>,
        inspector: Arc<PageInspector>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Self {
            pool,
            inspector,
            cache,
            config: config.clone(),
            html_ttl,
        }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    fn human_delay(&self) -> Duration {
        let (min, max) = (self.config.delay_min_secs, self.config.delay_max_secs);
        if max <= 0.0 {
            return Duration::ZERO;
        }
        let secs = rand::thread_rng().gen_range(min.max(0.0)..=max.max(min));
        Duration::from_secs_f64(secs)
    }

    fn interaction_pause(&self) -> Duration {
        let (min, max) = (
            self.config.interaction_pause_min_ms,
            self.config.interaction_pause_max_ms,
        );
        Duration::from_millis(rand::thread_rng().gen_range(min..=max.max(min)))
    }

    /// Run one session call under `budget_ms`.
    async fn bounded<T>(
        &self,
        step: &'static str,
        budget_ms: u64,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> std::result::Result<anyhow::Result<T>, StepTimeout> {
        tokio::time::timeout(Duration::from_millis(budget_ms), call)
            .await
            .map_err(|_| StepTimeout(step))
    }

    /// Budget for page reads, clicks and pointer work.
    fn step_budget_ms(&self) -> u64 {
        self.config.navigation_timeout_ms
    }

    /// Budget for an idle wait: the renderer's own idle timeout plus slack
    /// for the call itself.
    fn idle_budget_ms(&self) -> u64 {
        self.config
            .idle_timeout_ms
            .saturating_add(self.config.navigation_timeout_ms)
    }

    /// Navigate, retrying 500/503 on the configured schedule.
    async fn navigate(
        &self,
        session: &mut PooledSession,
        target: &Target,
    ) -> std::result::Result<bool, FetchResult> {
        let schedule = &self.config.retry_backoff_secs;
        let mut attempt = 0usize;

        let nav_ms = self.config.navigation_timeout_ms;
        loop {
            let outcome = tokio::time::timeout(
                Duration::from_millis(nav_ms.saturating_mul(2)),
                session.navigate(target.url(), nav_ms),
            )
            .await
            .unwrap_or_else(|_| Err(NavigationTimeout { timeout_ms: nav_ms }.into()));

            match outcome {
                Ok(nav) => match nav.status {
                    Some(code @ (500 | 503)) => {
                        let Some(wait) = schedule.get(attempt) else {
                            return Err(FetchResult::new(Tier::Browser, FetchOutcome::NetworkError)
                                .with_detail(format!("http_{code}"))
                                .with_retried(attempt > 0));
                        };
                        tracing::info!(
                            "tier2 HTTP {code} for {target}, retry {} in {wait}s",
                            attempt + 1
                        );
                        attempt += 1;
                        tokio::time::sleep(Duration::from_secs(*wait)).await;
                    }
                    _ => return Ok(attempt > 0),
                },
                Err(e) if e.downcast_ref::<NavigationTimeout>().is_some() => {
                    tracing::info!("tier2 {e} for {target}");
                    session.discard();
                    return Err(FetchResult::new(Tier::Browser, FetchOutcome::Timeout)
                        .with_detail("navigation_timeout")
                        .with_retried(attempt > 0));
                }
                Err(e) => {
                    tracing::info!("tier2 navigation failed for {target}: {e:#}");
                    session.discard();
                    return Err(FetchResult::new(Tier::Browser, FetchOutcome::NetworkError)
                        .with_detail("navigation_error")
                        .with_retried(attempt > 0));
                }
            }
        }
    }

    /// Click through a "Continue shopping" interstitial once. `Ok(None)`
    /// when the interstitial cannot be passed.
    async fn pass_interstitial(
        &self,
        session: &PooledSession,
        html: String,
    ) -> std::result::Result<Option<String>, StepTimeout> {
        if !is_interstitial(&html) {
            return Ok(Some(html));
        }
        tracing::info!("tier2 hit continue-shopping interstitial");

        let clicked = self
            .bounded("click", self.step_budget_ms(), session.click_text(INTERSTITIAL_LABELS))
            .await?;
        match clicked {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(e) => {
                tracing::debug!("interstitial click failed: {e:#}");
                return Ok(None);
            }
        }

        let idle = self
            .bounded(
                "idle_wait",
                self.idle_budget_ms(),
                session.wait_for_idle(self.config.idle_timeout_ms),
            )
            .await?;
        if let Err(e) = idle {
            tracing::debug!("idle wait after interstitial failed: {e:#}");
        }

        match self
            .bounded("page_read", self.step_budget_ms(), session.get_html())
            .await?
        {
            Ok(html) => Ok((!is_interstitial(&html)).then_some(html)),
            Err(e) => {
                tracing::debug!("page read after interstitial failed: {e:#}");
                Ok(None)
            }
        }
    }

    /// Pointer movement and incremental scrolling, expanding the details
    /// section on the way down.
    async fn humanize(&self, session: &PooledSession) -> std::result::Result<(), StepTimeout> {
        let budget = self.step_budget_ms();
        let mut expanded = false;
        for &fraction in SCROLL_STEPS {
            let (x, y) = {
                let mut rng = rand::thread_rng();
                (rng.gen_range(80.0..1200.0), rng.gen_range(80.0..650.0))
            };
            if let Err(e) = self
                .bounded("pointer", budget, session.move_pointer(x, y))
                .await?
            {
                tracing::debug!("pointer move failed: {e:#}");
            }
            if let Err(e) = self
                .bounded("scroll", budget, session.scroll_to(fraction))
                .await?
            {
                tracing::debug!("scroll to {fraction} failed: {e:#}");
            }
            tokio::time::sleep(self.interaction_pause()).await;

            if !expanded && fraction >= 0.45 {
                expanded = match self
                    .bounded("click", budget, session.click_text(DETAIL_LABELS))
                    .await?
                {
                    Ok(clicked) => clicked,
                    Err(e) => {
                        tracing::debug!("details click failed: {e:#}");
                        false
                    }
                };
                if expanded {
                    tracing::debug!("expanded product details");
                    tokio::time::sleep(self.interaction_pause()).await;
                }
            }
        }
        Ok(())
    }
}

/// A step timeout. The session is in an unknown state and is not reused.
fn step_timed_out(
    session: &mut PooledSession,
    target: &Target,
    StepTimeout(step): StepTimeout,
    retried: bool,
    start: Instant,
) -> FetchResult {
    tracing::info!("tier2 {step} timed out for {target}");
    session.discard();
    FetchResult::new(Tier::Browser, FetchOutcome::Timeout)
        .with_detail(format!("{step}_timeout"))
        .with_retried(retried)
        .with_duration(elapsed_ms(start))
}

fn is_interstitial(html: &str) -> bool {
    html.len() < INTERSTITIAL_MAX_LEN && html.to_lowercase().contains("continue shopping")
}

#[async_trait]
impl TierFetcher for BrowserFetcher {
    fn tier(&self) -> Tier {
        Tier::Browser
    }

    async fn fetch(&self, target: &Target) -> Result<FetchResult> {
        let start = Instant::now();

        // A browser that cannot start is a configuration problem, not a
        // property of this target.
        self.pool
            .engine()
            .await
            .map_err(|e| RankwatchError::Browser(format!("{e:#}")))?;

        let delay = self.human_delay();
        tracing::info!("tier2 fetching {target} after {:.1}s", delay.as_secs_f64());
        tokio::time::sleep(delay).await;

        let mut session = match self.pool.checkout().await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("tier2 could not open a session: {e:#}");
                return Ok(FetchResult::new(Tier::Browser, FetchOutcome::NetworkError)
                    .with_detail("session_unavailable")
                    .with_duration(elapsed_ms(start)));
            }
        };

        let retried = match self.navigate(&mut session, target).await {
            Ok(retried) => retried,
            Err(failure) => return Ok(failure.with_duration(elapsed_ms(start))),
        };

        let idle = self
            .bounded(
                "idle_wait",
                self.idle_budget_ms(),
                session.wait_for_idle(self.config.idle_timeout_ms),
            )
            .await;
        match idle {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => tracing::debug!("tier2 network never settled for {target}, continuing"),
            Ok(Err(e)) => tracing::debug!("tier2 idle wait failed for {target}: {e:#}"),
            Err(timeout) => {
                return Ok(step_timed_out(&mut session, target, timeout, retried, start));
            }
        }

        let read = self
            .bounded("page_read", self.step_budget_ms(), session.get_html())
            .await;
        let read = match read {
            Ok(read) => read,
            Err(timeout) => {
                return Ok(step_timed_out(&mut session, target, timeout, retried, start));
            }
        };
        let html = match read {
            Ok(html) => html,
            Err(e) => {
                tracing::info!("tier2 could not read page for {target}: {e:#}");
                session.discard();
                return Ok(FetchResult::new(Tier::Browser, FetchOutcome::NetworkError)
                    .with_detail("read_error")
                    .with_retried(retried)
                    .with_duration(elapsed_ms(start)));
            }
        };

        let passed = self.pass_interstitial(&session, html).await;
        let passed = match passed {
            Ok(passed) => passed,
            Err(timeout) => {
                return Ok(step_timed_out(&mut session, target, timeout, retried, start));
            }
        };
        let html = match passed {
            Some(html) => html,
            None => {
                session.discard();
                return Ok(FetchResult::new(Tier::Browser, FetchOutcome::Blocked)
                    .with_detail("continue_shopping_interstitial")
                    .with_retried(retried)
                    .with_duration(elapsed_ms(start)));
            }
        };

        // Judge the first render before interacting: a CAPTCHA is final.
        let (first, html) = Arc::clone(&self.inspector).inspect_owned(html).await;
        if first.verdict == Verdict::Captcha {
            tracing::warn!("tier2 CAPTCHA for {target}");
            session.discard();
            return Ok(FetchResult::new(Tier::Browser, FetchOutcome::Captcha)
                .with_page(html, None)
                .with_detail(first.reason)
                .with_retried(retried)
                .with_duration(elapsed_ms(start)));
        }

        let humanized = self.humanize(&session).await;
        if let Err(timeout) = humanized {
            return Ok(step_timed_out(&mut session, target, timeout, retried, start));
        }
        let reread = self
            .bounded("page_read", self.step_budget_ms(), session.get_html())
            .await;
        let html = match reread {
            Ok(Ok(expanded)) => expanded,
            Ok(Err(e)) => {
                tracing::debug!("tier2 re-read failed for {target}, keeping first render: {e:#}");
                html
            }
            Err(timeout) => {
                return Ok(step_timed_out(&mut session, target, timeout, retried, start));
            }
        };
        let (inspection, html) = Arc::clone(&self.inspector).inspect_owned(html).await;

        match inspection.verdict {
            Verdict::Clean => {
                let key = Namespace::Html.key(target);
                if let Err(e) = self.cache.set(&key, &html, self.html_ttl).await {
                    tracing::warn!("html cache write failed for {target}: {e}");
                }
            }
            Verdict::Blocked | Verdict::Captcha => session.discard(),
        }

        Ok(FetchResult::new(Tier::Browser, inspection.verdict.into())
            .with_page(html, inspection.rank)
            .with_detail(inspection.reason)
            .with_retried(retried)
            .with_duration(elapsed_ms(start)))
    }
}
