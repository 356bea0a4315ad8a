// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures: synthetic pages and scripted collaborators.

#![allow(dead_code)]

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use rankwatch::fetch::TierFetcher;
use rankwatch::renderer::{NavigationResult, NavigationTimeout, RenderContext, Renderer};
use rankwatch::{FetchOutcome, FetchResult, Target, Tier};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Pages ──

/// A product page well above every classifier threshold.
pub fn product_page(rank_line: &str) -> String {
    let mut html = String::from(
        "<html><head><title>The Quiet Harbour (Kindle Edition)</title></head><body>\
         <div id=\"dp\" data-asin=\"B0TEST0001\">\
         <span class=\"a-price\"><span>$4.99</span></span>\
         <input id=\"add-to-cart-button\" value=\"Add to Cart\">\
         <a id=\"buy-now\">Buy Now</a>\
         <h2>Product details</h2>",
    );
    html.push_str(&format!(
        "<div id=\"detailBulletsWrapper_feature_div\"><ul>\
         <li><span class=\"a-text-bold\">Best Sellers Rank:</span> {rank_line}</li>\
         </ul></div>"
    ));
    while html.len() < 8_000 {
        html.push_str("<p class=\"review\">Customer reviews mention the pacing and the ending.</p>");
    }
    html.push_str("</div></body></html>");
    html
}

pub fn ranked_page(rank: &str) -> String {
    product_page(&format!("#{rank} in Kindle Store (See Top 100 in Kindle Store)"))
}

/// A clean product page with no rank section at all.
pub fn unranked_page() -> String {
    product_page("")
}

pub fn captcha_page() -> String {
    let mut html = String::from(
        "<html><head><title>Robot Check</title></head><body>\
         <h4>Enter the characters you see below</h4>\
         <p>Sorry, we just need to make sure you're not a robot.</p>\
         <form method=\"get\" action=\"/errors/validateCaptcha\">\
         <input id=\"captchacharacters\" name=\"field-keywords\" type=\"text\">\
         <button type=\"submit\">Continue</button></form>",
    );
    while html.len() < 2_000 {
        html.push_str("<div class=\"a-row\"><!-- spacer --></div>");
    }
    html.push_str("</body></html>");
    html
}

pub fn interstitial_page() -> String {
    let mut html = String::from(
        "<html><body><div class=\"a-box\"><p>Click the button below to continue shopping</p>\
         <button class=\"a-button-text\">Continue shopping</button></div>",
    );
    while html.len() < 1_500 {
        html.push_str("<div class=\"a-row\"></div>");
    }
    html.push_str("</body></html>");
    html
}

// ── Scripted tier fetcher ──

/// Replays queued results. When the queue runs dry it repeats `fallback`.
pub struct ScriptedFetcher {
    tier: Tier,
    script: Mutex<VecDeque<FetchResult>>,
    fallback: Option<FetchResult>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new(tier: Tier, script: Vec<FetchResult>) -> Arc<Self> {
        Arc::new(Self {
            tier,
            script: Mutex::new(script.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn always(result: FetchResult) -> Arc<Self> {
        Arc::new(Self {
            tier: result.tier,
            script: Mutex::new(VecDeque::new()),
            fallback: Some(result),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TierFetcher for ScriptedFetcher {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn fetch(&self, _target: &Target) -> rankwatch::Result<FetchResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        Ok(next
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| {
                FetchResult::new(self.tier, FetchOutcome::NetworkError).with_detail("script_exhausted")
            }))
    }
}

/// Fetch results as a tier would produce them.
pub fn clean(tier: Tier, rank: Option<u64>) -> FetchResult {
    let html = match rank {
        Some(r) => ranked_page(&r.to_string()),
        None => unranked_page(),
    };
    FetchResult::new(tier, FetchOutcome::Success)
        .with_page(html, rank.and_then(rankwatch::RankValue::new))
        .with_detail(if rank.is_some() { "rank_found" } else { "page_indicators" })
}

pub fn captcha(tier: Tier) -> FetchResult {
    FetchResult::new(tier, FetchOutcome::Captcha)
        .with_page(captcha_page(), None)
        .with_detail("captcha_phrase")
}

pub fn blocked(tier: Tier) -> FetchResult {
    FetchResult::new(tier, FetchOutcome::Blocked).with_detail("http_403")
}

pub fn network_error(tier: Tier) -> FetchResult {
    FetchResult::new(tier, FetchOutcome::NetworkError).with_detail("connect_error")
}

// ── Scripted browser ──

#[derive(Debug, Clone, Copy)]
pub enum NavStep {
    Status(u16),
    Timeout,
    Fail,
}

/// Shared script for every context a [`ScriptedRenderer`] creates.
#[derive(Clone, Default)]
pub struct BrowserScript {
    steps: Arc<Mutex<VecDeque<NavStep>>>,
    pages: Arc<Mutex<VecDeque<String>>>,
    pub navigations: Arc<AtomicUsize>,
    pub contexts: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
    pub clicks: Arc<Mutex<Vec<String>>>,
    /// When set, every HTML read hangs forever.
    pub hang_reads: Arc<AtomicBool>,
}

impl BrowserScript {
    /// `steps` are consumed per navigation (then 200 forever); `pages` per
    /// HTML read, with the last page repeating.
    pub fn new(steps: Vec<NavStep>, pages: Vec<String>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into())),
            pages: Arc::new(Mutex::new(pages.into())),
            ..Self::default()
        }
    }

    fn next_step(&self) -> NavStep {
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(NavStep::Status(200))
    }

    fn current_page(&self) -> String {
        let mut pages = self.pages.lock().unwrap();
        if pages.len() > 1 {
            pages.pop_front().unwrap_or_default()
        } else {
            pages.front().cloned().unwrap_or_default()
        }
    }

    pub fn navigations(&self) -> usize {
        self.navigations.load(Ordering::SeqCst)
    }
}

pub struct ScriptedRenderer {
    script: BrowserScript,
}

impl ScriptedRenderer {
    pub fn new(script: BrowserScript) -> Arc<Self> {
        Arc::new(Self { script })
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn new_context(&self) -> AnyResult<Box<dyn RenderContext>> {
        self.script.contexts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedContext {
            script: self.script.clone(),
        }))
    }

    async fn shutdown(&self) -> AnyResult<()> {
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.script.contexts.load(Ordering::SeqCst) - self.script.closed.load(Ordering::SeqCst)
    }
}

struct ScriptedContext {
    script: BrowserScript,
}

#[async_trait]
impl RenderContext for ScriptedContext {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> AnyResult<NavigationResult> {
        self.script.navigations.fetch_add(1, Ordering::SeqCst);
        match self.script.next_step() {
            NavStep::Status(code) => Ok(NavigationResult {
                final_url: url.to_string(),
                status: Some(code),
                load_time_ms: 5,
            }),
            NavStep::Timeout => Err(NavigationTimeout { timeout_ms }.into()),
            NavStep::Fail => Err(anyhow::anyhow!("net::ERR_CONNECTION_RESET")),
        }
    }

    async fn wait_for_idle(&self, _timeout_ms: u64) -> AnyResult<bool> {
        Ok(true)
    }

    async fn scroll_to(&self, _fraction: f64) -> AnyResult<()> {
        Ok(())
    }

    async fn move_pointer(&self, _x: f64, _y: f64) -> AnyResult<()> {
        Ok(())
    }

    async fn click_text(&self, labels: &[&str]) -> AnyResult<bool> {
        let label = labels.first().copied().unwrap_or_default().to_string();
        self.script.clicks.lock().unwrap().push(label);
        Ok(true)
    }

    async fn get_html(&self) -> AnyResult<String> {
        if self.script.hang_reads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self.script.current_page())
    }

    async fn close(self: Box<Self>) -> AnyResult<()> {
        self.script.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
