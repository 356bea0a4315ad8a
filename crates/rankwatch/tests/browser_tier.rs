// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tier-2 fetcher driven through a scripted renderer. No Chromium needed.

mod common;

use common::{
    captcha_page, interstitial_page, ranked_page, unranked_page, BrowserScript, NavStep,
    ScriptedRenderer,
};
use rankwatch::cache::{Cache, MemoryCache, Namespace};
use rankwatch::config::BrowserConfig;
use rankwatch::fetch::{BrowserFetcher, TierFetcher};
use rankwatch::renderer::{NoopRenderer, Renderer, SessionPool};
use rankwatch::{EngineConfig, FetchOutcome, PageInspector, Target};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

// ── helpers ──

fn instant_config() -> BrowserConfig {
    BrowserConfig {
        delay_min_secs: 0.0,
        delay_max_secs: 0.0,
        interaction_pause_min_ms: 0,
        interaction_pause_max_ms: 0,
        retry_backoff_secs: vec![0, 0],
        navigation_timeout_ms: 1_000,
        idle_timeout_ms: 10,
        checkout_timeout_ms: 100,
        ..BrowserConfig::default()
    }
}

struct Rig {
    fetcher: BrowserFetcher,
    pool: Arc<SessionPool>,
    cache: Arc<MemoryCache>,
}

fn rig(renderer: Arc<dyn Renderer>, config: BrowserConfig) -> Rig {
    let inspector = Arc::new(PageInspector::from_config(&EngineConfig::default()).unwrap());
    let cache = Arc::new(MemoryCache::new());
    let pool = Arc::new(SessionPool::with_renderer(
        renderer,
        config.max_sessions,
        Duration::from_millis(config.checkout_timeout_ms),
    ));
    let fetcher = BrowserFetcher::new(
        &config,
        Duration::from_secs(60),
        Arc::clone(&pool),
        inspector,
        cache.clone(),
    );
    Rig {
        fetcher,
        pool,
        cache,
    }
}

fn target() -> Target {
    Target::parse("https://www.amazon.com/dp/B0TEST0001").unwrap()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

// ── tests ──

#[tokio::test]
async fn test_clean_render_is_cached_and_session_reused() {
    let script = BrowserScript::new(vec![], vec![ranked_page("5,678")]);
    let rig = rig(ScriptedRenderer::new(script.clone()), instant_config());
    let target = target();

    let result = rig.fetcher.fetch(&target).await.unwrap();
    assert_eq!(result.outcome, FetchOutcome::Success);
    assert_eq!(result.rank.map(|r| r.get()), Some(5678));
    assert!(!result.retried);

    let cached = rig.cache.get(&Namespace::Html.key(&target)).await.unwrap();
    assert!(cached.is_some());

    rig.fetcher.fetch(&target).await.unwrap();
    assert_eq!(script.contexts.load(Ordering::SeqCst), 1);
    assert_eq!(rig.pool.idle_count(), 1);
}

#[tokio::test]
async fn test_humanized_interaction_expands_details() {
    let script = BrowserScript::new(vec![], vec![unranked_page(), ranked_page("431")]);
    let rig = rig(ScriptedRenderer::new(script.clone()), instant_config());

    let result = rig.fetcher.fetch(&target()).await.unwrap();

    // The rank only appears in the HTML read after interaction.
    assert_eq!(result.rank.map(|r| r.get()), Some(431));
    let clicks = script.clicks.lock().unwrap().clone();
    assert!(clicks.iter().any(|label| label == "see all details"));
}

#[tokio::test]
async fn test_503_follows_backoff_schedule() {
    let script = BrowserScript::new(
        vec![NavStep::Status(503), NavStep::Status(200)],
        vec![ranked_page("12")],
    );
    let rig = rig(ScriptedRenderer::new(script.clone()), instant_config());

    let result = rig.fetcher.fetch(&target()).await.unwrap();

    assert_eq!(result.outcome, FetchOutcome::Success);
    assert!(result.retried);
    assert_eq!(script.navigations(), 2);
}

#[tokio::test]
async fn test_exhausted_schedule_is_a_network_error() {
    let config = BrowserConfig {
        retry_backoff_secs: vec![0],
        ..instant_config()
    };
    let script = BrowserScript::new(
        vec![NavStep::Status(500), NavStep::Status(500), NavStep::Status(500)],
        vec![ranked_page("12")],
    );
    let rig = rig(ScriptedRenderer::new(script.clone()), config);

    let result = rig.fetcher.fetch(&target()).await.unwrap();

    assert_eq!(result.outcome, FetchOutcome::NetworkError);
    assert_eq!(result.detail.as_deref(), Some("http_500"));
    assert!(result.retried);
    assert_eq!(script.navigations(), 2);
}

#[tokio::test]
async fn test_captcha_is_never_retried() {
    let script = BrowserScript::new(vec![], vec![captcha_page()]);
    let rig = rig(ScriptedRenderer::new(script.clone()), instant_config());

    let result = rig.fetcher.fetch(&target()).await.unwrap();
    settle().await;

    assert_eq!(result.outcome, FetchOutcome::Captcha);
    assert!(!result.retried);
    assert_eq!(script.navigations(), 1);
    // The tainted session is closed, not pooled.
    assert_eq!(rig.pool.idle_count(), 0);
    assert_eq!(script.closed.load(Ordering::SeqCst), 1);
    // No interaction on a CAPTCHA page.
    assert!(script.clicks.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_navigation_timeout() {
    let script = BrowserScript::new(vec![NavStep::Timeout], vec![ranked_page("1")]);
    let rig = rig(ScriptedRenderer::new(script.clone()), instant_config());

    let result = rig.fetcher.fetch(&target()).await.unwrap();
    settle().await;

    assert_eq!(result.outcome, FetchOutcome::Timeout);
    assert_eq!(result.detail.as_deref(), Some("navigation_timeout"));
    assert_eq!(rig.pool.idle_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hung_page_read_times_out_and_frees_the_session() {
    let script = BrowserScript::new(vec![], vec![ranked_page("77")]);
    script.hang_reads.store(true, Ordering::SeqCst);
    let rig = rig(ScriptedRenderer::new(script.clone()), instant_config());

    let result = tokio::time::timeout(Duration::from_secs(5), rig.fetcher.fetch(&target()))
        .await
        .expect("fetch must give up on a hung read")
        .unwrap();
    settle().await;

    assert_eq!(result.outcome, FetchOutcome::Timeout);
    assert_eq!(result.detail.as_deref(), Some("page_read_timeout"));
    assert_eq!(rig.pool.idle_count(), 0);
    assert_eq!(script.closed.load(Ordering::SeqCst), 1);

    // The permit came back: the next fetch gets a fresh session.
    script.hang_reads.store(false, Ordering::SeqCst);
    let result = rig.fetcher.fetch(&target()).await.unwrap();
    assert_eq!(result.outcome, FetchOutcome::Success);
    assert_eq!(script.contexts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_navigation_failure_is_a_network_error() {
    let script = BrowserScript::new(vec![NavStep::Fail], vec![ranked_page("1")]);
    let rig = rig(ScriptedRenderer::new(script), instant_config());

    let result = rig.fetcher.fetch(&target()).await.unwrap();
    assert_eq!(result.outcome, FetchOutcome::NetworkError);
    assert_eq!(result.detail.as_deref(), Some("navigation_error"));
}

#[tokio::test]
async fn test_interstitial_is_clicked_through() {
    let script = BrowserScript::new(vec![], vec![interstitial_page(), ranked_page("2,048")]);
    let rig = rig(ScriptedRenderer::new(script.clone()), instant_config());

    let result = rig.fetcher.fetch(&target()).await.unwrap();

    assert_eq!(result.outcome, FetchOutcome::Success);
    assert_eq!(result.rank.map(|r| r.get()), Some(2048));
    let clicks = script.clicks.lock().unwrap().clone();
    assert_eq!(clicks.first().map(String::as_str), Some("continue shopping"));
}

#[tokio::test]
async fn test_stuck_interstitial_is_a_block() {
    let script = BrowserScript::new(vec![], vec![interstitial_page()]);
    let rig = rig(ScriptedRenderer::new(script), instant_config());

    let result = rig.fetcher.fetch(&target()).await.unwrap();

    assert_eq!(result.outcome, FetchOutcome::Blocked);
    assert_eq!(result.detail.as_deref(), Some("continue_shopping_interstitial"));
}

#[tokio::test]
async fn test_missing_browser_is_a_configuration_error() {
    // The engine is up but no context can be opened: a per-request failure.
    let rig = rig(Arc::new(NoopRenderer), instant_config());
    let result = rig.fetcher.fetch(&target()).await.unwrap();
    assert_eq!(result.detail.as_deref(), Some("session_unavailable"));

    // The engine itself cannot start: a configuration error.
    let launcher: rankwatch::renderer::pool::RendererLauncher =
        Box::new(|| Box::pin(async { Err(anyhow::anyhow!("Chromium not found")) }));
    let pool = Arc::new(SessionPool::new(launcher, 1, Duration::from_millis(10)));
    let inspector = Arc::new(PageInspector::from_config(&EngineConfig::default()).unwrap());
    let fetcher = BrowserFetcher::new(
        &instant_config(),
        Duration::from_secs(60),
        pool,
        inspector,
        Arc::new(MemoryCache::new()),
    );

    let err = fetcher.fetch(&target()).await.unwrap_err();
    assert!(err.is_configuration());
}
