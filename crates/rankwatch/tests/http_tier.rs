// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tier-1 fetcher against a local mock server.

mod common;

use common::{captcha_page, ranked_page, unranked_page};
use rankwatch::cache::{Cache, MemoryCache, Namespace};
use rankwatch::config::HttpConfig;
use rankwatch::fetch::http::HttpFetcher;
use rankwatch::fetch::TierFetcher;
use rankwatch::{EngineConfig, FetchOutcome, PageInspector, Target};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PRODUCT_PATH: &str = "/dp/B0TEST0001/";

// ── helpers ──

fn fast_config() -> HttpConfig {
    HttpConfig {
        timeout_ms: 2_000,
        pre_request_delay_ms: 0,
        retry_backoff_ms: 10,
        ..HttpConfig::default()
    }
}

fn fetcher_with(config: HttpConfig, cache: Arc<MemoryCache>) -> HttpFetcher {
    let inspector = PageInspector::from_config(&EngineConfig::default()).unwrap();
    HttpFetcher::new(&config, Duration::from_secs(60), Arc::new(inspector), cache).unwrap()
}

fn target(server: &MockServer) -> Target {
    Target::parse(&format!("{}/dp/B0TEST0001", server.uri())).unwrap()
}

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html; charset=utf-8")
        .set_body_string(body)
}

// ── tests ──

#[tokio::test]
async fn test_clean_page_yields_rank_and_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PRODUCT_PATH))
        .respond_with(html(ranked_page("5,678")))
        .expect(1)
        .mount(&server)
        .await;

    let cache = Arc::new(MemoryCache::new());
    let fetcher = fetcher_with(fast_config(), Arc::clone(&cache));
    let target = target(&server);

    let first = fetcher.fetch(&target).await.unwrap();
    assert_eq!(first.outcome, FetchOutcome::Success);
    assert_eq!(first.rank.map(|r| r.get()), Some(5678));
    assert!(!first.retried);

    // Second fetch is served from the HTML cache; the mock expects one hit.
    let second = fetcher.fetch(&target).await.unwrap();
    assert_eq!(second.detail.as_deref(), Some("cache_hit"));
    assert_eq!(second.rank.map(|r| r.get()), Some(5678));

    let key = Namespace::Html.key(&target);
    assert!(cache.get(&key).await.unwrap().is_some());
}

#[tokio::test]
async fn test_sends_fixed_browser_headers() {
    let server = MockServer::start().await;
    let config = fast_config();
    Mock::given(method("GET"))
        .and(path(PRODUCT_PATH))
        .and(header_exists("user-agent"))
        .and(header_exists("accept-language"))
        .and(header("upgrade-insecure-requests", "1"))
        .respond_with(html(ranked_page("12")))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = fetcher_with(config, Arc::new(MemoryCache::new()));
    let result = fetcher.fetch(&target(&server)).await.unwrap();
    assert!(result.is_success());
}

#[tokio::test]
async fn test_503_is_retried_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PRODUCT_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(PRODUCT_PATH))
        .respond_with(html(ranked_page("1,726")))
        .mount(&server)
        .await;

    let fetcher = fetcher_with(fast_config(), Arc::new(MemoryCache::new()));
    let result = fetcher.fetch(&target(&server)).await.unwrap();

    assert_eq!(result.outcome, FetchOutcome::Success);
    assert!(result.retried);
    assert_eq!(result.rank.map(|r| r.get()), Some(1726));
}

#[tokio::test]
async fn test_persistent_500_is_a_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PRODUCT_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let fetcher = fetcher_with(fast_config(), Arc::new(MemoryCache::new()));
    let result = fetcher.fetch(&target(&server)).await.unwrap();

    assert_eq!(result.outcome, FetchOutcome::NetworkError);
    assert_eq!(result.detail.as_deref(), Some("http_500"));
    assert!(result.retried);
}

#[tokio::test]
async fn test_403_and_429_are_blocks() {
    for code in [403u16, 429] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(code).set_body_string("denied"))
            .mount(&server)
            .await;

        let fetcher = fetcher_with(fast_config(), Arc::new(MemoryCache::new()));
        let result = fetcher.fetch(&target(&server)).await.unwrap();

        assert_eq!(result.outcome, FetchOutcome::Blocked);
        assert_eq!(result.detail, Some(format!("http_{code}")));
        assert_eq!(result.page_length, Some("denied".len()));
    }
}

#[tokio::test]
async fn test_404_is_not_a_block() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = fetcher_with(fast_config(), Arc::new(MemoryCache::new()));
    let result = fetcher.fetch(&target(&server)).await.unwrap();

    assert_eq!(result.outcome, FetchOutcome::NetworkError);
    assert!(!result.outcome.is_block());
}

#[tokio::test]
async fn test_captcha_page_is_classified_and_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PRODUCT_PATH))
        .respond_with(html(captcha_page()))
        .mount(&server)
        .await;

    let cache = Arc::new(MemoryCache::new());
    let fetcher = fetcher_with(fast_config(), Arc::clone(&cache));
    let target = target(&server);
    let result = fetcher.fetch(&target).await.unwrap();

    assert_eq!(result.outcome, FetchOutcome::Captcha);
    assert!(result.rank.is_none());
    assert!(cache.get(&Namespace::Html.key(&target)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_clean_page_without_rank() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PRODUCT_PATH))
        .respond_with(html(unranked_page()))
        .mount(&server)
        .await;

    let fetcher = fetcher_with(fast_config(), Arc::new(MemoryCache::new()));
    let result = fetcher.fetch(&target(&server)).await.unwrap();

    assert_eq!(result.outcome, FetchOutcome::Success);
    assert!(result.rank.is_none());
    assert_eq!(result.detail.as_deref(), Some("page_indicators"));
}

#[tokio::test]
async fn test_short_page_is_blocked() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html("<html><body>Oops</body></html>".to_string()))
        .mount(&server)
        .await;

    let fetcher = fetcher_with(fast_config(), Arc::new(MemoryCache::new()));
    let result = fetcher.fetch(&target(&server)).await.unwrap();

    assert_eq!(result.outcome, FetchOutcome::Blocked);
    assert_eq!(result.detail.as_deref(), Some("page_too_short"));
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html(ranked_page("9")).set_delay(Duration::from_millis(800)))
        .mount(&server)
        .await;

    let config = HttpConfig {
        timeout_ms: 100,
        ..fast_config()
    };
    let fetcher = fetcher_with(config, Arc::new(MemoryCache::new()));
    let result = fetcher.fetch(&target(&server)).await.unwrap();

    assert_eq!(result.outcome, FetchOutcome::Timeout);
    assert!(result.outcome.is_transient());
}

#[tokio::test]
async fn test_stale_blocked_cache_entry_is_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PRODUCT_PATH))
        .respond_with(html(ranked_page("77")))
        .expect(1)
        .mount(&server)
        .await;

    let cache = Arc::new(MemoryCache::new());
    let target = target(&server);
    cache
        .set(&Namespace::Html.key(&target), &captcha_page(), Duration::from_secs(60))
        .await
        .unwrap();

    let fetcher = fetcher_with(fast_config(), Arc::clone(&cache));
    let result = fetcher.fetch(&target).await.unwrap();

    assert_eq!(result.rank.map(|r| r.get()), Some(77));
    assert_ne!(result.detail.as_deref(), Some("cache_hit"));
}
