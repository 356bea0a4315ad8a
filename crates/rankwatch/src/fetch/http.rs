// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tier-1: plain HTTP with a raw-HTML cache.
//!
//! The header set is fixed for the life of the fetcher. A rotating user
//! agent is itself a fingerprint.

use super::{elapsed_ms, TierFetcher};
use crate::cache::{Cache, Namespace};
use crate::classify::PageInspector;
use crate::config::HttpConfig;
use crate::error::{RankwatchError, Result};
use crate::target::Target;
use crate::types::{FetchOutcome, FetchResult, Tier, Verdict};
use async_trait::async_trait;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, UPGRADE_INSECURE_REQUESTS,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

pub struct HttpFetcher {
    client: reqwest::Client,
    inspector: Arc<PageInspector>,
    cache: Arc<dyn Cache>,
    pre_request_delay: Duration,
    retry_backoff: Duration,
    html_ttl: Duration,
}

impl HttpFetcher {
    pub fn new(
        config: &HttpConfig,
        html_ttl: Duration,
        inspector: Arc<PageInspector>,
        cache: Arc<dyn Cache>,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            inspector,
            cache,
            pre_request_delay: Duration::from_millis(config.pre_request_delay_ms),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            html_ttl,
        })
    }

    /// Serve from the HTML cache. Only clean pages are ever cached, so a
    /// cached page that no longer inspects clean is dropped.
    async fn from_cache(&self, target: &Target, start: Instant) -> Option<FetchResult> {
        let key = Namespace::Html.key(target);
        let html = match self.cache.get(&key).await {
            Ok(Some(html)) => html,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("html cache read failed for {target}: {e}");
                return None;
            }
        };

        let (inspection, html) = Arc::clone(&self.inspector).inspect_owned(html).await;
        if inspection.verdict != Verdict::Clean {
            if let Err(e) = self.cache.delete(&key).await {
                tracing::warn!("failed to drop stale html cache entry for {target}: {e}");
            }
            return None;
        }

        tracing::debug!("tier1 cache hit for {target}");
        Some(
            FetchResult::new(Tier::Http, FetchOutcome::Success)
                .with_page(html, inspection.rank)
                .with_detail("cache_hit")
                .with_duration(elapsed_ms(start)),
        )
    }

    fn transport_failure(&self, target: &Target, e: reqwest::Error) -> FetchResult {
        if e.is_timeout() {
            tracing::info!("tier1 timeout for {target}");
            return FetchResult::new(Tier::Http, FetchOutcome::Timeout).with_detail("timeout");
        }
        tracing::info!("tier1 request failed for {target}: {e}");
        let detail = if e.is_connect() {
            "connect_error"
        } else {
            "request_error"
        };
        FetchResult::new(Tier::Http, FetchOutcome::NetworkError).with_detail(detail)
    }
}

#[async_trait]
impl TierFetcher for HttpFetcher {
    fn tier(&self) -> Tier {
        Tier::Http
    }

    async fn fetch(&self, target: &Target) -> Result<FetchResult> {
        let start = Instant::now();

        if let Some(hit) = self.from_cache(target, start).await {
            return Ok(hit);
        }

        if !self.pre_request_delay.is_zero() {
            tokio::time::sleep(self.pre_request_delay).await;
        }

        let mut retried = false;
        let response = loop {
            match self.client.get(target.url()).send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if matches!(status, 500 | 503) && !retried {
                        tracing::info!(
                            "tier1 HTTP {status} for {target}, retrying in {}ms",
                            self.retry_backoff.as_millis()
                        );
                        retried = true;
                        tokio::time::sleep(self.retry_backoff).await;
                        continue;
                    }
                    break resp;
                }
                Err(e) => {
                    return Ok(self
                        .transport_failure(target, e)
                        .with_retried(retried)
                        .with_duration(elapsed_ms(start)))
                }
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Ok(self
                    .transport_failure(target, e)
                    .with_retried(retried)
                    .with_duration(elapsed_ms(start)))
            }
        };

        let code = status.as_u16();
        if matches!(code, 403 | 429) {
            tracing::warn!("tier1 refused with HTTP {code} for {target}");
            return Ok(FetchResult::new(Tier::Http, FetchOutcome::Blocked)
                .with_page(body, None)
                .with_detail(format!("http_{code}"))
                .with_retried(retried)
                .with_duration(elapsed_ms(start)));
        }
        if !status.is_success() {
            return Ok(FetchResult::new(Tier::Http, FetchOutcome::NetworkError)
                .with_page(body, None)
                .with_detail(format!("http_{code}"))
                .with_retried(retried)
                .with_duration(elapsed_ms(start)));
        }

        let (inspection, html) = Arc::clone(&self.inspector).inspect_owned(body).await;
        if inspection.verdict == Verdict::Clean {
            let key = Namespace::Html.key(target);
            if let Err(e) = self.cache.set(&key, &html, self.html_ttl).await {
                tracing::warn!("html cache write failed for {target}: {e}");
            }
        }

        Ok(FetchResult::new(Tier::Http, inspection.verdict.into())
            .with_page(html, inspection.rank)
            .with_detail(inspection.reason)
            .with_retried(retried)
            .with_duration(elapsed_ms(start)))
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| RankwatchError::Config(format!("invalid {name} header: {e}")))
}

fn build_client(config: &HttpConfig) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
    headers.insert(
        ACCEPT_LANGUAGE,
        header_value("accept-language", &config.accept_language)?,
    );
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    if let Some(referer) = &config.referer {
        headers.insert(REFERER, header_value("referer", referer)?);
    }

    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms))
        .redirect(reqwest::redirect::Policy::limited(5))
        .user_agent(header_value("user-agent", &config.user_agent)?)
        .default_headers(headers);

    if let Some(proxy) = &config.proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| RankwatchError::Config(format!("invalid http proxy: {e}")))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| RankwatchError::Config(format!("failed to build http client: {e}")))
}
