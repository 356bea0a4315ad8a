// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tier fetchers.
//!
//! Both tiers return a [`FetchResult`] for every ordinary failure (timeouts,
//! HTTP error codes, classifier verdicts). `Err` is reserved for
//! configuration-class problems such as a browser that cannot be launched.

pub mod browser;
pub mod http;

pub use browser::BrowserFetcher;
pub use http::HttpFetcher;

use crate::error::Result;
use crate::target::Target;
use crate::types::{FetchResult, Tier};
use async_trait::async_trait;

#[async_trait]
pub trait TierFetcher: Send + Sync {
    fn tier(&self) -> Tier;

    async fn fetch(&self, target: &Target) -> Result<FetchResult>;
}

pub(crate) fn elapsed_ms(start: std::time::Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
