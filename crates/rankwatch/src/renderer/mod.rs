// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Renderer abstraction for browser-based page fetching.
//!
//! Defines the `Renderer` and `RenderContext` traits that abstract over
//! the browser engine (currently Chromium via chromiumoxide). The Tier-2
//! fetcher only ever talks to these traits, so tests drive it with scripted
//! fakes.

pub mod chromium;
pub mod pool;

pub use pool::{PooledSession, SessionPool};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// HTTP status of the main document, when the engine exposes it.
    pub status: Option<u16>,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// Returned (inside `anyhow::Error`) when a navigation exceeds its budget.
#[derive(Debug, Clone, Copy)]
pub struct NavigationTimeout {
    pub timeout_ms: u64,
}

impl fmt::Display for NavigationTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "navigation timed out after {}ms", self.timeout_ms)
    }
}

impl std::error::Error for NavigationTimeout {}

/// A browser engine that can create rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new browser context (tab) with stealth setup applied.
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently active contexts.
    fn active_contexts(&self) -> usize;
}

/// A single browser context (tab).
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate to a URL. Exceeding `timeout_ms` yields [`NavigationTimeout`].
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// Wait until the network has been quiet for a moment. `Ok(false)` when
    /// the budget ran out first.
    async fn wait_for_idle(&self, timeout_ms: u64) -> Result<bool>;
    /// Scroll to a fraction (0.0..=1.0) of the document height.
    async fn scroll_to(&self, fraction: f64) -> Result<()>;
    /// Move the pointer to viewport coordinates.
    async fn move_pointer(&self, x: f64, y: f64) -> Result<()>;
    /// Click the first visible control whose text matches one of `labels`
    /// (case-insensitive). Returns whether anything was clicked.
    async fn click_text(&self, labels: &[&str]) -> Result<bool>;
    /// Get the full page HTML.
    async fn get_html(&self) -> Result<String>;
    /// Close this context.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// An engine that is running but can never open a context.
pub struct NoopRenderer;

#[async_trait]
impl Renderer for NoopRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        Err(anyhow::anyhow!("browser not available, HTTP-only mode"))
    }
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
    fn active_contexts(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_renderer_refuses_contexts() {
        let r = NoopRenderer;
        assert!(r.new_context().await.is_err());
        assert_eq!(r.active_contexts(), 0);
    }

    #[test]
    fn test_navigation_timeout_downcasts() {
        let err = anyhow::Error::new(NavigationTimeout { timeout_ms: 500 });
        assert_eq!(
            err.downcast_ref::<NavigationTimeout>().map(|t| t.timeout_ms),
            Some(500)
        );
        assert_eq!(err.to_string(), "navigation timed out after 500ms");
    }
}
