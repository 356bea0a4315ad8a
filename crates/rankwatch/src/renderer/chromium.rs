// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Chromium-based renderer using chromiumoxide.

use super::{NavigationResult, NavigationTimeout, RenderContext, Renderer};
use crate::config::BrowserConfig as EngineBrowserConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::layout::Point;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const WINDOW_WIDTH: u32 = 1366;
const WINDOW_HEIGHT: u32 = 768;

/// Quiet period that counts as network idle.
const IDLE_QUIET: Duration = Duration::from_millis(500);
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Hides the usual automation markers. Runs before any page script.
const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
window.chrome = window.chrome || { runtime: {} };
const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
if (originalQuery) {
  window.navigator.permissions.query = (parameters) =>
    parameters.name === 'notifications'
      ? Promise.resolve({ state: Notification.permission })
      : originalQuery(parameters);
}
"#;

/// Find the Chromium binary path.
pub fn find_chromium(configured: Option<&PathBuf>) -> Option<PathBuf> {
    // 1. Explicit config / RANKWATCH_CHROMIUM_PATH
    if let Some(path) = configured {
        if path.exists() {
            return Some(path.clone());
        }
    }
    if let Ok(p) = std::env::var("RANKWATCH_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. System PATH
    for name in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 3. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    browser: Mutex<Browser>,
    user_agent: String,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Launch a Chromium instance configured for low-profile browsing.
    pub async fn launch(config: &EngineBrowserConfig, user_agent: &str) -> Result<Self> {
        let chrome_path = find_chromium(config.chromium_path.as_ref())
            .context("Chromium not found; set browser.chromium_path or RANKWATCH_CHROMIUM_PATH")?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(WINDOW_WIDTH, WINDOW_HEIGHT)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--lang=en-US");

        builder = if config.headless {
            builder.arg("--headless=new")
        } else {
            builder.with_head()
        };
        if let Some(proxy) = &config.proxy {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }

        let browser_config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("failed to launch Chromium")?;

        // Spawn the handler task
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("chromium handler error: {e}");
                }
            }
        });

        tracing::info!(
            "launched Chromium ({})",
            if config.headless { "headless" } else { "headed" }
        );

        Ok(Self {
            browser: Mutex::new(browser),
            user_agent: user_agent.to_string(),
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;

        page.set_user_agent(SetUserAgentOverrideParams::new(self.user_agent.clone()))
            .await
            .context("failed to set user agent")?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
            .await
            .context("failed to install stealth script")?;

        self.active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(ChromiumContext {
            page,
            active_count: Arc::clone(&self.active_count),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        browser.close().await.context("failed to close Chromium")?;
        if let Err(e) = browser.wait().await {
            tracing::warn!("Chromium did not exit cleanly: {e}");
        }
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// A single Chromium page context.
pub struct ChromiumContext {
    page: Page,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumContext {
    async fn eval<T: serde::de::DeserializeOwned>(&self, script: &str) -> Result<T> {
        self.page
            .evaluate(script)
            .await
            .context("JS execution failed")?
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert JS result: {e:?}"))
    }
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let start = Instant::now();

        let result =
            tokio::time::timeout(Duration::from_millis(timeout_ms), self.page.goto(url)).await;

        let load_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(_)) => {
                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .unwrap_or_else(|| url.to_string());

                // Main-document status from the navigation timing entry.
                let status: Option<u16> = self
                    .eval(
                        "(() => { const e = performance.getEntriesByType('navigation')[0]; \
                         return e && e.responseStatus ? e.responseStatus : null; })()",
                    )
                    .await
                    .unwrap_or(None);

                Ok(NavigationResult {
                    final_url,
                    status,
                    load_time_ms,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => Err(NavigationTimeout { timeout_ms }.into()),
        }
    }

    async fn wait_for_idle(&self, timeout_ms: u64) -> Result<bool> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut last_count = None;
        let mut quiet_since = Instant::now();

        loop {
            let (ready, count): (String, u64) = self
                .eval(
                    "[document.readyState, performance.getEntriesByType('resource').length]",
                )
                .await?;

            if ready == "complete" && last_count == Some(count) {
                if quiet_since.elapsed() >= IDLE_QUIET {
                    return Ok(true);
                }
            } else {
                last_count = Some(count);
                quiet_since = Instant::now();
            }

            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    async fn scroll_to(&self, fraction: f64) -> Result<()> {
        let fraction = fraction.clamp(0.0, 1.0);
        let script = format!(
            "window.scrollTo({{ top: document.body.scrollHeight * {fraction}, behavior: 'smooth' }})"
        );
        self.page
            .evaluate(script.as_str())
            .await
            .context("scroll failed")?;
        Ok(())
    }

    async fn move_pointer(&self, x: f64, y: f64) -> Result<()> {
        self.page
            .move_mouse(Point::new(x, y))
            .await
            .context("pointer move failed")?;
        Ok(())
    }

    async fn click_text(&self, labels: &[&str]) -> Result<bool> {
        let wanted = serde_json::to_string(
            &labels.iter().map(|l| l.to_lowercase()).collect::<Vec<_>>(),
        )?;
        let script = format!(
            r#"(() => {{
  const wanted = {wanted};
  const nodes = document.querySelectorAll('a, button, span, input[type=submit], input[type=button]');
  for (const el of nodes) {{
    const text = (el.innerText || el.value || '').trim().toLowerCase();
    if (!text || !wanted.some(w => text.startsWith(w))) continue;
    const rect = el.getBoundingClientRect();
    if (rect.width === 0 && rect.height === 0) continue;
    el.click();
    return true;
  }}
  return false;
}})()"#
        );
        self.eval(&script).await
    }

    async fn get_html(&self) -> Result<String> {
        self.eval("document.documentElement.outerHTML")
            .await
            .context("failed to get HTML")
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        self.page.close().await.context("failed to close page")?;
        Ok(())
    }
}
