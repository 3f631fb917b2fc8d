use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::Page;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::context::{ElementHandle, ExecutionContext};
use super::selector::ResolvedSelector;
use crate::config::Viewport;

/// CDP-backed execution context.
///
/// Owns the browser lifecycle and one page. Handles map back to the
/// selector they were resolved from; css-selected elements are driven
/// through the CDP element API (real input events), while xpath lookups
/// and value/visibility inspection go through injected scripts, since the
/// element API does not cover them.
pub struct CdpContext {
    browser: Mutex<Option<Browser>>,
    page: Mutex<Option<Page>>,
    elements: Mutex<HashMap<u64, ResolvedSelector>>,
    next_handle: AtomicU64,
    /// Lock to prevent concurrent browser launches.
    launch_lock: Mutex<()>,
}

impl CdpContext {
    pub fn new() -> Self {
        Self {
            browser: Mutex::new(None),
            page: Mutex::new(None),
            elements: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            launch_lock: Mutex::new(()),
        }
    }

    /// Launch the browser on a blank page.
    pub async fn launch(&self, headless: bool, viewport: Viewport) -> Result<()> {
        let _launch_guard = self.launch_lock.lock().await;

        // Close any existing browser first
        self.close().await.ok();

        let mut config = BrowserConfig::builder()
            .window_size(viewport.width, viewport.height);

        if !headless {
            config = config.with_head();
        }

        // Disable automation detection flags and extra windows
        config = config
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-default-apps")
            .arg("--disable-extensions");

        let config = config
            .build()
            .map_err(|e| anyhow!("Failed to build browser config: {}", e))?;

        // Bound the launch so a missing Chrome doesn't hang the session
        let (browser, mut handler) = timeout(Duration::from_secs(30), Browser::launch(config))
            .await
            .map_err(|_| {
                anyhow!("Browser launch timeout (30s) - Chrome may not be installed or is unresponsive")
            })?
            .map_err(|e| anyhow!("Failed to launch browser: {}", e))?;

        // Handler task drains browser events for the lifetime of the session
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                tracing::trace!("Browser event: {:?}", event);
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| anyhow!("Failed to create page: {}", e))?;

        apply_viewport(&page, viewport.width, viewport.height).await?;

        *self.browser.lock().await = Some(browser);
        *self.page.lock().await = Some(page);

        tracing::info!("Browser launched (headless: {})", headless);
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        let mut page_guard = self.page.lock().await;
        let mut browser_guard = self.browser.lock().await;

        self.elements.lock().await.clear();

        if let Some(page) = page_guard.take() {
            let _ = page.close().await;
        }

        if let Some(mut browser) = browser_guard.take() {
            let _ = browser.close().await;
        }

        tracing::info!("Browser closed");
        Ok(())
    }

    async fn with_page<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Page) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let page = {
            let page_guard = self.page.lock().await;
            page_guard
                .as_ref()
                .ok_or_else(|| anyhow!("No page available"))?
                .clone()
        };
        f(page).await
    }

    async fn stored_selector(&self, handle: &ElementHandle) -> Result<ResolvedSelector> {
        let elements = self.elements.lock().await;
        elements
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| anyhow!("Stale element handle"))
    }
}

impl Default for CdpContext {
    fn default() -> Self {
        Self::new()
    }
}

async fn apply_viewport(page: &Page, width: u32, height: u32) -> Result<()> {
    let params =
        chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams::builder()
            .width(width as i64)
            .height(height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|e| anyhow!("Failed to build viewport params: {}", e))?;

    page.execute(params)
        .await
        .map_err(|e| anyhow!("Failed to set viewport: {}", e))?;
    Ok(())
}

/// JSON-quote a string for embedding into a script.
fn js_str(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Expression resolving a selector to a DOM node (or null).
fn node_expr(selector: &ResolvedSelector) -> String {
    match selector {
        ResolvedSelector::Css(sel) => format!("document.querySelector({})", js_str(sel)),
        ResolvedSelector::Xpath(xpath) => format!(
            "document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
            js_str(xpath)
        ),
    }
}

#[async_trait]
impl ExecutionContext for CdpContext {
    async fn navigate(&self, url: &str) -> Result<()> {
        // Handles from the previous document are dead after this point
        self.elements.lock().await.clear();

        let url = url.to_string();
        self.with_page(|page| async move {
            page.goto(url.as_str())
                .await
                .map_err(|e| anyhow!("Failed to navigate to {}: {}", url, e))?;
            Ok(())
        })
        .await
    }

    async fn run_script(&self, script: &str) -> Result<Value> {
        let script = script.to_string();
        self.with_page(|page| async move {
            let result = page
                .evaluate(script)
                .await
                .map_err(|e| anyhow!("Failed to evaluate script: {}", e))?;
            // `undefined` carries no value; surface it as null
            Ok(result.into_value().unwrap_or(Value::Null))
        })
        .await
    }

    async fn find_element(&self, selector: &ResolvedSelector) -> Result<ElementHandle> {
        match selector {
            ResolvedSelector::Css(sel) => {
                let sel = sel.clone();
                self.with_page(|page| async move {
                    page.find_element(&sel)
                        .await
                        .map_err(|e| anyhow!("Failed to find element '{}': {}", sel, e))
                })
                .await?;
            }
            ResolvedSelector::Xpath(_) => {
                let present = self
                    .run_script(&format!("{} !== null", node_expr(selector)))
                    .await?;
                if present != Value::Bool(true) {
                    return Err(anyhow!("Failed to find element '{}'", selector));
                }
            }
        }

        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.elements.lock().await.insert(id, selector.clone());
        Ok(ElementHandle(id))
    }

    async fn is_visible(&self, handle: &ElementHandle) -> Result<bool> {
        let selector = self.stored_selector(handle).await?;
        let script = format!(
            "(() => {{ const n = {}; if (!n) return false; \
             const r = n.getBoundingClientRect(); const s = window.getComputedStyle(n); \
             return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none'; }})()",
            node_expr(&selector)
        );
        Ok(self.run_script(&script).await? == Value::Bool(true))
    }

    async fn click(&self, handle: &ElementHandle) -> Result<()> {
        let selector = self.stored_selector(handle).await?;
        match &selector {
            ResolvedSelector::Css(sel) => {
                let sel = sel.clone();
                self.with_page(|page| async move {
                    let element = page
                        .find_element(&sel)
                        .await
                        .map_err(|e| anyhow!("Failed to find element '{}': {}", sel, e))?;
                    element
                        .click()
                        .await
                        .map_err(|e| anyhow!("Failed to click element '{}': {}", sel, e))?;
                    Ok(())
                })
                .await?;
            }
            ResolvedSelector::Xpath(_) => {
                let script = format!(
                    "(() => {{ const n = {}; if (n) n.click(); return n !== null; }})()",
                    node_expr(&selector)
                );
                if self.run_script(&script).await? != Value::Bool(true) {
                    return Err(anyhow!("Failed to click element '{}': gone", selector));
                }
            }
        }
        Ok(())
    }

    async fn clear(&self, handle: &ElementHandle) -> Result<()> {
        let selector = self.stored_selector(handle).await?;
        let script = format!(
            "(() => {{ const n = {}; if (!n) return false; n.value = ''; \
             n.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             n.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()",
            node_expr(&selector)
        );
        if self.run_script(&script).await? != Value::Bool(true) {
            return Err(anyhow!("Failed to clear element '{}': gone", selector));
        }
        Ok(())
    }

    async fn send_keys(&self, handle: &ElementHandle, text: &str) -> Result<()> {
        let selector = self.stored_selector(handle).await?;
        match &selector {
            ResolvedSelector::Css(sel) => {
                let sel = sel.clone();
                let text = text.to_string();
                self.with_page(|page| async move {
                    let element = page
                        .find_element(&sel)
                        .await
                        .map_err(|e| anyhow!("Failed to find element '{}': {}", sel, e))?;
                    element
                        .click()
                        .await
                        .map_err(|e| anyhow!("Failed to focus element '{}': {}", sel, e))?;
                    element
                        .type_str(&text)
                        .await
                        .map_err(|e| anyhow!("Failed to type into element '{}': {}", sel, e))?;
                    Ok(())
                })
                .await?;
            }
            ResolvedSelector::Xpath(_) => {
                let script = format!(
                    "(() => {{ const n = {}; if (!n) return false; n.focus(); \
                     n.value = n.value + {}; \
                     n.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                     n.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()",
                    node_expr(&selector),
                    js_str(text)
                );
                if self.run_script(&script).await? != Value::Bool(true) {
                    return Err(anyhow!("Failed to type into element '{}': gone", selector));
                }
            }
        }
        Ok(())
    }

    async fn text(&self, handle: &ElementHandle) -> Result<String> {
        let selector = self.stored_selector(handle).await?;
        let script = format!(
            "(() => {{ const n = {}; return n ? n.innerText : null; }})()",
            node_expr(&selector)
        );
        match self.run_script(&script).await? {
            Value::String(text) => Ok(text),
            Value::Null => Err(anyhow!("Failed to read text of '{}': gone", selector)),
            other => Ok(other.to_string()),
        }
    }

    async fn send_key(&self, key: &str) -> Result<()> {
        let script = format!(
            "(() => {{ const t = document.activeElement || document.body; \
             t.dispatchEvent(new KeyboardEvent('keydown', {{ key: {}, bubbles: true }})); return true; }})()",
            js_str(key)
        );
        self.run_script(&script).await?;
        Ok(())
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        self.with_page(|page| async move { apply_viewport(&page, width, height).await })
            .await
    }

    async fn current_url(&self) -> Result<String> {
        self.with_page(|page| async move {
            page.url()
                .await
                .map_err(|e| anyhow!("Failed to get URL: {}", e))?
                .ok_or_else(|| anyhow!("URL is None"))
        })
        .await
    }

    async fn current_title(&self) -> Result<String> {
        self.with_page(|page| async move {
            Ok(page
                .get_title()
                .await
                .map_err(|e| anyhow!("Failed to get title: {}", e))?
                .unwrap_or_default())
        })
        .await
    }

    async fn take_screenshot(&self, path: &Path) -> Result<()> {
        let png = self
            .with_page(|page| async move {
                page.screenshot(
                    chromiumoxide::page::ScreenshotParams::builder()
                        .format(CaptureScreenshotFormat::Png)
                        .build(),
                )
                .await
                .map_err(|e| anyhow!("Failed to take screenshot: {}", e))
            })
            .await?;

        tokio::fs::write(path, png)
            .await
            .map_err(|e| anyhow!("Failed to write screenshot {}: {}", path.display(), e))?;
        Ok(())
    }
}
