use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::time::{sleep, Instant};

use super::selector::ResolvedSelector;

/// Poll interval for readiness loops layered on top of `find_element`.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Opaque reference to one element inside the execution context. Only the
/// driver implementation that issued a handle can interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub u64);

/// Raised by `wait_for_element` when the deadline passes; carried inside
/// `anyhow::Error` so callers can map it onto their own timeout taxonomy.
#[derive(Debug, Error)]
#[error("timed out after {0:?} waiting for {1}")]
pub struct WaitTimeout(pub Duration, pub String);

/// The remote, stateful execution context the replay engine drives.
///
/// The engine never assumes a particular automation technology behind this
/// trait; the production implementation speaks CDP, tests substitute an
/// in-memory fake. All page state (including everything the bridge injects)
/// is destroyed whenever `navigate` loads a new document.
#[async_trait]
pub trait ExecutionContext: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Evaluate a JavaScript expression in the page and return its value.
    async fn run_script(&self, script: &str) -> Result<Value>;

    /// Resolve a selector to exactly one element. No match is an error.
    async fn find_element(&self, selector: &ResolvedSelector) -> Result<ElementHandle>;

    async fn is_visible(&self, handle: &ElementHandle) -> Result<bool>;

    async fn click(&self, handle: &ElementHandle) -> Result<()>;

    /// Clear an element's value.
    async fn clear(&self, handle: &ElementHandle) -> Result<()>;

    /// Send text input to an element.
    async fn send_keys(&self, handle: &ElementHandle, text: &str) -> Result<()>;

    /// Element text content.
    async fn text(&self, handle: &ElementHandle) -> Result<String>;

    /// Send a raw key event to the context (not bound to an element).
    async fn send_key(&self, key: &str) -> Result<()>;

    async fn set_viewport(&self, width: u32, height: u32) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    async fn current_title(&self) -> Result<String>;

    async fn take_screenshot(&self, path: &Path) -> Result<()>;

    /// Block until a selector resolves (optionally to a visible element) or
    /// the timeout elapses. `None` waits without bound.
    async fn wait_for_element(
        &self,
        selector: &ResolvedSelector,
        visible: bool,
        timeout: Option<Duration>,
    ) -> Result<ElementHandle> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Ok(handle) = self.find_element(selector).await {
                let ready = if visible {
                    self.is_visible(&handle).await.unwrap_or(false)
                } else {
                    true
                };
                if ready {
                    return Ok(handle);
                }
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(anyhow::Error::new(WaitTimeout(
                        timeout.unwrap_or_default(),
                        selector.to_string(),
                    )));
                }
            }

            sleep(POLL_INTERVAL).await;
        }
    }
}
