//! Traits the execution engine requires from a headless browser driver.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::profile::BrowserProfile;

/// Failures surfaced by a driver implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    #[error("network error: {0}")]
    Network(String),

    #[error("driver operation timed out after {0:?}")]
    Timeout(Duration),

    /// The context or browser process died; the caller must not reuse it
    #[error("browser crashed: {0}")]
    Crashed(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Navigation completion criterion for `Page::goto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    #[default]
    Load,
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    #[serde(rename = "networkidle")]
    NetworkIdle,
}

/// Outcome of a completed navigation.
#[derive(Debug, Clone)]
pub struct NavigationResult {
    pub final_url: String,
    /// HTTP status of the main document, when the driver can observe it
    pub status: Option<u16>,
}

/// A matched DOM element, flattened to the data the executors consume.
#[derive(Debug, Clone, Default)]
pub struct Element {
    pub text: Option<String>,
    pub attributes: HashMap<String, String>,
}

impl Element {
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// One tab within an isolated context.
#[async_trait]
pub trait Page: Send + Sync {
    async fn goto(
        &self,
        url: &str,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> Result<NavigationResult, DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    async fn content(&self) -> Result<String, DriverError>;

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, DriverError>;

    /// All elements matching a CSS selector, in document order.
    async fn select_all(&self, selector: &str) -> Result<Vec<Element>, DriverError>;

    async fn click(&self, selector: &str) -> Result<(), DriverError>;

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    async fn scroll_by(&self, dx: i64, dy: i64) -> Result<(), DriverError>;

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError>;
}

/// An isolated browser context (cookie jar, storage, fingerprint).
#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn new_page(&self) -> Result<Arc<dyn Page>, DriverError>;

    /// Close every open page in this context.
    async fn close_pages(&self) -> Result<(), DriverError>;

    /// Clear cookies and storage so the context can be reused.
    async fn clear_state(&self) -> Result<(), DriverError>;

    fn profile(&self) -> &BrowserProfile;
}

/// Factory for isolated contexts; one per deployment.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn new_context(
        &self,
        profile: BrowserProfile,
    ) -> Result<Arc<dyn BrowserContext>, DriverError>;

    async fn shutdown(&self) -> Result<(), DriverError>;
}
