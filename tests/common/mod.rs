//! Shared test fixtures: an in-memory browser driver and workflow builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;

use crawlify::browser::{
    BrowserContext, BrowserDriver, DriverError, Element, NavigationResult, Page, WaitUntil,
};
use crawlify::{BrowserProfile, Workflow};

/// One fixture page: selector → elements, plus response behavior.
#[derive(Debug, Clone, Default)]
pub struct MockPageSpec {
    pub status: u16,
    pub elements: HashMap<String, Vec<Element>>,
    pub content: String,
    /// Respond 429 to this many navigations before serving `status`
    pub rate_limit_first: u32,
    /// Artificial navigation latency
    pub delay: Duration,
}

impl MockPageSpec {
    pub fn ok() -> Self {
        Self {
            status: 200,
            ..Default::default()
        }
    }

    pub fn with_elements(mut self, selector: &str, elements: Vec<Element>) -> Self {
        self.elements.insert(selector.to_string(), elements);
        self
    }

    pub fn rate_limited_once(mut self) -> Self {
        self.rate_limit_first = 1;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_content(mut self, content: &str) -> Self {
        self.content = content.to_string();
        self
    }
}

/// A text element.
pub fn text_el(text: &str) -> Element {
    Element {
        text: Some(text.to_string()),
        attributes: HashMap::new(),
    }
}

/// An anchor element carrying an href.
pub fn link_el(href: &str) -> Element {
    Element {
        text: None,
        attributes: HashMap::from([("href".to_string(), href.to_string())]),
    }
}

/// Fixture site plus shared attempt counters.
pub struct MockSite {
    pages: HashMap<String, MockPageSpec>,
    attempts: DashMap<String, u32>,
}

impl MockSite {
    pub fn new(pages: HashMap<String, MockPageSpec>) -> Arc<Self> {
        Arc::new(Self {
            pages,
            attempts: DashMap::new(),
        })
    }

    pub fn attempts_for(&self, url: &str) -> u32 {
        self.attempts.get(url).map_or(0, |a| *a)
    }
}

/// Browser driver over a [`MockSite`].
pub struct MockDriver {
    site: Arc<MockSite>,
    pub contexts_created: AtomicUsize,
    pub profiles_seen: Mutex<Vec<BrowserProfile>>,
}

impl MockDriver {
    pub fn new(site: Arc<MockSite>) -> Arc<Self> {
        Arc::new(Self {
            site,
            contexts_created: AtomicUsize::new(0),
            profiles_seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn new_context(
        &self,
        profile: BrowserProfile,
    ) -> Result<Arc<dyn BrowserContext>, DriverError> {
        self.contexts_created.fetch_add(1, Ordering::SeqCst);
        self.profiles_seen.lock().push(profile.clone());
        Ok(Arc::new(MockContext {
            site: Arc::clone(&self.site),
            profile,
        }))
    }

    async fn shutdown(&self) -> Result<(), DriverError> {
        Ok(())
    }
}

pub struct MockContext {
    site: Arc<MockSite>,
    profile: BrowserProfile,
}

#[async_trait]
impl BrowserContext for MockContext {
    async fn new_page(&self) -> Result<Arc<dyn Page>, DriverError> {
        Ok(Arc::new(MockPage {
            site: Arc::clone(&self.site),
            current: Mutex::new(None),
        }))
    }

    async fn close_pages(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn clear_state(&self) -> Result<(), DriverError> {
        Ok(())
    }

    fn profile(&self) -> &BrowserProfile {
        &self.profile
    }
}

pub struct MockPage {
    site: Arc<MockSite>,
    current: Mutex<Option<String>>,
}

impl MockPage {
    fn spec(&self) -> Result<MockPageSpec, DriverError> {
        let current = self.current.lock().clone();
        let url = current.ok_or_else(|| DriverError::Protocol("no page loaded".into()))?;
        self.site
            .pages
            .get(&url)
            .cloned()
            .ok_or_else(|| DriverError::Protocol(format!("page vanished: {url}")))
    }
}

#[async_trait]
impl Page for MockPage {
    async fn goto(
        &self,
        url: &str,
        _wait_until: WaitUntil,
        _timeout: Duration,
    ) -> Result<NavigationResult, DriverError> {
        let Some(spec) = self.site.pages.get(url) else {
            return Err(DriverError::Network(format!("dns failure for {url}")));
        };

        if !spec.delay.is_zero() {
            tokio::time::sleep(spec.delay).await;
        }

        let attempt = {
            let mut entry = self.site.attempts.entry(url.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        let status = if attempt <= spec.rate_limit_first {
            429
        } else {
            spec.status
        };

        *self.current.lock() = Some(url.to_string());
        Ok(NavigationResult {
            final_url: url.to_string(),
            status: Some(status),
        })
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        self.current
            .lock()
            .clone()
            .ok_or_else(|| DriverError::Protocol("no page loaded".into()))
    }

    async fn content(&self) -> Result<String, DriverError> {
        Ok(self.spec()?.content)
    }

    async fn evaluate(&self, _script: &str) -> Result<serde_json::Value, DriverError> {
        Ok(serde_json::Value::Null)
    }

    async fn select_all(&self, selector: &str) -> Result<Vec<Element>, DriverError> {
        Ok(self
            .spec()?
            .elements
            .get(selector)
            .cloned()
            .unwrap_or_default())
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        if self.spec()?.elements.contains_key(selector) {
            Ok(())
        } else {
            Err(DriverError::Protocol(format!("nothing to click: {selector}")))
        }
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        if self.spec()?.elements.contains_key(selector) {
            Ok(())
        } else {
            Err(DriverError::Timeout(timeout))
        }
    }

    async fn scroll_by(&self, _dx: i64, _dy: i64) -> Result<(), DriverError> {
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        Ok(vec![0u8; 8])
    }
}

/// The listing fixture used by the discovery scenarios: one list page
/// linking three product pages that each carry a name and a price.
pub fn listing_site(duplicate_links: bool) -> Arc<MockSite> {
    let mut product_links = vec![link_el("/p1"), link_el("/p2"), link_el("/p3")];
    if duplicate_links {
        product_links.extend([link_el("/p1"), link_el("/p2"), link_el("/p3")]);
    }

    let mut pages = HashMap::new();
    pages.insert(
        "http://fixture/list".to_string(),
        MockPageSpec::ok().with_elements("a.product", product_links),
    );
    for (i, price) in [(1, "$9.99"), (2, "$19.99"), (3, "$29.99")] {
        pages.insert(
            format!("http://fixture/p{i}"),
            MockPageSpec::ok()
                .with_elements("h1", vec![text_el(&format!("Product {i}"))])
                .with_elements(".price", vec![text_el(price)]),
        );
    }
    MockSite::new(pages)
}

/// navigate → discover(a.product) → extract({name: h1 required, price})
pub fn discovery_workflow(limit: Option<usize>, dedupe: bool) -> Workflow {
    let mut discover_params = json!({ "selector": "a.product", "dedupe": dedupe });
    if let Some(limit) = limit {
        discover_params["limit"] = json!(limit);
    }

    serde_json::from_value(json!({
        "id": "wf-discovery",
        "name": "listing discovery",
        "status": "active",
        "nodes": [
            { "id": "nav", "type": "navigate", "params": {} },
            { "id": "links", "type": "discover", "params": discover_params,
              "dependencies": ["nav"] },
            { "id": "fields", "type": "extract",
              "params": { "fields": {
                  "name": { "selector": "h1", "required": true },
                  "price": { "selector": ".price" }
              }},
              "dependencies": ["links"] }
        ]
    }))
    .expect("fixture workflow deserializes")
}

/// A single-node navigate workflow.
pub fn navigate_workflow() -> Workflow {
    serde_json::from_value(json!({
        "id": "wf-nav",
        "name": "navigate only",
        "status": "active",
        "nodes": [
            { "id": "nav", "type": "navigate", "params": {} }
        ]
    }))
    .expect("fixture workflow deserializes")
}
