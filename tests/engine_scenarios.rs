//! End-to-end engine scenarios against the mock browser driver.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;

use crawlify::browser::BrowserDriver;
use crawlify::recovery::{
    ContextAwareRule, RecoveryAction, RecoveryPipeline, RuleCondition, RuleOperator, RuleOrigin,
};
use crawlify::{
    BrowserPool, BrowserProfile, EngineConfig, EngineError, EventKind, ExecutionEvent,
    ExecutionStatus, NodeRegistry, Orchestrator, PoolConfig, Store, UrlStatus,
};

use common::{MockDriver, MockPageSpec, MockSite, discovery_workflow, listing_site, navigate_workflow};

struct Harness {
    orchestrator: Orchestrator,
    driver: Arc<MockDriver>,
    _tmp: tempfile::TempDir,
}

async fn harness(site: Arc<MockSite>, config: EngineConfig) -> Harness {
    harness_with_rules(site, config, None).await
}

async fn harness_with_rules(
    site: Arc<MockSite>,
    config: EngineConfig,
    rules: Option<Vec<ContextAwareRule>>,
) -> Harness {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = Store::open(&tmp.path().join("engine.sqlite"))
        .await
        .expect("store opens");

    let driver = MockDriver::new(site);
    let driver_dyn: Arc<dyn BrowserDriver> = driver.clone();
    let pool = BrowserPool::new(
        driver_dyn,
        PoolConfig {
            pool_size: 2,
            acquire_timeout: Duration::from_secs(5),
        },
        BrowserProfile::default(),
    );

    let recovery = Arc::new(RecoveryPipeline::new(config.recovery(), Some(store.clone())));
    if let Some(rules) = rules {
        recovery.rules().load(rules).expect("test rules load");
    }

    let orchestrator = Orchestrator::new(
        config,
        store,
        pool,
        Arc::new(NodeRegistry::with_builtins()),
        recovery,
    );
    Harness {
        orchestrator,
        driver,
        _tmp: tmp,
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig::builder()
        .concurrent_workers(2)
        .pool_size(2)
        .queue_check_interval(Duration::from_millis(20))
        .retry_base_delay(Duration::from_millis(10))
        .retry_max_delay(Duration::from_millis(50))
        .lease_ttl(Duration::from_secs(5))
        .node_timeout(Duration::from_secs(5))
        .build()
        .expect("config builds")
}

fn collect_events(
    mut rx: tokio::sync::broadcast::Receiver<ExecutionEvent>,
) -> Arc<Mutex<Vec<ExecutionEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => sink.lock().push(event),
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(_)) => {}
            }
        }
    });
    events
}

fn kinds_of(events: &[ExecutionEvent], kind: EventKind) -> usize {
    events.iter().filter(|e| e.kind == kind).count()
}

/// Let a background collector drain buffered events before asserting.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn happy_path_discovery_and_extract() {
    let harness = harness(listing_site(false), fast_config()).await;
    let handle = harness
        .orchestrator
        .start(
            discovery_workflow(Some(3), true),
            vec!["http://fixture/list".into()],
            None,
        )
        .await
        .expect("starts");
    let events = collect_events(handle.subscribe());
    let execution_id = handle.id();

    let status = tokio::time::timeout(Duration::from_secs(15), handle.await_completion())
        .await
        .expect("completes in time")
        .expect("supervisor joins");
    assert_eq!(status, ExecutionStatus::Completed);
    settle().await;

    // Frontier: the seed plus the three discovered product pages
    let stats = harness
        .orchestrator
        .queue()
        .stats(execution_id)
        .await
        .expect("stats");
    assert_eq!(stats.total(), 4);
    assert_eq!(stats.done, 3);
    // The listing page itself has no h1, so its required extract fails
    assert_eq!(stats.failed, 1);

    let items = harness
        .orchestrator
        .store()
        .list_extracted_items(execution_id)
        .await
        .expect("items list");
    assert_eq!(items.len(), 3);
    let mut names: Vec<String> = items
        .iter()
        .map(|i| i.data["name"].as_str().unwrap_or("").to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["Product 1", "Product 2", "Product 3"]);
    for item in &items {
        assert!(item.data["price"].as_str().is_some_and(|p| p.starts_with('$')));
    }

    // Event stream bookends and discovery notifications
    let events = events.lock();
    assert_eq!(events.first().map(|e| e.kind), Some(EventKind::ExecutionStarted));
    assert_eq!(
        events.last().map(|e| e.kind),
        Some(EventKind::ExecutionCompleted)
    );
    assert_eq!(kinds_of(&events, EventKind::UrlDiscovered), 3);
    assert_eq!(kinds_of(&events, EventKind::ItemExtracted), 3);
}

#[tokio::test]
async fn duplicate_links_enqueue_once() {
    let harness = harness(listing_site(true), fast_config()).await;
    // In-node dedup off so the queue's own uniqueness check is exercised
    let handle = harness
        .orchestrator
        .start(
            discovery_workflow(None, false),
            vec!["http://fixture/list".into()],
            None,
        )
        .await
        .expect("starts");
    let events = collect_events(handle.subscribe());
    let execution_id = handle.id();

    let status = tokio::time::timeout(Duration::from_secs(15), handle.await_completion())
        .await
        .expect("completes in time")
        .expect("supervisor joins");
    assert_eq!(status, ExecutionStatus::Completed);
    settle().await;

    let items = harness
        .orchestrator
        .queue()
        .items(execution_id)
        .await
        .expect("queue items");
    assert_eq!(items.len(), 4, "six hrefs collapse to three unique URLs");
    assert_eq!(kinds_of(&events.lock(), EventKind::UrlDiscovered), 3);
}

#[tokio::test]
async fn rate_limit_recovers_and_completes() {
    let site = MockSite::new(HashMap::from([(
        "http://fixture/flaky".to_string(),
        MockPageSpec::ok().rate_limited_once(),
    )]));

    // The stock 429 rule with test-sized delays
    let rules = vec![ContextAwareRule {
        id: "generic_rate_limit_429".into(),
        priority: 100,
        conditions: vec![RuleCondition {
            field: "status_code".into(),
            operator: RuleOperator::Equals,
            value: json!(429),
        }],
        domain_pattern: "*".into(),
        actions: vec![
            RecoveryAction::Wait { duration_ms: 50 },
            RecoveryAction::ReduceWorkers { count: 1 },
            RecoveryAction::AddDelay { delay_ms: 20 },
        ],
        confidence: 0.9,
        success_rate: 0.0,
        usage_count: 0,
        created_by: RuleOrigin::Predefined,
    }];

    let harness = harness_with_rules(Arc::clone(&site), fast_config(), Some(rules)).await;
    let handle = harness
        .orchestrator
        .start(navigate_workflow(), vec!["http://fixture/flaky".into()], None)
        .await
        .expect("starts");
    let events = collect_events(handle.subscribe());
    let execution_id = handle.id();

    let status = tokio::time::timeout(Duration::from_secs(15), handle.await_completion())
        .await
        .expect("completes in time")
        .expect("supervisor joins");
    assert_eq!(status, ExecutionStatus::Completed);
    settle().await;

    assert_eq!(site.attempts_for("http://fixture/flaky"), 2);

    let items = harness
        .orchestrator
        .queue()
        .items(execution_id)
        .await
        .expect("queue items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].status, UrlStatus::Done);
    assert_eq!(items[0].retry_count, 1);

    let events = events.lock();
    let recoveries: Vec<&ExecutionEvent> = events
        .iter()
        .filter(|e| e.kind == EventKind::ErrorRecoveryApplied)
        .collect();
    assert_eq!(recoveries.len(), 1);
    let actions: Vec<&str> = recoveries[0].data["actions"]
        .as_array()
        .expect("actions array")
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert_eq!(actions, vec!["wait", "reduce_workers", "add_delay"]);
    assert_eq!(
        recoveries[0].data["rule_id"].as_str(),
        Some("generic_rate_limit_429")
    );
}

#[tokio::test]
async fn pause_silences_node_events_until_resume() {
    let mut pages = HashMap::new();
    for i in 0..6 {
        pages.insert(
            format!("http://fixture/slow{i}"),
            MockPageSpec::ok().with_delay(Duration::from_millis(50)),
        );
    }
    let seeds: Vec<String> = pages.keys().cloned().collect();
    let site = MockSite::new(pages);

    let config = EngineConfig::builder()
        .concurrent_workers(1)
        .pool_size(1)
        .queue_check_interval(Duration::from_millis(20))
        .retry_base_delay(Duration::from_millis(10))
        .build()
        .expect("config builds");

    let harness = harness(site, config).await;
    let handle = harness
        .orchestrator
        .start(navigate_workflow(), seeds, None)
        .await
        .expect("starts");
    let events = collect_events(handle.subscribe());
    let execution_id = handle.id();

    // Let at least one URL go through, then pause
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while handle.stats().urls_processed == 0 {
        assert!(tokio::time::Instant::now() < deadline, "no progress before pause");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    harness.orchestrator.pause(execution_id).await.expect("pauses");

    // In-flight URLs finish naturally; wait for the frontier to settle
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stats = harness
            .orchestrator
            .queue()
            .stats(execution_id)
            .await
            .expect("stats");
        if stats.in_progress == 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "in-flight never drained");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let node_starts_at_pause = kinds_of(&events.lock(), EventKind::NodeStarted);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        kinds_of(&events.lock(), EventKind::NodeStarted),
        node_starts_at_pause,
        "paused execution must not start nodes"
    );

    harness
        .orchestrator
        .resume(execution_id)
        .await
        .expect("resumes");
    let status = tokio::time::timeout(Duration::from_secs(15), handle.await_completion())
        .await
        .expect("completes in time")
        .expect("supervisor joins");
    assert_eq!(status, ExecutionStatus::Completed);
    settle().await;

    let events = events.lock();
    let paused_at = events
        .iter()
        .position(|e| e.kind == EventKind::ExecutionPaused)
        .expect("paused event");
    let resumed_at = events
        .iter()
        .position(|e| e.kind == EventKind::ExecutionResumed)
        .expect("resumed event");
    assert!(paused_at < resumed_at);
    assert!(
        !events[paused_at..resumed_at]
            .iter()
            .any(|e| e.kind == EventKind::NodeStarted),
        "no node_started between pause and resume"
    );
}

#[tokio::test]
async fn required_field_missing_fails_item_not_execution() {
    let site = MockSite::new(HashMap::from([(
        "http://fixture/empty".to_string(),
        MockPageSpec::ok(),
    )]));

    let workflow = serde_json::from_value(json!({
        "id": "wf-strict",
        "name": "strict extract",
        "status": "active",
        "nodes": [
            { "id": "nav", "type": "navigate", "params": {} },
            { "id": "fields", "type": "extract",
              "params": { "fields": { "name": { "selector": "h1", "required": true } } },
              "dependencies": ["nav"] }
        ]
    }))
    .expect("workflow deserializes");

    let harness = harness(site, fast_config()).await;
    let handle = harness
        .orchestrator
        .start(workflow, vec!["http://fixture/empty".into()], None)
        .await
        .expect("starts");
    let execution_id = handle.id();

    let status = tokio::time::timeout(Duration::from_secs(15), handle.await_completion())
        .await
        .expect("completes in time")
        .expect("supervisor joins");
    assert_eq!(status, ExecutionStatus::Completed);
    settle().await;

    let stats = harness
        .orchestrator
        .queue()
        .stats(execution_id)
        .await
        .expect("stats");
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.done, 0);

    let extracted = harness
        .orchestrator
        .store()
        .list_extracted_items(execution_id)
        .await
        .expect("items list");
    assert!(extracted.is_empty());

    assert_eq!(handle.stats().urls_failed, 1);
    assert_eq!(handle.stats().items_extracted, 0);
}

#[tokio::test]
async fn forbidden_rotates_to_stealth_and_proxy_contexts() {
    let site = MockSite::new(HashMap::from([(
        "http://fixture/blocked".to_string(),
        MockPageSpec {
            status: 403,
            ..Default::default()
        },
    )]));

    let config = EngineConfig::builder()
        .concurrent_workers(1)
        .pool_size(1)
        .queue_check_interval(Duration::from_millis(20))
        .retry_base_delay(Duration::from_millis(10))
        .max_retries(2)
        .proxies(vec!["socks5://127.0.0.1:9050".into()])
        .build()
        .expect("config builds");

    let harness = harness(Arc::clone(&site), config).await;
    let handle = harness
        .orchestrator
        .start(navigate_workflow(), vec!["http://fixture/blocked".into()], None)
        .await
        .expect("starts");
    let execution_id = handle.id();

    let status = tokio::time::timeout(Duration::from_secs(15), handle.await_completion())
        .await
        .expect("completes in time")
        .expect("supervisor joins");
    assert_eq!(status, ExecutionStatus::Completed);
    settle().await;

    // Always 403: retries exhaust and the item fails
    let items = harness
        .orchestrator
        .queue()
        .items(execution_id)
        .await
        .expect("queue items");
    assert_eq!(items[0].status, UrlStatus::Failed);
    assert_eq!(items[0].retry_count, 2);

    // After generic_forbidden_403 fired, retries ran on a proxied context
    let profiles = harness.driver.profiles_seen.lock();
    assert!(
        profiles.iter().any(|p| p.proxy.is_some()),
        "expected a proxied context after rotate_proxy"
    );
}

#[tokio::test]
async fn cancellation_reaches_terminal_state() {
    let mut pages = HashMap::new();
    for i in 0..20 {
        pages.insert(
            format!("http://fixture/c{i}"),
            MockPageSpec::ok().with_delay(Duration::from_millis(40)),
        );
    }
    let seeds: Vec<String> = pages.keys().cloned().collect();
    let site = MockSite::new(pages);

    let config = EngineConfig::builder()
        .concurrent_workers(1)
        .pool_size(1)
        .queue_check_interval(Duration::from_millis(20))
        .build()
        .expect("config builds");

    let harness = harness(site, config).await;
    let handle = harness
        .orchestrator
        .start(navigate_workflow(), seeds, None)
        .await
        .expect("starts");
    let events = collect_events(handle.subscribe());
    let execution_id = handle.id();

    tokio::time::sleep(Duration::from_millis(100)).await;
    harness.orchestrator.cancel(execution_id).expect("cancels");

    let status = tokio::time::timeout(Duration::from_secs(15), handle.await_completion())
        .await
        .expect("finishes in time")
        .expect("supervisor joins");
    assert_eq!(status, ExecutionStatus::Cancelled);
    settle().await;

    let stats = harness
        .orchestrator
        .queue()
        .stats(execution_id)
        .await
        .expect("stats");
    assert!(stats.done < 20, "cancellation should leave work undone");
    assert_eq!(
        kinds_of(&events.lock(), EventKind::ExecutionCancelled),
        1
    );
}

#[tokio::test]
async fn invalid_workflow_aborts_before_processing() {
    let harness = harness(listing_site(false), fast_config()).await;

    let workflow = serde_json::from_value(json!({
        "id": "wf-bad",
        "name": "bad params",
        "status": "active",
        "nodes": [
            { "id": "fields", "type": "extract", "params": { "fields": {} } }
        ]
    }))
    .expect("workflow deserializes");

    let result = harness
        .orchestrator
        .start(workflow, vec!["http://fixture/list".into()], None)
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn cyclic_workflow_is_rejected() {
    let harness = harness(listing_site(false), fast_config()).await;

    let workflow = serde_json::from_value(json!({
        "id": "wf-cycle",
        "name": "cycle",
        "status": "active",
        "nodes": [
            { "id": "a", "type": "wait", "params": { "duration_ms": 1 },
              "dependencies": ["b"] },
            { "id": "b", "type": "wait", "params": { "duration_ms": 1 },
              "dependencies": ["a"] }
        ]
    }))
    .expect("workflow deserializes");

    let result = harness
        .orchestrator
        .start(workflow, vec!["http://fixture/list".into()], None)
        .await;
    assert!(matches!(result, Err(EngineError::Workflow(_))));
}

#[tokio::test]
async fn conditional_gates_downstream_nodes() {
    // Page without the banner: the gated extract must be skipped, so its
    // required field cannot fail the URL
    let site = MockSite::new(HashMap::from([(
        "http://fixture/plain".to_string(),
        MockPageSpec::ok().with_elements("h1", vec![common::text_el("Title")]),
    )]));

    let workflow = serde_json::from_value(json!({
        "id": "wf-cond",
        "name": "conditional gate",
        "status": "active",
        "nodes": [
            { "id": "nav", "type": "navigate", "params": {} },
            { "id": "has_banner", "type": "conditional",
              "params": { "selector": ".banner" },
              "dependencies": ["nav"] },
            { "id": "banner_text", "type": "extract",
              "params": { "fields": { "banner": { "selector": ".banner", "required": true } } },
              "dependencies": ["has_banner"] }
        ]
    }))
    .expect("workflow deserializes");

    let harness = harness(site, fast_config()).await;
    let handle = harness
        .orchestrator
        .start(workflow, vec!["http://fixture/plain".into()], None)
        .await
        .expect("starts");
    let execution_id = handle.id();

    let status = tokio::time::timeout(Duration::from_secs(15), handle.await_completion())
        .await
        .expect("completes in time")
        .expect("supervisor joins");
    assert_eq!(status, ExecutionStatus::Completed);
    settle().await;

    let stats = harness
        .orchestrator
        .queue()
        .stats(execution_id)
        .await
        .expect("stats");
    assert_eq!(stats.done, 1, "gated extract skipped, URL completes");
    assert_eq!(stats.failed, 0);
}
