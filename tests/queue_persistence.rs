//! Durable queue behavior: dedup, leases, reclaim, backoff, caps.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crawlify::queue::{EnqueueOutcome, QueueError, UrlQueue, UrlStatus};
use crawlify::{EngineConfig, Store};

struct QueueHarness {
    queue: Arc<UrlQueue>,
    _tmp: tempfile::TempDir,
}

async fn queue_with(config: EngineConfig) -> QueueHarness {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = Store::open(&tmp.path().join("queue.sqlite"))
        .await
        .expect("store opens");
    QueueHarness {
        queue: Arc::new(UrlQueue::new(&store, &config)),
        _tmp: tmp,
    }
}

async fn default_queue() -> QueueHarness {
    queue_with(
        EngineConfig::builder()
            .retry_base_delay(Duration::from_millis(10))
            .retry_max_delay(Duration::from_millis(40))
            .lease_ttl(Duration::from_millis(100))
            .build()
            .expect("config builds"),
    )
    .await
}

#[tokio::test]
async fn dedup_is_strict_on_normalized_form() {
    let h = default_queue().await;
    let id = Uuid::new_v4();

    assert_eq!(
        h.queue
            .enqueue(id, "http://Example.com/a?b=2&a=1#frag", 0, None)
            .await
            .expect("enqueues"),
        EnqueueOutcome::Enqueued
    );
    // Same URL in a different spelling: rejected
    assert_eq!(
        h.queue
            .enqueue(id, "http://example.com/a?a=1&b=2", 0, None)
            .await
            .expect("enqueues"),
        EnqueueOutcome::Duplicate
    );
    // A different execution keeps its own frontier
    let other = Uuid::new_v4();
    assert_eq!(
        h.queue
            .enqueue(other, "http://example.com/a?a=1&b=2", 0, None)
            .await
            .expect("enqueues"),
        EnqueueOutcome::Enqueued
    );
}

#[tokio::test]
async fn duplicate_enqueue_never_resets_retry_count() {
    let h = default_queue().await;
    let id = Uuid::new_v4();

    h.queue
        .enqueue(id, "http://example.com/x", 0, None)
        .await
        .expect("enqueues");
    let item = h
        .queue
        .lease(id, "w1")
        .await
        .expect("lease ok")
        .expect("item available");
    h.queue
        .fail(item.id, "boom", true)
        .await
        .expect("fails retryably");

    // Re-discovering the same URL while it waits in backoff is a no-op
    assert_eq!(
        h.queue
            .enqueue(id, "http://example.com/x", 1, Some("links"))
            .await
            .expect("enqueues"),
        EnqueueOutcome::Duplicate
    );
    let items = h.queue.items(id).await.expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].retry_count, 1);
    assert_eq!(items[0].depth, 0, "original depth preserved");
}

#[tokio::test]
async fn depth_and_capacity_limits() {
    let h = queue_with(
        EngineConfig::builder()
            .max_depth(1)
            .queue_soft_cap(2)
            .queue_hard_cap(2)
            .build()
            .expect("config builds"),
    )
    .await;
    let id = Uuid::new_v4();

    assert_eq!(
        h.queue
            .enqueue(id, "http://example.com/deep", 2, None)
            .await
            .expect("handled"),
        EnqueueOutcome::DepthExceeded
    );

    h.queue
        .enqueue(id, "http://example.com/1", 0, None)
        .await
        .expect("enqueues");
    h.queue
        .enqueue(id, "http://example.com/2", 0, None)
        .await
        .expect("enqueues");
    let over = h.queue.enqueue(id, "http://example.com/3", 0, None).await;
    assert!(matches!(over, Err(QueueError::CapacityExceeded { .. })));
}

#[tokio::test]
async fn lease_is_exclusive_and_fifo() {
    let h = default_queue().await;
    let id = Uuid::new_v4();

    for i in 0..3 {
        h.queue
            .enqueue(id, &format!("http://example.com/{i}"), 0, None)
            .await
            .expect("enqueues");
    }

    let first = h
        .queue
        .lease(id, "w1")
        .await
        .expect("lease ok")
        .expect("item available");
    assert_eq!(first.url, "http://example.com/0");
    assert_eq!(first.status, UrlStatus::InProgress);
    assert_eq!(first.leased_by.as_deref(), Some("w1"));

    let second = h
        .queue
        .lease(id, "w2")
        .await
        .expect("lease ok")
        .expect("item available");
    assert_eq!(second.url, "http://example.com/1", "oldest queued first");
    assert_ne!(first.id, second.id, "no item leased twice");
}

#[tokio::test]
async fn concurrent_leases_never_share_an_item() {
    let h = default_queue().await;
    let id = Uuid::new_v4();

    for i in 0..5 {
        h.queue
            .enqueue(id, &format!("http://example.com/c{i}"), 0, None)
            .await
            .expect("enqueues");
    }

    let mut tasks = Vec::new();
    for w in 0..10 {
        let queue = Arc::clone(&h.queue);
        tasks.push(tokio::spawn(async move {
            queue.lease(id, &format!("w{w}")).await.expect("lease ok")
        }));
    }

    let mut leased = Vec::new();
    for task in tasks {
        if let Some(item) = task.await.expect("task joins") {
            leased.push(item.id);
        }
    }
    let unique: std::collections::HashSet<i64> = leased.iter().copied().collect();
    assert_eq!(leased.len(), unique.len(), "an item was double-leased");
    assert!(leased.len() <= 5);
}

#[tokio::test]
async fn retryable_failure_backs_off_then_reappears() {
    let h = default_queue().await;
    let id = Uuid::new_v4();

    h.queue
        .enqueue(id, "http://example.com/r", 0, None)
        .await
        .expect("enqueues");
    let item = h
        .queue
        .lease(id, "w1")
        .await
        .expect("lease ok")
        .expect("item available");

    let status = h.queue.fail(item.id, "flaky", true).await.expect("fails");
    assert_eq!(status, UrlStatus::Queued);

    // Backoff hold: not leasable immediately
    assert!(h.queue.lease(id, "w1").await.expect("lease ok").is_none());

    tokio::time::sleep(Duration::from_millis(80)).await;
    let retried = h
        .queue
        .lease(id, "w1")
        .await
        .expect("lease ok")
        .expect("item reappears after backoff");
    assert_eq!(retried.retry_count, 1);
}

#[tokio::test]
async fn retries_exhaust_into_failed() {
    let h = queue_with(
        EngineConfig::builder()
            .max_retries(1)
            .retry_base_delay(Duration::from_millis(5))
            .retry_max_delay(Duration::from_millis(10))
            .build()
            .expect("config builds"),
    )
    .await;
    let id = Uuid::new_v4();

    h.queue
        .enqueue(id, "http://example.com/e", 0, None)
        .await
        .expect("enqueues");
    let item = h
        .queue
        .lease(id, "w1")
        .await
        .expect("lease ok")
        .expect("item available");
    assert_eq!(
        h.queue.fail(item.id, "1st", true).await.expect("fails"),
        UrlStatus::Queued
    );

    tokio::time::sleep(Duration::from_millis(30)).await;
    let again = h
        .queue
        .lease(id, "w1")
        .await
        .expect("lease ok")
        .expect("item available");
    assert_eq!(
        h.queue.fail(again.id, "2nd", true).await.expect("fails"),
        UrlStatus::Failed
    );

    let items = h.queue.items(id).await.expect("items");
    assert_eq!(items[0].status, UrlStatus::Failed);
    assert_eq!(items[0].last_error.as_deref(), Some("2nd"));
}

#[tokio::test]
async fn non_retryable_failure_is_terminal() {
    let h = default_queue().await;
    let id = Uuid::new_v4();

    h.queue
        .enqueue(id, "http://example.com/n", 0, None)
        .await
        .expect("enqueues");
    let item = h
        .queue
        .lease(id, "w1")
        .await
        .expect("lease ok")
        .expect("item available");
    assert_eq!(
        h.queue
            .fail(item.id, "validation", false)
            .await
            .expect("fails"),
        UrlStatus::Failed
    );
}

#[tokio::test]
async fn reclaim_reverts_expired_leases_without_touching_retries() {
    // lease_ttl 100ms: a crashed worker's lease expires quickly
    let h = default_queue().await;
    let id = Uuid::new_v4();

    h.queue
        .enqueue(id, "http://example.com/crash", 0, None)
        .await
        .expect("enqueues");
    let item = h
        .queue
        .lease(id, "w-dead")
        .await
        .expect("lease ok")
        .expect("item available");

    // Crash: the lease is never completed or failed
    tokio::time::sleep(Duration::from_millis(150)).await;
    let reclaimed = h.queue.reclaim().await.expect("reclaims");
    assert_eq!(reclaimed, 1);

    let items = h.queue.items(id).await.expect("items");
    assert_eq!(items[0].status, UrlStatus::Queued);
    assert_eq!(items[0].retry_count, item.retry_count, "retry_count unchanged");
    assert!(items[0].leased_by.is_none());

    // Another worker picks it up and completes it
    let retaken = h
        .queue
        .lease(id, "w-alive")
        .await
        .expect("lease ok")
        .expect("item available");
    h.queue.complete(retaken.id).await.expect("completes");
    let items = h.queue.items(id).await.expect("items");
    assert_eq!(items[0].status, UrlStatus::Done);
}

#[tokio::test]
async fn reclaim_leaves_live_leases_alone() {
    let h = queue_with(
        EngineConfig::builder()
            .lease_ttl(Duration::from_secs(60))
            .build()
            .expect("config builds"),
    )
    .await;
    let id = Uuid::new_v4();

    h.queue
        .enqueue(id, "http://example.com/live", 0, None)
        .await
        .expect("enqueues");
    h.queue
        .lease(id, "w1")
        .await
        .expect("lease ok")
        .expect("item available");

    assert_eq!(h.queue.reclaim().await.expect("reclaims"), 0);
}

#[tokio::test]
async fn pause_blocks_leasing_until_resume() {
    let h = default_queue().await;
    let id = Uuid::new_v4();

    h.queue
        .enqueue(id, "http://example.com/p", 0, None)
        .await
        .expect("enqueues");

    h.queue.pause(id).await.expect("pauses");
    assert!(h.queue.is_paused(id).await.expect("flag"));
    assert!(h.queue.lease(id, "w1").await.expect("lease ok").is_none());

    h.queue.resume(id).await.expect("resumes");
    assert!(h.queue.lease(id, "w1").await.expect("lease ok").is_some());
}

#[tokio::test]
async fn stats_partition_the_frontier() {
    let h = default_queue().await;
    let id = Uuid::new_v4();

    for i in 0..5 {
        h.queue
            .enqueue(id, &format!("http://example.com/s{i}"), 0, None)
            .await
            .expect("enqueues");
    }

    let a = h.queue.lease(id, "w1").await.expect("ok").expect("item");
    let b = h.queue.lease(id, "w1").await.expect("ok").expect("item");
    let c = h.queue.lease(id, "w1").await.expect("ok").expect("item");
    h.queue.complete(a.id).await.expect("completes");
    h.queue.fail(b.id, "done for", false).await.expect("fails");
    h.queue.skip(c.id).await.expect("skips");

    let stats = h.queue.stats(id).await.expect("stats");
    assert_eq!(stats.queued, 2);
    assert_eq!(stats.in_progress, 0);
    assert_eq!(stats.done, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.total(), 5);
    assert!(stats.throughput_per_sec >= 0.0);
}

#[tokio::test]
async fn invalid_urls_are_rejected() {
    let h = default_queue().await;
    let id = Uuid::new_v4();

    assert!(matches!(
        h.queue.enqueue(id, "not a url", 0, None).await,
        Err(QueueError::InvalidUrl(_))
    ));
    assert!(matches!(
        h.queue.enqueue(id, "ftp://example.com/f", 0, None).await,
        Err(QueueError::InvalidUrl(_))
    ));
}
