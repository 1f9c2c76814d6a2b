mod common;

use common::*;
use feed_ingestor::{
    poll_interval_ms, poll_timer_key, FeedFetcher, IngestError, PollScheduler, TimerRegistry,
};
use std::sync::{Arc, Once};
use tracing::info;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .try_init()
            .ok();
    });
}

fn test_config() -> FetchConfig {
    FetchConfig {
        user_agent: "feed-ingestor-tests/0.1".to_string(),
        timeout_seconds: 5,
        max_retries: 0,
        retry_delay_seconds: 0,
        max_redirects: 2,
    }
}

fn scheduler_for(registry: Arc<MemoryRegistry>, store: Arc<MemoryStore>) -> PollScheduler {
    let engine = IngestEngine::new(store, CapturingPublisher::new());
    PollScheduler::new(registry, FeedFetcher::new(test_config()), engine)
}

/// Serve one feed document from a loopback listener, returning its URL.
async fn spawn_feed_server(body: String) -> String {
    let app = axum::Router::new().route(
        "/feed.xml",
        axum::routing::get(move || {
            let body = body.clone();
            async move { body }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/feed.xml", addr)
}

#[test]
fn test_poll_interval_tier_mapping() {
    assert_eq!(poll_interval_ms(1), 300000); // 5 minutes
    assert_eq!(poll_interval_ms(2), 600000); // 10 minutes
    assert_eq!(poll_interval_ms(3), 1800000); // 30 minutes
    assert_eq!(poll_interval_ms(4), 3600000); // 60 minutes

    // anything outside the known tiers gets the slowest cadence
    assert_eq!(poll_interval_ms(0), 3600000);
    assert_eq!(poll_interval_ms(-1), 3600000);
    assert_eq!(poll_interval_ms(99), 3600000);
}

#[tokio::test]
async fn test_timer_registry_replaces_previous_handle() {
    let registry = TimerRegistry::new();

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let first = tokio::spawn(async move {
        let _tx = tx;
        std::future::pending::<()>().await
    });
    registry.register("poll-a".to_string(), first).await;

    let second = tokio::spawn(async { std::future::pending::<()>().await });
    registry.register("poll-a".to_string(), second).await;

    // the replaced task was aborted, dropping its end of the channel
    assert!(rx.await.is_err(), "Replaced timer should have been aborted");
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn test_cancel_prefix_is_selective_and_idempotent() {
    let registry = TimerRegistry::new();
    registry
        .register(
            "poll-x".to_string(),
            tokio::spawn(async { std::future::pending::<()>().await }),
        )
        .await;
    registry
        .register(
            "poll-y".to_string(),
            tokio::spawn(async { std::future::pending::<()>().await }),
        )
        .await;
    registry
        .register(
            "other-z".to_string(),
            tokio::spawn(async { std::future::pending::<()>().await }),
        )
        .await;

    assert_eq!(registry.cancel_prefix("poll-").await, 2);
    assert_eq!(registry.len().await, 1);
    assert!(registry.contains("other-z").await);

    // nothing left under the prefix: cancelling again is a no-op
    assert_eq!(registry.cancel_prefix("poll-").await, 0);
    assert_eq!(registry.cancel_prefix("other-").await, 1);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_start_schedules_only_pollable_sources() -> feed_ingestor::Result<()> {
    init_tracing();

    let mut alpha = source("alpha", 1);
    alpha.feed_url = Some("ftp://alpha.example.com/feed".to_string());
    let mut beta = source("beta", 3);
    beta.feed_url = Some("ftp://beta.example.com/feed".to_string());
    let mut inactive = source("inactive", 1);
    inactive.is_active = false;
    let mut no_feed = source("no-feed", 2);
    no_feed.feed_url = None;

    let registry = MemoryRegistry::new(vec![
        alpha.clone(),
        beta.clone(),
        inactive.clone(),
        no_feed.clone(),
    ]);
    let scheduler = scheduler_for(registry.clone(), MemoryStore::new());

    scheduler.start().await?;

    let timers = scheduler.timers();
    assert_eq!(timers.len().await, 2);
    assert!(timers.contains(&poll_timer_key(alpha.id)).await);
    assert!(timers.contains(&poll_timer_key(beta.id)).await);
    assert!(!timers.contains(&poll_timer_key(inactive.id)).await);
    assert!(!timers.contains(&poll_timer_key(no_feed.id)).await);

    scheduler.stop().await;
    assert!(timers.is_empty().await);
    // stopping again is fine
    scheduler.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_kickoff_poll_runs_immediately() -> feed_ingestor::Result<()> {
    init_tracing();

    // unsupported scheme fails the poll without touching the network
    let mut src = source("alpha", 1);
    src.feed_url = Some("ftp://alpha.example.com/feed".to_string());

    let registry = MemoryRegistry::new(vec![src.clone()]);
    let scheduler = scheduler_for(registry.clone(), MemoryStore::new());
    scheduler.start().await?;

    let reg = registry.clone();
    let id = src.id;
    let failed = wait_until(move || reg.get(id).unwrap().last_error.is_some()).await;
    assert!(failed, "Kick-off poll should have recorded its failure");

    let after = registry.get(src.id).unwrap();
    assert!(after.last_error.as_deref().unwrap().contains("scheme"));
    assert!(
        after.last_fetched_at.is_none(),
        "A failed poll must not look like a successful fetch"
    );

    scheduler.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_poll_one_without_feed_url_fails_and_records() {
    let mut src = source("alpha", 2);
    src.feed_url = None;

    let registry = MemoryRegistry::new(vec![src.clone()]);
    let scheduler = scheduler_for(registry.clone(), MemoryStore::new());

    let result = scheduler.poll_one(&src).await;
    match result {
        Err(IngestError::NoFeedUrl { id }) => assert_eq!(id, src.id),
        other => panic!("Expected NoFeedUrl, got {:?}", other),
    }
    assert!(registry.get(src.id).unwrap().last_error.is_some());
}

#[tokio::test]
async fn test_poll_one_fetches_and_stores() -> feed_ingestor::Result<()> {
    init_tracing();

    let doc = rss_document(&format!(
        "{}{}",
        rss_item("First story", Some("https://alpha.example.com/1")),
        rss_item("Second story", Some("https://alpha.example.com/2")),
    ));
    let feed_url = spawn_feed_server(doc).await;

    let mut src = source("alpha", 1);
    src.feed_url = Some(feed_url);

    let registry = MemoryRegistry::new(vec![src.clone()]);
    let store = MemoryStore::new();
    let scheduler = scheduler_for(registry.clone(), store.clone());

    let report = scheduler.poll_one(&src).await?;
    info!("First poll: {:?}", report);
    assert_eq!(report.fetched_count, 2);
    assert_eq!(report.new_count, 2);
    assert!(report.errors.is_empty());

    // polling the same feed again finds nothing new
    let again = scheduler.poll_one(&src).await?;
    assert_eq!(again.fetched_count, 2);
    assert_eq!(again.new_count, 0);
    assert_eq!(store.articles().len(), 2);

    let after = registry.get(src.id).unwrap();
    assert!(after.last_fetched_at.is_some());
    assert!(after.last_error.is_none());
    Ok(())
}

#[tokio::test]
async fn test_poll_all_isolates_failures() -> feed_ingestor::Result<()> {
    init_tracing();

    let doc = rss_document(&rss_item("Only story", Some("https://alpha.example.com/only")));
    let feed_url = spawn_feed_server(doc).await;

    let mut good = source("alpha", 1);
    good.feed_url = Some(feed_url);
    let mut bad = source("beta", 2);
    bad.feed_url = Some("ftp://beta.example.com/feed".to_string());
    let mut push_only = source("gamma", 3);
    push_only.feed_url = None;

    let registry = MemoryRegistry::new(vec![good.clone(), bad.clone(), push_only.clone()]);
    let store = MemoryStore::new();
    let scheduler = scheduler_for(registry.clone(), store.clone());

    let outcomes = scheduler.poll_all().await?;
    assert_eq!(outcomes.len(), 2, "One outcome per pollable source");
    assert!(
        outcomes.iter().all(|o| o.source_id != push_only.id),
        "Push-only sources should not be polled"
    );

    // listing order is tier then name, so the healthy source comes first
    assert_eq!(outcomes[0].source_id, good.id);
    let report = outcomes[0].report.as_ref().expect("First source should succeed");
    assert_eq!(report.new_count, 1);
    assert!(outcomes[0].error.is_none());

    assert_eq!(outcomes[1].source_id, bad.id);
    assert!(outcomes[1].report.is_none());
    assert!(outcomes[1].error.is_some());

    assert_eq!(store.articles().len(), 1);
    assert!(registry.get(good.id).unwrap().last_fetched_at.is_some());
    assert!(registry.get(bad.id).unwrap().last_error.is_some());

    // the skipped source keeps clean bookkeeping
    let untouched = registry.get(push_only.id).unwrap();
    assert!(untouched.last_error.is_none());
    assert!(untouched.last_fetched_at.is_none());
    Ok(())
}

#[tokio::test]
async fn test_schedule_source_replaces_existing_timer() {
    let mut src = source("alpha", 1);
    src.feed_url = Some("ftp://alpha.example.com/feed".to_string());

    let registry = MemoryRegistry::new(vec![src.clone()]);
    let scheduler = scheduler_for(registry, MemoryStore::new());

    scheduler.schedule_source(src.clone()).await;
    scheduler.schedule_source(src.clone()).await;
    assert_eq!(scheduler.timers().len().await, 1);

    scheduler.stop().await;
    assert!(scheduler.timers().is_empty().await);
}
