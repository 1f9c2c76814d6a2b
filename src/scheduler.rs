use crate::fetcher::FeedFetcher;
use crate::ingest::IngestEngine;
use crate::normalizer::FeedNormalizer;
use crate::traits::SourceRegistry;
use crate::types::{FetchReport, IngestError, PollOutcome, Result, Source};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const POLL_TIMER_PREFIX: &str = "poll-";

/// Polling cadence for a tier. Anything outside the known tiers gets the
/// slowest cadence.
pub fn poll_interval_ms(tier: i32) -> u64 {
    match tier {
        1 => 300000,  // 5 minutes
        2 => 600000,  // 10 minutes
        3 => 1800000, // 30 minutes
        _ => 3600000, // 60 minutes, also the default for unknown tiers
    }
}

pub fn poll_timer_key(source_id: Uuid) -> String {
    format!("{}{}", POLL_TIMER_PREFIX, source_id)
}

/// Arena of named repeating-task handles. At most one live handle per key:
/// registering a key again aborts whatever was there.
pub struct TimerRegistry {
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self {
            timers: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register(&self, key: String, handle: JoinHandle<()>) {
        let mut timers = self.timers.lock().await;
        if let Some(previous) = timers.insert(key.clone(), handle) {
            debug!("Replacing timer: {}", key);
            previous.abort();
        }
    }

    /// Abort and drop every handle whose key starts with `prefix`. Safe to
    /// call with nothing registered.
    pub async fn cancel_prefix(&self, prefix: &str) -> usize {
        let mut timers = self.timers.lock().await;
        let keys: Vec<String> = timers
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &keys {
            if let Some(handle) = timers.remove(key) {
                handle.abort();
            }
        }
        keys.len()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.timers.lock().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.timers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.timers.lock().await.is_empty()
    }
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Decides when each active source gets fetched and owns the fleet of
/// per-source timers. Every tick spawns its poll instead of awaiting it, so
/// a slow or hung fetch for one source never delays any timer.
#[derive(Clone)]
pub struct PollScheduler {
    registry: Arc<dyn SourceRegistry>,
    fetcher: FeedFetcher,
    normalizer: FeedNormalizer,
    engine: IngestEngine,
    timers: Arc<TimerRegistry>,
}

impl PollScheduler {
    pub fn new(registry: Arc<dyn SourceRegistry>, fetcher: FeedFetcher, engine: IngestEngine) -> Self {
        Self {
            registry,
            fetcher,
            normalizer: FeedNormalizer::new(),
            engine,
            timers: Arc::new(TimerRegistry::new()),
        }
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    /// Load active sources and schedule each one that has a feed URL: an
    /// immediate kick-off poll plus a recurring timer keyed `poll-<id>`.
    pub async fn start(&self) -> Result<()> {
        let sources = self.registry.list_active_sources().await?;
        info!("Scheduling {} active sources", sources.len());
        for source in sources {
            if source.feed_url.is_none() {
                debug!("Source {} has no feed URL, not scheduling", source.name);
                continue;
            }
            self.schedule_source(source).await;
        }
        Ok(())
    }

    /// Register one source's recurring poll, replacing any previous timer
    /// for the same id. The first poll fires now, without being awaited.
    pub async fn schedule_source(&self, source: Source) {
        let interval_ms = poll_interval_ms(source.tier);
        info!(
            "Scheduling source {} ({}) every {}ms (tier {})",
            source.name, source.id, interval_ms, source.tier
        );

        let scheduler = self.clone();
        let kickoff = source.clone();
        tokio::spawn(async move {
            scheduler.poll_logged(&kickoff).await;
        });

        let key = poll_timer_key(source.id);
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            // the first tick completes immediately; the kick-off poll above
            // already covers it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let scheduler = scheduler.clone();
                let source = source.clone();
                tokio::spawn(async move {
                    scheduler.poll_logged(&source).await;
                });
            }
        });
        self.timers.register(key, handle).await;
    }

    /// Cancel every polling timer. Idempotent: fine to call repeatedly or
    /// with nothing scheduled.
    pub async fn stop(&self) {
        let cancelled = self.timers.cancel_prefix(POLL_TIMER_PREFIX).await;
        info!("Stopped polling ({} timers cancelled)", cancelled);
    }

    /// One full poll of one source. Success updates `last_fetched_at`;
    /// failure records the error on the source and propagates, leaving the
    /// recovery policy to the caller.
    pub async fn poll_one(&self, source: &Source) -> Result<FetchReport> {
        match self.fetch_and_ingest(source).await {
            Ok(report) => {
                self.registry.mark_fetch_succeeded(source.id).await?;
                Ok(report)
            }
            Err(e) => {
                if let Err(mark_err) = self
                    .registry
                    .mark_fetch_failed(source.id, &e.to_string())
                    .await
                {
                    warn!("Could not record fetch error for source {}: {}", source.id, mark_err);
                }
                Err(e)
            }
        }
    }

    /// Manual bulk run over the active sources that have a feed URL, one
    /// outcome per polled source. Push-only sources are skipped just as in
    /// `start`; a failing source never aborts the rest of the batch.
    pub async fn poll_all(&self) -> Result<Vec<PollOutcome>> {
        let sources = self.registry.list_active_sources().await?;
        let mut outcomes = Vec::with_capacity(sources.len());
        for source in sources {
            if source.feed_url.is_none() {
                debug!("Source {} has no feed URL, not polling", source.name);
                continue;
            }
            match self.poll_one(&source).await {
                Ok(report) => outcomes.push(PollOutcome {
                    source_id: source.id,
                    source_name: source.name,
                    report: Some(report),
                    error: None,
                }),
                Err(e) => {
                    error!("Failed to poll source {} ({}): {}", source.name, source.id, e);
                    outcomes.push(PollOutcome {
                        source_id: source.id,
                        source_name: source.name,
                        report: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        Ok(outcomes)
    }

    async fn poll_logged(&self, source: &Source) {
        if let Err(e) = self.poll_one(source).await {
            error!("Poll failed for source {} ({}): {}", source.name, source.id, e);
        }
    }

    async fn fetch_and_ingest(&self, source: &Source) -> Result<FetchReport> {
        let feed_url = source
            .feed_url
            .as_deref()
            .ok_or(IngestError::NoFeedUrl { id: source.id })?;
        let raw = self.fetcher.fetch_document(feed_url).await?;
        let batch = self.normalizer.normalize(source, &raw, Utc::now())?;
        self.engine.ingest_batch(source, batch).await
    }
}
