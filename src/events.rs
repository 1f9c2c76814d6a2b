use crate::traits::EventPublisher;
use crate::types::Article;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// Events emitted by the ingestion core after successful persistence.
/// `ArticleCreated` fires once per newly stored article; `SourceFeedFetched`
/// fires once per run that yielded at least one new article.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IngestEvent {
    ArticleCreated {
        article: Article,
        source_id: Uuid,
    },
    SourceFeedFetched {
        source_id: Uuid,
        source_name: String,
        new_articles_count: usize,
        timestamp: DateTime<Utc>,
    },
}

/// Fan-out publisher over a tokio broadcast channel. Sends are lossy: with
/// no subscribers (or a lagging one) events are dropped rather than blocking
/// the ingestion path.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<IngestEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, event: IngestEvent) {
        // Err only means nobody is listening right now
        let _ = self.tx.send(event);
    }
}

/// Publisher for headless runs (CLI one-shots): just logs each event.
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: IngestEvent) {
        match &event {
            IngestEvent::ArticleCreated { article, source_id } => {
                debug!(
                    "Article created: {} ({}) for source {}",
                    article.title, article.original_url, source_id
                );
            }
            IngestEvent::SourceFeedFetched {
                source_name,
                new_articles_count,
                ..
            } => {
                info!("Source {}: {} new articles", source_name, new_articles_count);
            }
        }
    }
}
