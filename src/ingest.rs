use crate::events::IngestEvent;
use crate::traits::{ArticleStore, EventPublisher};
use crate::types::{FetchReport, NormalizedBatch, Result, Source, StoreError};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Converts candidate items into persisted articles exactly once, no matter
/// how many overlapping runs see the same URLs. The lookup is an
/// optimization only: the store's uniqueness constraint is the authority,
/// and a `DuplicateUrl` on create is a benign "already exists".
#[derive(Clone)]
pub struct IngestEngine {
    store: Arc<dyn ArticleStore>,
    events: Arc<dyn EventPublisher>,
}

impl IngestEngine {
    pub fn new(store: Arc<dyn ArticleStore>, events: Arc<dyn EventPublisher>) -> Self {
        Self { store, events }
    }

    /// Persist the new candidates of one batch, in document order, and emit
    /// events for what was created. Item-level errors ride along in the
    /// report; store failures other than a duplicate abort the run.
    pub async fn ingest_batch(&self, source: &Source, batch: NormalizedBatch) -> Result<FetchReport> {
        let NormalizedBatch { candidates, errors } = batch;
        let fetched_count = candidates.len() + errors.len();
        let mut new_count = 0;

        for item in &candidates {
            if self.store.find_article_by_url(&item.link).await?.is_some() {
                debug!("Skipping existing article: {}", item.link);
                continue;
            }

            match self.store.create_article(source.id, item).await {
                Ok(article) => {
                    new_count += 1;
                    self.events
                        .publish(IngestEvent::ArticleCreated {
                            article,
                            source_id: source.id,
                        })
                        .await;
                }
                Err(StoreError::DuplicateUrl { url }) => {
                    // Concurrent run won the insert race; same outcome as
                    // finding it in the lookup.
                    debug!("Article already stored by another run: {}", url);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if new_count > 0 {
            self.events
                .publish(IngestEvent::SourceFeedFetched {
                    source_id: source.id,
                    source_name: source.name.clone(),
                    new_articles_count: new_count,
                    timestamp: Utc::now(),
                })
                .await;
        }

        info!(
            "Source {}: {} fetched, {} new, {} item errors",
            source.name,
            fetched_count,
            new_count,
            errors.len()
        );

        Ok(FetchReport {
            fetched_count,
            new_count,
            errors,
        })
    }
}
