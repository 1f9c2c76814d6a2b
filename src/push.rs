use crate::ingest::IngestEngine;
use crate::normalizer::FeedNormalizer;
use crate::traits::SourceRegistry;
use crate::types::{FetchReport, IngestError, Result, Source};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Answer a hub's subscription handshake: echo the challenge back for a
/// subscribe or unsubscribe that names a topic, reject anything else.
pub fn verify_subscription(mode: &str, topic: &str, challenge: &str) -> Result<String> {
    match mode {
        "subscribe" | "unsubscribe" => {
            if topic.is_empty() {
                return Err(IngestError::Verification(format!(
                    "{} request without a topic",
                    mode
                )));
            }
            info!("Confirming {} for topic {}", mode, topic);
            Ok(challenge.to_string())
        }
        other => Err(IngestError::Verification(format!(
            "Unsupported verification mode: {}",
            other
        ))),
    }
}

/// Hub-pushed feed documents enter here. Convergent with the polling path:
/// same normalization, same dedup, same events, same source bookkeeping.
#[derive(Clone)]
pub struct PushIngestor {
    registry: Arc<dyn SourceRegistry>,
    normalizer: FeedNormalizer,
    engine: IngestEngine,
}

impl PushIngestor {
    pub fn new(registry: Arc<dyn SourceRegistry>, engine: IngestEngine) -> Self {
        Self {
            registry,
            normalizer: FeedNormalizer::new(),
            engine,
        }
    }

    /// Ingest a pushed feed document for the identified source. An unknown
    /// source propagates untouched; any failure after the lookup is recorded
    /// on the source before propagating.
    pub async fn ingest_notification(&self, source_id: Uuid, body: &str) -> Result<FetchReport> {
        let source = self.registry.get_source(source_id).await?;
        info!(
            "Push notification for source {} ({} bytes)",
            source.name,
            body.len()
        );
        match self.process(&source, body).await {
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
                    warn!("Could not record push error for source {}: {}", source.id, mark_err);
                }
                Err(e)
            }
        }
    }

    async fn process(&self, source: &Source, body: &str) -> Result<FetchReport> {
        let batch = self.normalizer.normalize(source, body, Utc::now())?;
        self.engine.ingest_batch(source, batch).await
    }
}
