use crate::events::IngestEvent;
use crate::types::{Article, CandidateItem, Source, StoreError};
use async_trait::async_trait;
use uuid::Uuid;

/// Read/bookkeeping access to the source registry. Source management itself
/// (create/update/tiering) lives outside the ingestion core; the core only
/// lists what to poll and records the outcome of each attempt.
#[async_trait]
pub trait SourceRegistry: Send + Sync {
    async fn list_active_sources(&self) -> std::result::Result<Vec<Source>, StoreError>;

    async fn get_source(&self, id: Uuid) -> std::result::Result<Source, StoreError>;

    /// Record a successful poll: sets `last_fetched_at`, clears any error.
    async fn mark_fetch_succeeded(&self, id: Uuid) -> std::result::Result<(), StoreError>;

    /// Record a feed-level failure without touching `last_fetched_at`.
    async fn mark_fetch_failed(&self, id: Uuid, message: &str) -> std::result::Result<(), StoreError>;
}

/// Article persistence as seen by the ingestion engine. `create_article`
/// must surface a canonical-URL uniqueness violation as
/// `StoreError::DuplicateUrl` so the caller can treat it as "already exists".
#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn find_article_by_url(&self, url: &str) -> std::result::Result<Option<Article>, StoreError>;

    async fn create_article(
        &self,
        source_id: Uuid,
        item: &CandidateItem,
    ) -> std::result::Result<Article, StoreError>;
}

/// Boundary to external pub/sub. Injected rather than global so the core has
/// no hidden dependency on a specific transport; publishing is infallible
/// from the core's point of view (a publisher may drop events it cannot
/// deliver).
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: IngestEvent);
}
