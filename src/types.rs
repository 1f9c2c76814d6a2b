use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A feed source as held by the source registry. The ingestion core reads
/// these and writes back only the fetch/error bookkeeping fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub feed_url: Option<String>,
    pub tier: i32,
    pub is_active: bool,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

/// One normalized feed entry, prior to the dedup decision. Never persisted
/// directly; the ingestion engine turns these into articles.
#[derive(Debug, Clone)]
pub struct CandidateItem {
    pub title: String,
    pub link: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub published_at: DateTime<Utc>,
    pub image_url: Option<String>,
    pub author: Option<String>,
    pub tags: Vec<String>,
}

/// A persisted article. `original_url` is unique across all articles; the
/// store enforces it and the ingestion engine relies on that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub source_id: Uuid,
    pub title: String,
    pub original_url: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub image_url: Option<String>,
    pub author: Option<String>,
    pub published_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Output of the normalizer: the candidates that survived plus one error
/// string per rejected item. Entries are never silently dropped.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub candidates: Vec<CandidateItem>,
    pub errors: Vec<String>,
}

/// Per-run result summary. `fetched_count` always equals candidates seen
/// plus rejected items. Used for logging and tests only, never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchReport {
    pub fetched_count: usize,
    pub new_count: usize,
    pub errors: Vec<String>,
}

/// One entry of a bulk poll run: either a report or the feed-level error
/// that failed this source, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOutcome {
    pub source_id: Uuid,
    pub source_name: String,
    pub report: Option<FetchReport>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "feed-ingestor/0.1".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 5,
            max_redirects: 5,
        }
    }
}

/// Errors surfaced by the persistence boundary. A uniqueness violation on
/// article creation is reported distinguishably so the ingestion engine can
/// treat it as "already exists" instead of a failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Article already exists: {url}")]
    DuplicateUrl { url: String },

    #[error("Source not found: {id}")]
    SourceNotFound { id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Source has no feed URL: {id}")]
    NoFeedUrl { id: Uuid },

    #[error("Invalid verification request: {0}")]
    Verification(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;
