#![allow(dead_code)]

// Re-export commonly used types so test files import from one place
pub use feed_ingestor::{
    Article, ArticleStore, CandidateItem, EventPublisher, FetchConfig, IngestEngine, IngestEvent,
    Source, SourceRegistry, StoreError,
};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Build an active source with a plausible feed URL. Tests override fields
/// they care about.
pub fn source(name: &str, tier: i32) -> Source {
    Source {
        id: Uuid::new_v4(),
        name: name.to_string(),
        url: format!("https://{}.example.com", name),
        feed_url: Some(format!("https://{}.example.com/feed.xml", name)),
        tier,
        is_active: true,
        last_fetched_at: None,
        last_error: None,
        last_error_at: None,
    }
}

/// In-memory source registry with the same bookkeeping semantics as the
/// Postgres one.
pub struct MemoryRegistry {
    sources: Mutex<HashMap<Uuid, Source>>,
}

impl MemoryRegistry {
    pub fn new(sources: Vec<Source>) -> Arc<Self> {
        let map = sources.into_iter().map(|s| (s.id, s)).collect();
        Arc::new(Self {
            sources: Mutex::new(map),
        })
    }

    pub fn get(&self, id: Uuid) -> Option<Source> {
        self.sources.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl SourceRegistry for MemoryRegistry {
    async fn list_active_sources(&self) -> Result<Vec<Source>, StoreError> {
        let mut sources: Vec<Source> = self
            .sources
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.is_active)
            .cloned()
            .collect();
        sources.sort_by(|a, b| a.tier.cmp(&b.tier).then_with(|| a.name.cmp(&b.name)));
        Ok(sources)
    }

    async fn get_source(&self, id: Uuid) -> Result<Source, StoreError> {
        self.sources
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(StoreError::SourceNotFound { id })
    }

    async fn mark_fetch_succeeded(&self, id: Uuid) -> Result<(), StoreError> {
        let mut sources = self.sources.lock().unwrap();
        let source = sources.get_mut(&id).ok_or(StoreError::SourceNotFound { id })?;
        source.last_fetched_at = Some(Utc::now());
        source.last_error = None;
        source.last_error_at = None;
        Ok(())
    }

    async fn mark_fetch_failed(&self, id: Uuid, message: &str) -> Result<(), StoreError> {
        let mut sources = self.sources.lock().unwrap();
        let source = sources.get_mut(&id).ok_or(StoreError::SourceNotFound { id })?;
        source.last_error = Some(message.to_string());
        source.last_error_at = Some(Utc::now());
        Ok(())
    }
}

/// In-memory article store that enforces `original_url` uniqueness the way
/// the database index does.
#[derive(Default)]
pub struct MemoryStore {
    articles: Mutex<Vec<Article>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn articles(&self) -> Vec<Article> {
        self.articles.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn find_article_by_url(&self, url: &str) -> Result<Option<Article>, StoreError> {
        Ok(self
            .articles
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.original_url == url)
            .cloned())
    }

    async fn create_article(
        &self,
        source_id: Uuid,
        item: &CandidateItem,
    ) -> Result<Article, StoreError> {
        let mut articles = self.articles.lock().unwrap();
        if articles.iter().any(|a| a.original_url == item.link) {
            return Err(StoreError::DuplicateUrl {
                url: item.link.clone(),
            });
        }
        let article = Article {
            id: Uuid::new_v4(),
            source_id,
            title: item.title.clone(),
            original_url: item.link.clone(),
            content: item.content.clone(),
            summary: item.summary.clone(),
            image_url: item.image_url.clone(),
            author: item.author.clone(),
            published_at: item.published_at,
            tags: item.tags.clone(),
            created_at: Utc::now(),
        };
        articles.push(article.clone());
        Ok(article)
    }
}

/// Publisher that records every event for assertions.
#[derive(Default)]
pub struct CapturingPublisher {
    events: Mutex<Vec<IngestEvent>>,
}

impl CapturingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<IngestEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for CapturingPublisher {
    async fn publish(&self, event: IngestEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Minimal RSS 2.0 document wrapping the given item markup.
pub fn rss_document(items: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:content="http://purl.org/rss/1.0/modules/content/">
<channel>
<title>Test Feed</title>
<link>https://feed.example.com</link>
<description>Feed for tests</description>
{}
</channel>
</rss>"#,
        items
    )
}

/// One RSS item; pass `None` for the link to produce a rejectable entry.
pub fn rss_item(title: &str, link: Option<&str>) -> String {
    let link_tag = link
        .map(|l| format!("<link>{}</link>", l))
        .unwrap_or_default();
    format!(
        "<item><title>{}</title>{}<description>Item description.</description><pubDate>Mon, 06 Jan 2025 10:00:00 GMT</pubDate></item>",
        title, link_tag
    )
}

/// Re-check `check` every 10ms until it holds or about two seconds pass.
pub async fn wait_until<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}
