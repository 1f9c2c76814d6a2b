use crate::traits::{ArticleStore, SourceRegistry};
use crate::types::{Article, CandidateItem, Source, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

/// Postgres-backed source registry and article store. Uniqueness of
/// `articles.original_url` is enforced by the database, not by callers.
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let db = PgPool::connect(database_url).await?;
        Ok(Self { db })
    }

    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }

    /// Create all tables and indexes if missing. Safe to run on every boot.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                feed_url TEXT,
                tier INTEGER NOT NULL DEFAULT 4,
                is_active BOOLEAN NOT NULL DEFAULT true,
                last_fetched_at TIMESTAMP WITH TIME ZONE,
                last_error TEXT,
                last_error_at TIMESTAMP WITH TIME ZONE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id UUID PRIMARY KEY,
                source_id UUID NOT NULL REFERENCES sources(id),
                title TEXT NOT NULL,
                original_url TEXT NOT NULL,
                content TEXT,
                summary TEXT,
                image_url TEXT,
                author TEXT,
                published_at TIMESTAMP WITH TIME ZONE NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tags (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                name TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS article_tags (
                article_id UUID NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
                tag_id UUID NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                PRIMARY KEY (article_id, tag_id)
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        // the ingestion engine's dedup guarantee rests on this index
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_articles_original_url ON articles (original_url)",
        )
        .execute(&self.db)
        .await?;

        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_tags_name ON tags (name)")
            .execute(&self.db)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_source_id ON articles (source_id)")
            .execute(&self.db)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_published_at ON articles (published_at)")
            .execute(&self.db)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_active ON sources (is_active)")
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Insert a source for operational seeding. The id is generated here.
    pub async fn add_source(
        &self,
        name: &str,
        url: &str,
        feed_url: Option<&str>,
        tier: i32,
    ) -> Result<Source, StoreError> {
        let source = Source {
            id: Uuid::new_v4(),
            name: name.to_string(),
            url: url.to_string(),
            feed_url: feed_url.map(|s| s.to_string()),
            tier,
            is_active: true,
            last_fetched_at: None,
            last_error: None,
            last_error_at: None,
        };
        sqlx::query(
            r#"
            INSERT INTO sources (id, name, url, feed_url, tier, is_active)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(source.id)
        .bind(&source.name)
        .bind(&source.url)
        .bind(&source.feed_url)
        .bind(source.tier)
        .bind(source.is_active)
        .execute(&self.db)
        .await?;
        info!("Added source {} ({})", source.name, source.id);
        Ok(source)
    }

    pub async fn set_source_active(&self, id: Uuid, is_active: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE sources SET is_active = $2 WHERE id = $1")
            .bind(id)
            .bind(is_active)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::SourceNotFound { id });
        }
        Ok(())
    }

    async fn article_tags(&self, article_id: Uuid) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT t.name FROM tags t
            JOIN article_tags link ON link.tag_id = t.id
            WHERE link.article_id = $1
            ORDER BY t.name
            "#,
        )
        .bind(article_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(|r| r.get("name")).collect())
    }
}

fn source_from_row(row: &PgRow) -> Result<Source, sqlx::Error> {
    Ok(Source {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        feed_url: row.try_get("feed_url")?,
        tier: row.try_get("tier")?,
        is_active: row.try_get("is_active")?,
        last_fetched_at: row.try_get::<Option<DateTime<Utc>>, _>("last_fetched_at")?,
        last_error: row.try_get("last_error")?,
        last_error_at: row.try_get::<Option<DateTime<Utc>>, _>("last_error_at")?,
    })
}

fn article_from_row(row: &PgRow, tags: Vec<String>) -> Result<Article, sqlx::Error> {
    Ok(Article {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        title: row.try_get("title")?,
        original_url: row.try_get("original_url")?,
        content: row.try_get("content")?,
        summary: row.try_get("summary")?,
        image_url: row.try_get("image_url")?,
        author: row.try_get("author")?,
        published_at: row.try_get::<DateTime<Utc>, _>("published_at")?,
        tags,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

#[async_trait]
impl SourceRegistry for PgStore {
    async fn list_active_sources(&self) -> Result<Vec<Source>, StoreError> {
        let rows = sqlx::query("SELECT * FROM sources WHERE is_active = true ORDER BY tier, name")
            .fetch_all(&self.db)
            .await?;
        let mut sources = Vec::with_capacity(rows.len());
        for row in rows {
            sources.push(source_from_row(&row)?);
        }
        Ok(sources)
    }

    async fn get_source(&self, id: Uuid) -> Result<Source, StoreError> {
        let row = sqlx::query("SELECT * FROM sources WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        match row {
            Some(row) => Ok(source_from_row(&row)?),
            None => Err(StoreError::SourceNotFound { id }),
        }
    }

    async fn mark_fetch_succeeded(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE sources
            SET last_fetched_at = NOW(), last_error = NULL, last_error_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn mark_fetch_failed(&self, id: Uuid, message: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE sources SET last_error = $2, last_error_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(message)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ArticleStore for PgStore {
    async fn find_article_by_url(&self, url: &str) -> Result<Option<Article>, StoreError> {
        let row = sqlx::query("SELECT * FROM articles WHERE original_url = $1")
            .bind(url)
            .fetch_optional(&self.db)
            .await?;
        match row {
            Some(row) => {
                let tags = self.article_tags(row.try_get("id")?).await?;
                Ok(Some(article_from_row(&row, tags)?))
            }
            None => Ok(None),
        }
    }

    /// Insert the article and its tags in one transaction. A unique-index
    /// violation on `original_url` comes back as `DuplicateUrl`; the losing
    /// side of a concurrent insert race lands here.
    async fn create_article(
        &self,
        source_id: Uuid,
        item: &CandidateItem,
    ) -> Result<Article, StoreError> {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO articles (id, source_id, title, original_url, content, summary, image_url, author, published_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(id)
        .bind(source_id)
        .bind(&item.title)
        .bind(&item.link)
        .bind(&item.content)
        .bind(&item.summary)
        .bind(&item.image_url)
        .bind(&item.author)
        .bind(item.published_at)
        .bind(created_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_unique_violation() {
                    return Err(StoreError::DuplicateUrl {
                        url: item.link.clone(),
                    });
                }
            }
            return Err(e.into());
        }

        for tag in &item.tags {
            sqlx::query("INSERT INTO tags (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
                .bind(tag)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                r#"
                INSERT INTO article_tags (article_id, tag_id)
                SELECT $1, id FROM tags WHERE name = $2
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(id)
            .bind(tag)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(Article {
            id,
            source_id,
            title: item.title.clone(),
            original_url: item.link.clone(),
            content: item.content.clone(),
            summary: item.summary.clone(),
            image_url: item.image_url.clone(),
            author: item.author.clone(),
            published_at: item.published_at,
            tags: item.tags.clone(),
            created_at,
        })
    }
}
