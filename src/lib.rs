pub mod types;
pub mod traits;
pub mod config;
pub mod events;
pub mod fetcher;
pub mod normalizer;
pub mod ingest;
pub mod scheduler;
pub mod push;
pub mod store;
pub mod api;

pub use types::*;
pub use traits::{ArticleStore, EventPublisher, SourceRegistry};
pub use config::AppConfig;
pub use events::{BroadcastPublisher, IngestEvent, LogPublisher};
pub use fetcher::FeedFetcher;
pub use normalizer::FeedNormalizer;
pub use ingest::IngestEngine;
pub use scheduler::{poll_interval_ms, poll_timer_key, PollScheduler, TimerRegistry, POLL_TIMER_PREFIX};
pub use push::{verify_subscription, PushIngestor};
pub use store::PgStore;
pub use api::AppState;
