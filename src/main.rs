use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feed_ingestor::{
    api, AppConfig, AppState, BroadcastPublisher, FeedFetcher, IngestEngine, LogPublisher,
    PgStore, PollScheduler, PushIngestor, SourceRegistry,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "feed-ingestor")]
#[command(about = "Tiered feed polling and ingestion service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the scheduler and HTTP API until interrupted
    Serve,
    /// Poll every active source once and exit
    PollAll,
    /// Poll a single source once and exit
    Poll { source_id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,reqwest=warn,hyper=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = AppConfig::from_env();

    let store = PgStore::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    store
        .ensure_schema()
        .await
        .context("Failed to ensure database schema")?;
    info!("Connected to database");

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, store).await,
        Commands::PollAll => poll_all(config, store).await,
        Commands::Poll { source_id } => poll_one(config, store, source_id).await,
    }
}

async fn serve(config: AppConfig, store: PgStore) -> Result<()> {
    let store = Arc::new(store);
    let publisher = Arc::new(BroadcastPublisher::new(config.event_capacity));

    // keep one subscriber attached so events show up in the logs even when
    // no external consumer is connected
    let mut events = publisher.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!("Event: {:?}", event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event log subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let fetcher = FeedFetcher::new(config.fetch.clone());
    let engine = IngestEngine::new(store.clone(), publisher);
    let scheduler = PollScheduler::new(store.clone(), fetcher, engine.clone());
    let push = PushIngestor::new(store.clone(), engine);

    scheduler.start().await.context("Failed to start polling")?;

    let state = AppState {
        scheduler: scheduler.clone(),
        push,
        registry: store,
    };
    api::serve(state, &config.bind_addr)
        .await
        .context("Server error")?;

    scheduler.stop().await;
    info!("Server shutdown complete");
    Ok(())
}

async fn poll_all(config: AppConfig, store: PgStore) -> Result<()> {
    let scheduler = build_scheduler(&config, store);
    let outcomes = scheduler.poll_all().await?;
    for outcome in &outcomes {
        match (&outcome.report, &outcome.error) {
            (Some(report), _) => info!(
                "{}: {} fetched, {} new, {} item errors",
                outcome.source_name,
                report.fetched_count,
                report.new_count,
                report.errors.len()
            ),
            (None, Some(message)) => error!("{}: {}", outcome.source_name, message),
            (None, None) => {}
        }
    }
    Ok(())
}

async fn poll_one(config: AppConfig, store: PgStore, source_id: Uuid) -> Result<()> {
    let source = store.get_source(source_id).await?;
    let scheduler = build_scheduler(&config, store);
    let report = scheduler.poll_one(&source).await?;
    info!(
        "{}: {} fetched, {} new, {} item errors",
        source.name,
        report.fetched_count,
        report.new_count,
        report.errors.len()
    );
    Ok(())
}

fn build_scheduler(config: &AppConfig, store: PgStore) -> PollScheduler {
    let store = Arc::new(store);
    let publisher = Arc::new(LogPublisher);
    let fetcher = FeedFetcher::new(config.fetch.clone());
    let engine = IngestEngine::new(store.clone(), publisher);
    PollScheduler::new(store, fetcher, engine)
}
