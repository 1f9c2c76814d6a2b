use crate::types::{FetchConfig, IngestError, Result};
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

/// Retrieves raw feed documents over HTTP. Transport timeout, redirect cap
/// and compression all live on the client; transient failures retry with
/// exponential backoff up to the configured attempt count.
#[derive(Clone)]
pub struct FeedFetcher {
    client: Client,
    config: FetchConfig,
}

impl FeedFetcher {
    pub fn new(config: FetchConfig) -> Self {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    /// Fetch one feed document as text. Any failure here is feed-level: the
    /// caller decides what it means for the source.
    pub async fn fetch_document(&self, url: &str) -> Result<String> {
        validate_feed_url(url)?;

        debug!("Fetching feed: {}", url);

        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 32),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.config.retry_delay_seconds * 60)),
            ..Default::default()
        };

        let mut attempt = 0;
        loop {
            match self.try_fetch(url).await {
                Ok(body) => {
                    info!("Fetched feed: {} ({} bytes)", url, body.len());
                    return Ok(body);
                }
                Err(e) => {
                    attempt += 1;
                    let delay = if attempt <= self.config.max_retries {
                        backoff.next_backoff()
                    } else {
                        None
                    };
                    match delay {
                        Some(delay) => {
                            warn!("Attempt {} failed for {}, retrying in {:?}: {}", attempt, url, delay, e);
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            error!("Failed to fetch feed after {} attempts: {}", attempt, url);
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    async fn try_fetch(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(IngestError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.text().await?)
    }
}

fn validate_feed_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url)?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(IngestError::UnsupportedScheme(parsed.scheme().to_string()));
    }
    Ok(())
}
