///! Rate-limited, retrying HTTP transport for the catalog and geocoding services
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::CatalogConfig;
use crate::error::{ChirpError, Result};

/// A response the remote side actually gave, successful or not.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub body: String,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Anything that can turn a URL into a page.
///
/// `Err` is reserved for transient failures that outlived every retry; a
/// definitive answer such as 404 comes back as `Ok` with that status.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

#[derive(Debug, Clone)]
pub struct FetcherOptions {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Minimum interval between any two requests leaving this fetcher
    pub request_delay: Duration,
}

impl From<&CatalogConfig> for FetcherOptions {
    fn from(config: &CatalogConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            request_delay: Duration::from_millis(config.request_delay_ms),
        }
    }
}

/// Hands out request slots spaced `interval` apart.
///
/// Slots are reserved under the lock and waited for outside it, so the spacing
/// holds for the aggregate rate no matter how many probes run at once.
pub struct Pacer {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    pub async fn wait(&self) {
        if self.interval.is_zero() {
            return;
        }

        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(t) if t > now => t,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };

        tokio::time::sleep_until(slot).await;
    }
}

pub struct HttpFetcher {
    client: reqwest::Client,
    pacer: Pacer,
    max_attempts: u32,
    retry_delay: Duration,
}

impl HttpFetcher {
    pub fn new(options: FetcherOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(options.user_agent.clone())
            .build()
            .map_err(|e| ChirpError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            pacer: Pacer::new(options.request_delay),
            max_attempts: options.max_attempts.max(1),
            retry_delay: options.retry_delay,
        })
    }

    pub fn from_config(config: &CatalogConfig) -> Result<Self> {
        Self::new(FetcherOptions::from(config))
    }

    /// One request. `Err` carries the reason when the attempt may be retried.
    async fn attempt(&self, url: &str) -> std::result::Result<FetchedPage, String> {
        self.pacer.wait().await;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(format!("HTTP {}", status));
        }

        let body = response
            .text()
            .await
            .map_err(|e| format!("failed to read body: {}", e))?;

        Ok(FetchedPage {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl PageSource for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let delay = self.retry_delay * (attempt - 1);
                tracing::debug!(
                    "Retrying {} after {:?} (attempt {}/{})",
                    url,
                    delay,
                    attempt,
                    self.max_attempts
                );
                tokio::time::sleep(delay).await;
            }

            match self.attempt(url).await {
                Ok(page) => {
                    tracing::debug!("GET {} -> {}", url, page.status);
                    return Ok(page);
                }
                Err(message) => {
                    tracing::warn!(
                        "Attempt {}/{} failed for {}: {}",
                        attempt,
                        self.max_attempts,
                        url,
                        message
                    );
                    last_error = message;
                }
            }
        }

        Err(ChirpError::TransientFetch {
            url: url.to_string(),
            attempts: self.max_attempts,
            message: last_error,
        })
    }
}
