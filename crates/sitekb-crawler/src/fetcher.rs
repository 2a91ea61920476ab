//! HTTP page fetching.
//!
//! Transient failures (connect errors, timeouts, 429 and 5xx) are retried
//! with exponential backoff; other 4xx responses fail immediately.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

use sitekb_core::{defaults, Error, Result};

/// A fetched HTML page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects.
    pub final_url: Url,
    pub status: u16,
    pub body: String,
}

/// Fetches one page. Implemented over HTTP and by test doubles.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage>;
}

/// Fetcher configuration.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_redirects: usize,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::CRAWL_USER_AGENT.to_string(),
            timeout: Duration::from_secs(defaults::CRAWL_TIMEOUT_SECS),
            max_redirects: defaults::CRAWL_MAX_REDIRECTS,
            max_retries: 2,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(10),
        }
    }
}

impl FetcherConfig {
    /// Read `CRAWL_USER_AGENT` and `CRAWL_TIMEOUT_SECS`, keeping defaults otherwise.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(ua) = std::env::var("CRAWL_USER_AGENT") {
            if !ua.trim().is_empty() {
                config.user_agent = ua;
            }
        }
        if let Some(secs) = std::env::var("CRAWL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.timeout = Duration::from_secs(secs.max(1));
        }
        config
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        std::cmp::min(self.retry_base_delay.saturating_mul(factor), self.retry_max_delay)
    }
}

/// Outcome of a single attempt.
enum Attempt {
    Done(FetchedPage),
    Retry(Error),
    Fatal(Error),
}

/// `reqwest`-backed fetcher.
pub struct HttpFetcher {
    client: Client,
    config: FetcherConfig,
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn attempt(&self, url: &Url) -> Attempt {
        let response = match self.client.get(url.as_str()).send().await {
            Ok(r) => r,
            Err(e) => return Attempt::Retry(Error::Crawl(format!("{url}: {e}"))),
        };

        let status = response.status();
        if !status.is_success() {
            let err = Error::Crawl(format!("{url}: HTTP {status}"));
            return if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                Attempt::Retry(err)
            } else {
                Attempt::Fatal(err)
            };
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase);
        if let Some(ct) = &content_type {
            if !ct.contains("html") && !ct.starts_with("text/plain") {
                return Attempt::Fatal(Error::Crawl(format!(
                    "{url}: unsupported content type {ct}"
                )));
            }
        }

        let final_url = response.url().clone();
        match response.text().await {
            Ok(body) => Attempt::Done(FetchedPage {
                final_url,
                status: status.as_u16(),
                body,
            }),
            Err(e) => Attempt::Retry(Error::Crawl(format!("{url}: body read failed: {e}"))),
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage> {
        let mut retry = 0;
        loop {
            match self.attempt(url).await {
                Attempt::Done(page) => {
                    debug!(
                        subsystem = "crawler",
                        component = "fetcher",
                        url = %url,
                        status = page.status,
                        bytes = page.body.len(),
                        "Fetched page"
                    );
                    return Ok(page);
                }
                Attempt::Fatal(e) => return Err(e),
                Attempt::Retry(e) if retry >= self.config.max_retries => return Err(e),
                Attempt::Retry(e) => {
                    retry += 1;
                    let delay = self.config.backoff(retry);
                    warn!(
                        subsystem = "crawler",
                        component = "fetcher",
                        url = %url,
                        attempt = retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying page fetch"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(
            FetcherConfig::default()
                .with_max_retries(2)
                .with_retry_base_delay(Duration::from_millis(1)),
        )
        .unwrap()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = FetcherConfig::default();
        assert_eq!(config.backoff(1), Duration::from_secs(1));
        assert_eq!(config.backoff(2), Duration::from_secs(2));
        assert_eq!(config.backoff(3), Duration::from_secs(4));
        assert_eq!(config.backoff(10), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><body>Hi</body></html>", "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
        let page = fetcher().fetch(&url).await.unwrap();
        assert_eq!(page.status, 200);
        assert!(page.body.contains("Hi"));
        assert_eq!(page.final_url, url);
    }

    #[tokio::test]
    async fn test_fetch_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/flaky", server.uri())).unwrap();
        let err = fetcher().fetch(&url).await.unwrap_err();
        assert!(matches!(err, Error::Crawl(_)));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_fetch_does_not_retry_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
        assert!(fetcher().fetch(&url).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_rejects_binary_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(vec![0x25, 0x50, 0x44, 0x46], "application/pdf"),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/doc", server.uri())).unwrap();
        let err = fetcher().fetch(&url).await.unwrap_err();
        assert!(err.to_string().contains("unsupported content type"));
    }
}
