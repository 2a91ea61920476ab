//! Breadth-first crawl orchestration.
//!
//! One crawl is sequential: a single fetch is in flight at a time, spaced by
//! the politeness interval. Each fetched page is handed to a [`PageSink`]
//! before the next fetch starts, and the stop flag is checked between pages,
//! so a stop never interrupts a sink write.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

use sitekb_core::{Error, Result, StopFlag, TaskConfig};

use crate::adapters::{AdapterResolver, ExtractedPage};
use crate::fetcher::PageFetcher;
use crate::scope::{normalize_url, CrawlScope};

type PolitenessLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Which pages a crawl visits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlMode {
    /// Follow in-scope links from the base URL down to `max_depth`.
    Recursive,
    /// Fetch exactly these URLs, following no links.
    Explicit(Vec<Url>),
}

/// Parameters of one crawl.
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub source_name: Option<String>,
    pub base_url: Url,
    pub mode: CrawlMode,
    pub max_depth: u32,
    pub max_pages: usize,
    /// Minimum interval between requests. Zero disables spacing.
    pub rate_limit: Duration,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

fn parse_http_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| Error::InvalidInput(format!("unparseable url {raw:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(Error::InvalidInput(format!("not an http(s) url: {raw:?}"))),
    }
}

impl CrawlRequest {
    /// Recursive crawl of `base_url` with default limits.
    pub fn recursive(base_url: Url) -> Self {
        let defaults = TaskConfig::default();
        Self {
            source_name: None,
            base_url,
            mode: CrawlMode::Recursive,
            max_depth: defaults.max_depth(),
            max_pages: defaults.max_pages(),
            rate_limit: Duration::from_millis(defaults.rate_limit_ms()),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }

    /// Build a request from a task's source URL and config.
    ///
    /// A non-empty `urls` list selects explicit mode. Unparseable or non-http
    /// URLs are `InvalidInput`.
    pub fn from_task(source_url: &str, source_name: Option<&str>, config: &TaskConfig) -> Result<Self> {
        let base_url = parse_http_url(source_url)?;
        let mode = if config.is_explicit() {
            CrawlMode::Explicit(
                config
                    .urls
                    .iter()
                    .map(|u| parse_http_url(u))
                    .collect::<Result<Vec<_>>>()?,
            )
        } else {
            CrawlMode::Recursive
        };
        Ok(Self {
            source_name: source_name.map(String::from),
            base_url,
            mode,
            max_depth: config.max_depth(),
            max_pages: config.max_pages(),
            rate_limit: Duration::from_millis(config.rate_limit_ms()),
            include_patterns: config.include_patterns.clone(),
            exclude_patterns: config.exclude_patterns.clone(),
        })
    }

    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = Some(name.into());
        self
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_pages(mut self, pages: usize) -> Self {
        self.max_pages = pages.max(1);
        self
    }

    pub fn with_rate_limit(mut self, interval: Duration) -> Self {
        self.rate_limit = interval;
        self
    }

    pub fn with_explicit_urls(mut self, urls: Vec<Url>) -> Self {
        self.mode = CrawlMode::Explicit(urls);
        self
    }

    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    pub fn with_include_patterns(mut self, patterns: Vec<String>) -> Self {
        self.include_patterns = patterns;
        self
    }
}

/// A fetched and extracted page.
#[derive(Debug, Clone)]
pub struct CrawledPage {
    /// Normalized URL; the document's dedup key is derived from it.
    pub url: Url,
    pub depth: u32,
    /// Page the link was discovered on.
    pub parent_url: Option<Url>,
    pub adapter: String,
    pub content: ExtractedPage,
}

/// Receives pages as the crawl produces them.
///
/// An `Err` from the sink aborts the crawl; per-page problems the sink can
/// absorb should be counted there instead.
#[async_trait]
pub trait PageSink: Send {
    async fn on_page(&mut self, page: CrawledPage) -> Result<()>;

    async fn on_fetch_failure(&mut self, _url: &Url, _error: &Error) -> Result<()> {
        Ok(())
    }
}

/// Totals for one crawl.
#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    pub pages_fetched: usize,
    pub pages_failed: usize,
    /// Redirects onto an already visited or out-of-scope page.
    pub pages_skipped: usize,
    /// (url, error) per failed fetch.
    pub failures: Vec<(String, String)>,
    pub stopped: bool,
    pub hit_page_limit: bool,
    pub duration: Duration,
}

struct QueuedUrl {
    url: Url,
    depth: u32,
    parent: Option<Url>,
}

/// Breadth-first crawler over a [`PageFetcher`].
pub struct CrawlOrchestrator {
    fetcher: Arc<dyn PageFetcher>,
    adapters: Arc<AdapterResolver>,
}

impl CrawlOrchestrator {
    pub fn new(fetcher: Arc<dyn PageFetcher>, adapters: Arc<AdapterResolver>) -> Self {
        Self { fetcher, adapters }
    }

    #[instrument(
        skip(self, request, sink, stop),
        fields(subsystem = "crawler", component = "orchestrator", base_url = %request.base_url)
    )]
    pub async fn crawl<S>(
        &self,
        request: &CrawlRequest,
        sink: &mut S,
        stop: &StopFlag,
    ) -> Result<CrawlSummary>
    where
        S: PageSink + ?Sized,
    {
        let started = Instant::now();
        let adapter = self.adapters.resolve(request.source_name.as_deref());
        let scope = CrawlScope::new(
            &request.base_url,
            &request.include_patterns,
            &request.exclude_patterns,
        );
        let limiter: Option<PolitenessLimiter> =
            Quota::with_period(request.rate_limit).map(RateLimiter::direct);

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<QueuedUrl> = VecDeque::new();
        let follow_links = matches!(request.mode, CrawlMode::Recursive);

        let seeds: Vec<Url> = match &request.mode {
            CrawlMode::Recursive => vec![request.base_url.clone()],
            CrawlMode::Explicit(urls) => urls.clone(),
        };
        for seed in seeds {
            let url = normalize_url(&seed);
            if visited.insert(url.to_string()) {
                queue.push_back(QueuedUrl {
                    url,
                    depth: 0,
                    parent: None,
                });
            }
        }

        info!(
            adapter = adapter.name(),
            explicit = !follow_links,
            seeds = queue.len(),
            max_depth = request.max_depth,
            max_pages = request.max_pages,
            rate_limit_ms = request.rate_limit.as_millis() as u64,
            "Starting crawl"
        );

        let mut summary = CrawlSummary::default();
        while let Some(item) = queue.pop_front() {
            if stop.is_stopped() {
                info!(pending = queue.len() + 1, "Crawl stopped");
                summary.stopped = true;
                break;
            }
            if summary.pages_fetched + summary.pages_failed >= request.max_pages {
                debug!(pending = queue.len() + 1, "Page limit reached");
                summary.hit_page_limit = true;
                break;
            }
            if let Some(limiter) = &limiter {
                limiter.until_ready().await;
            }

            let fetched = match self.fetcher.fetch(&item.url).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(url = %item.url, depth = item.depth, error = %e, "Page fetch failed");
                    summary.pages_failed += 1;
                    summary.failures.push((item.url.to_string(), e.to_string()));
                    sink.on_fetch_failure(&item.url, &e).await?;
                    continue;
                }
            };

            let final_url = normalize_url(&fetched.final_url);
            if final_url != item.url {
                let fresh = visited.insert(final_url.to_string());
                if !fresh || (follow_links && !scope.allows(&final_url)) {
                    debug!(url = %item.url, redirected_to = %final_url, "Skipping redirected page");
                    summary.pages_skipped += 1;
                    continue;
                }
            }

            let content = adapter.extract(&fetched.body, &fetched.final_url);

            if follow_links && item.depth < request.max_depth {
                for link in &content.links {
                    let Ok(parsed) = Url::parse(link) else {
                        continue;
                    };
                    let next = normalize_url(&parsed);
                    if !scope.allows(&next) || !visited.insert(next.to_string()) {
                        continue;
                    }
                    trace!(url = %next, depth = item.depth + 1, "Queued link");
                    queue.push_back(QueuedUrl {
                        url: next,
                        depth: item.depth + 1,
                        parent: Some(final_url.clone()),
                    });
                }
            }

            summary.pages_fetched += 1;
            sink.on_page(CrawledPage {
                url: final_url,
                depth: item.depth,
                parent_url: item.parent,
                adapter: adapter.name().to_string(),
                content,
            })
            .await?;
        }

        summary.duration = started.elapsed();
        info!(
            pages_fetched = summary.pages_fetched,
            pages_failed = summary.pages_failed,
            pages_skipped = summary.pages_skipped,
            stopped = summary.stopped,
            duration_ms = summary.duration.as_millis() as u64,
            "Crawl finished"
        );
        Ok(summary)
    }
}
