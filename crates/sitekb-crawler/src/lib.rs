//! # sitekb-crawler
//!
//! Breadth-first crawling for sitekb.
//!
//! This crate provides:
//! - [`CrawlOrchestrator`]: sequential, rate-limited BFS with URL dedup, a
//!   depth ceiling, include/exclude patterns, and an explicit-URL mode
//! - [`HttpFetcher`]: `reqwest` fetcher with retry on transient failures
//! - Site adapters resolved per source name ([`AdapterResolver`])
//! - [`HtmdConverter`]: the HTML to Markdown [`Converter`](sitekb_core::Converter)

pub mod adapters;
pub mod converter;
pub mod fetcher;
pub mod orchestrator;
pub mod scope;

pub use adapters::{
    AdapterResolver, CodeAdapter, DeclarativeAdapter, DeclarativeAdapterSpec, ExtractedPage,
    GenericAdapter, SiteAdapter,
};
pub use converter::HtmdConverter;
pub use fetcher::{FetchedPage, FetcherConfig, HttpFetcher, PageFetcher};
pub use orchestrator::{
    CrawlMode, CrawlOrchestrator, CrawlRequest, CrawlSummary, CrawledPage, PageSink,
};
pub use scope::{glob_to_regex, normalize_url, CrawlScope};
