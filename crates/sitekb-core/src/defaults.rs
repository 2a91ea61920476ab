//! Centralized default constants for sitekb.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic numbers.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section.

// =============================================================================
// CHUNKING
// =============================================================================

/// Target chunk size in estimated tokens.
pub const CHUNK_SIZE_TOKENS: usize = 2000;

/// Words carried from the tail of one chunk into the next.
pub const CHUNK_OVERLAP_WORDS: usize = 50;

/// Trailing chunks below this many characters are merged into the previous chunk.
pub const CHUNK_MIN_CHARS: usize = 100;

/// Heading level sections are split at (2 = `##`).
pub const CHUNK_SPLIT_HEADING_LEVEL: usize = 2;

/// Characters per estimated token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Section headings whose content never reaches the chunk output.
pub const NOISE_HEADINGS: &[&str] = &[
    "Related articles",
    "Related topics",
    "Site Footer",
    "Footer",
    "Support",
    "Hosting",
];

// =============================================================================
// CRAWLING
// =============================================================================

/// Maximum link depth followed from the base URL.
pub const CRAWL_MAX_DEPTH: u32 = 3;

/// Maximum pages fetched per build.
pub const CRAWL_MAX_PAGES: usize = 500;

/// Minimum interval between requests to the same site, in milliseconds.
pub const CRAWL_RATE_LIMIT_MS: u64 = 1000;

/// Per-request HTTP timeout in seconds.
pub const CRAWL_TIMEOUT_SECS: u64 = 30;

/// Maximum redirects followed per request.
pub const CRAWL_MAX_REDIRECTS: usize = 5;

/// Default User-Agent for crawl requests.
pub const CRAWL_USER_AGENT: &str = concat!("sitekb/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// BUILD PIPELINE
// =============================================================================

/// Converted Markdown shorter than this is stored as a document shell only.
pub const MIN_CONTENT_CHARS: usize = 100;

/// Running totals are persisted every this many processed pages.
pub const PROGRESS_PERSIST_EVERY: usize = 10;

/// Versions are published automatically unless the task disables it.
pub const AUTO_PUBLISH: bool = true;

// =============================================================================
// TASK CLAIMING
// =============================================================================

/// A running task not updated for this long is considered abandoned.
pub const STALE_THRESHOLD_SECS: u64 = 600;

/// Attempts allowed before a task is moved to terminal error.
pub const MAX_ATTEMPTS: i32 = 3;

/// Upper bound on exhausted stale rows swept in one claim call.
pub const STALE_SWEEP_LIMIT: usize = 100;

/// Interval at which a held task's update timestamp is restamped.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 60;

/// Worker poll interval when the queue is empty, in milliseconds.
pub const POLL_INTERVAL_MS: u64 = 5000;

/// Source categories the knowledge builder accepts.
pub const SOURCE_CATEGORIES: &[&str] = &["any", "help", "unknown"];

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding model name (Ollama).
pub const EMBED_MODEL: &str = "nomic-embed-text";

/// Default embedding model name (OpenAI-compatible).
pub const OPENAI_EMBED_MODEL: &str = "text-embedding-3-small";

/// Vector dimension of `nomic-embed-text`.
pub const EMBED_DIMENSION: usize = 768;

/// Vector dimension of `text-embedding-3-small`.
pub const OPENAI_EMBED_DIMENSION: usize = 1536;

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Default OpenAI-compatible base URL.
pub const OPENAI_URL: &str = "https://api.openai.com/v1";

/// Texts sent per embedding request.
pub const EMBED_BATCH_SIZE: usize = 64;

/// Timeout for a single embedding request, in seconds.
pub const EMBED_TIMEOUT_SECS: u64 = 60;

/// Embedding calls slower than this are logged as slow, in milliseconds.
pub const EMBED_SLOW_THRESHOLD_MS: u64 = 5000;

/// Retries for a failed embedding batch before the page is counted as failed.
pub const EMBED_MAX_RETRIES: u32 = 3;

// =============================================================================
// DATABASE
// =============================================================================

/// Default maximum number of pooled connections.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Default pool acquire timeout in seconds.
pub const DB_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Default idle timeout in seconds.
pub const DB_IDLE_TIMEOUT_SECS: u64 = 600;
