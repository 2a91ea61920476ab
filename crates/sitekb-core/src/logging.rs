//! Structured logging schema and field name constants for sitekb.
//!
//! All crates use these constants for consistent structured logging fields so
//! log aggregation tools can query by the same names across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue: stale recovery, page failure, heartbeat failure |
//! | INFO  | Lifecycle events: startup, claim, publish, task completion |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration (links, chunks) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "crawler", "inference", "jobs", "worker"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "build_tasks", "recording_tasks", "publisher", "orchestrator", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "claim_next", "recover_stale", "publish", "embed_batch"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Task UUID being processed (build or recording).
pub const TASK_ID: &str = "task_id";

/// Task kind ("build", "recording").
pub const TASK_KIND: &str = "task_kind";

/// Source UUID.
pub const SOURCE_ID: &str = "source_id";

/// Source version UUID.
pub const VERSION_ID: &str = "version_id";

/// Document UUID.
pub const DOCUMENT_ID: &str = "document_id";

/// Page URL being fetched or stored.
pub const URL: &str = "url";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of chunks produced or stored.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Number of pages processed.
pub const PAGE_COUNT: &str = "page_count";

/// Number of input texts sent to an embedding model.
pub const INPUT_COUNT: &str = "input_count";

/// Attempt count recorded on a task.
pub const ATTEMPT: &str = "attempt";

/// Crawl depth of a page.
pub const DEPTH: &str = "depth";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for embedding.
pub const MODEL: &str = "model";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Slow operation threshold exceeded.
pub const SLOW: &str = "slow";
