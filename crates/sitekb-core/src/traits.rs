//! Core traits for sitekb abstractions.
//!
//! Repositories are implemented over PostgreSQL in `sitekb-db`; collaborators
//! (converter, embedder) in `sitekb-crawler` and `sitekb-inference`. The
//! pipeline and worker only see these traits, which keeps them testable with
//! in-memory fakes.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;
use crate::task::{QueuedTask, TaskDisposition, TaskOutcome};
use crate::task_config::BuildProgress;

// =============================================================================
// TASK REPOSITORY TRAITS
// =============================================================================

/// Storage and claim protocol for build tasks.
#[async_trait]
pub trait BuildTaskRepository: Send + Sync {
    /// Claim one task: stale recovery first, then a fresh ready task.
    ///
    /// Returns `None` when nothing qualifies or another worker won the race.
    async fn claim_next(
        &self,
        filter: &ClaimFilter,
        settings: &ClaimSettings,
    ) -> Result<Option<BuildTask>>;

    /// Restamp `updated_at` on a running task. Returns false if the task is no
    /// longer running.
    async fn heartbeat(&self, task_id: Uuid) -> Result<bool>;

    /// Apply a handler outcome according to the retry policy.
    async fn report(
        &self,
        task: &BuildTask,
        target: ClaimTarget,
        outcome: &TaskOutcome,
        settings: &ClaimSettings,
    ) -> Result<TaskDisposition>;

    /// Persist running totals into the task config.
    async fn record_progress(&self, task_id: Uuid, progress: &BuildProgress) -> Result<()>;

    async fn get(&self, task_id: Uuid) -> Result<Option<BuildTask>>;

    /// Tasks currently claimable by a fresh claim for this filter.
    async fn count_ready(&self, filter: &ClaimFilter) -> Result<i64>;
}

/// Storage and claim protocol for per-chunk recording tasks.
#[async_trait]
pub trait RecordingTaskRepository: Send + Sync {
    /// Create one pending task per chunk of `version_id` under `build_task_id`.
    /// Returns the number of rows created; re-running creates none.
    async fn enqueue_for_version(
        &self,
        build_task_id: Uuid,
        source_id: Uuid,
        version_id: Uuid,
    ) -> Result<u64>;

    /// Claim one task: stale recovery first, then the oldest pending task.
    async fn claim_next(
        &self,
        build_task_id: Option<Uuid>,
        settings: &ClaimSettings,
    ) -> Result<Option<RecordingTask>>;

    async fn heartbeat(&self, task_id: Uuid) -> Result<bool>;

    async fn report(
        &self,
        task: &RecordingTask,
        outcome: &TaskOutcome,
        settings: &ClaimSettings,
    ) -> Result<TaskDisposition>;

    async fn counts_for_build(&self, build_task_id: Uuid) -> Result<RecordingTaskCounts>;
}

// =============================================================================
// CONTENT REPOSITORY TRAITS
// =============================================================================

/// Crawl targets.
#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Find a source by name, creating it from `base_url` when missing.
    async fn ensure_source(&self, name: &str, base_url: &str) -> Result<Source>;

    async fn get(&self, source_id: Uuid) -> Result<Option<Source>>;

    async fn get_by_name(&self, name: &str) -> Result<Option<Source>>;
}

/// Source versions and the Blue/Green publisher.
#[async_trait]
pub trait VersionRepository: Send + Sync {
    /// Return the source's building version, creating one if none exists.
    ///
    /// A new version starts with a copy of the active version's documents and
    /// chunks, so pages that did not change need no writes.
    async fn create_building_version(
        &self,
        source_id: Uuid,
        commit_message: Option<&str>,
        created_by: Option<&str>,
    ) -> Result<SourceVersion>;

    async fn get_building(&self, source_id: Uuid) -> Result<Option<SourceVersion>>;

    async fn get_active(&self, source_id: Uuid) -> Result<Option<SourceVersion>>;

    async fn list(&self, source_id: Uuid) -> Result<Vec<SourceVersion>>;

    /// Atomically promote the newest building version and archive the previous
    /// active one, moving the source pointer in the same transaction.
    async fn publish(&self, source_id: Uuid) -> Result<PublishResult>;

    /// Remove a building version and everything scoped to it.
    async fn delete_version(&self, version_id: Uuid) -> Result<()>;
}

/// Documents and their chunks.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Stored (document id, content hash) for a url hash within a version.
    async fn find_content_hash(
        &self,
        version_id: Uuid,
        url_hash: &str,
    ) -> Result<Option<(Uuid, String)>>;

    /// Upsert the document and replace its chunks in one transaction.
    async fn upsert_with_chunks(
        &self,
        document: &NewDocument,
        chunks: &[NewChunk],
    ) -> Result<StoredDocument>;

    /// Copy one document and its chunks from another version into `to_version`.
    async fn carry_forward(&self, document_id: Uuid, to_version: Uuid) -> Result<Uuid>;

    /// Delete the documents of a version whose url hash is not in `keep`.
    /// Their chunks are removed with them. Returns the number deleted.
    async fn prune_unvisited(&self, version_id: Uuid, keep: &[String]) -> Result<u64>;

    async fn count_by_version(&self, version_id: Uuid) -> Result<i64>;
}

// =============================================================================
// WORKER TRAITS
// =============================================================================

/// One claim protocol instance as seen by the worker loop.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    type Task: QueuedTask;

    async fn claim_next(&self) -> Result<Option<Self::Task>>;

    async fn heartbeat(&self, task_id: Uuid) -> Result<bool>;

    async fn report(&self, task: &Self::Task, outcome: &TaskOutcome) -> Result<TaskDisposition>;
}

// =============================================================================
// COLLABORATOR TRAITS
// =============================================================================

/// HTML to Markdown conversion.
pub trait Converter: Send + Sync {
    fn convert(&self, html: &str) -> Result<String>;
}

/// Backend for generating text embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a batch of texts. Output order matches input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<crate::Vector>>;

    /// Get the expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}
