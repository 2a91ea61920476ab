//! # sitekb-jobs
//!
//! Knowledge build pipeline and task worker for sitekb.
//!
//! This crate provides:
//! - Content diffing against the building and active versions
//! - The build pipeline: crawl, convert, chunk, embed, store, publish
//! - Task handlers and queue adapters over the claim protocol
//! - A worker loop with heartbeats, retry reporting and graceful shutdown
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sitekb_jobs::{BuildTaskQueue, KnowledgeBuildHandler, TaskWorker, WorkerConfig};
//! use sitekb_core::ClaimTarget;
//!
//! let config = WorkerConfig::from_env();
//! let queue = Arc::new(BuildTaskQueue::new(
//!     Arc::new(db.build_tasks.clone()),
//!     config.claim_filter(ClaimTarget::KnowledgeBuild),
//!     config.claim_settings(),
//! ));
//! let handler = Arc::new(KnowledgeBuildHandler::new(Arc::new(db.sources.clone()), pipeline));
//!
//! let handle = TaskWorker::new(queue.clone(), handler, config)
//!     .with_progress_store(queue)
//!     .start();
//!
//! // Graceful shutdown
//! handle.shutdown().await?;
//! handle.join().await?;
//! ```

pub mod differ;
pub mod handler;
pub mod pipeline;
pub mod queue;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export core types
pub use sitekb_core::*;

pub use differ::{ContentDiffer, PageChange, PageDiff, VersionContext};
pub use handler::{KnowledgeBuildHandler, ProgressStore, TaskContext, TaskHandler};
pub use pipeline::{
    BuildOptions, BuildPipeline, BuildReport, NoProgress, PipelineConfig, ProgressReporter,
};
pub use queue::{BuildTaskQueue, RecordingTaskQueue};
pub use worker::{TaskWorker, WorkerConfig, WorkerEvent, WorkerHandle};
