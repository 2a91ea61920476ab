//! Task handler trait and the knowledge build handler.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use sitekb_core::{
    BuildProgress, BuildTask, Error, QueuedTask, RecordingTaskRepository, Result, SourceCategory,
    SourceRepository, StopFlag, TaskOutcome,
};
use sitekb_crawler::CrawlRequest;

use crate::pipeline::{BuildOptions, BuildPipeline, ProgressReporter};
use crate::worker::WorkerEvent;

/// Persists progress snapshots for a running task.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn record_progress(&self, task_id: Uuid, progress: &BuildProgress) -> Result<()>;
}

/// Context handed to a handler for one claimed task.
pub struct TaskContext<T> {
    pub task: T,
    stop: StopFlag,
    progress_store: Option<Arc<dyn ProgressStore>>,
    events: Option<broadcast::Sender<WorkerEvent>>,
}

impl<T: QueuedTask> TaskContext<T> {
    pub fn new(task: T) -> Self {
        Self {
            task,
            stop: StopFlag::new(),
            progress_store: None,
            events: None,
        }
    }

    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_progress_store(mut self, store: Arc<dyn ProgressStore>) -> Self {
        self.progress_store = Some(store);
        self
    }

    pub fn with_events(mut self, events: broadcast::Sender<WorkerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }
}

#[async_trait]
impl<T: QueuedTask> ProgressReporter for TaskContext<T> {
    async fn report_progress(&self, progress: &BuildProgress) {
        let task_id = self.task.id();
        if let Some(store) = &self.progress_store {
            if let Err(e) = store.record_progress(task_id, progress).await {
                warn!(
                    subsystem = "jobs",
                    component = "handler",
                    task_id = %task_id,
                    error = %e,
                    "Failed to persist progress"
                );
            }
        }
        if let Some(events) = &self.events {
            let _ = events.send(WorkerEvent::TaskProgress {
                task_id,
                progress: *progress,
            });
        }
    }
}

/// Executes one kind of claimed task.
///
/// Failures are reported as [`TaskOutcome`] values; the worker turns them
/// into retries or terminal states.
#[async_trait]
pub trait TaskHandler<T: QueuedTask>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: TaskContext<T>) -> TaskOutcome;
}

/// Runs the knowledge build stage of a build task.
pub struct KnowledgeBuildHandler {
    sources: Arc<dyn SourceRepository>,
    pipeline: Arc<BuildPipeline>,
    recordings: Option<Arc<dyn RecordingTaskRepository>>,
}

impl KnowledgeBuildHandler {
    pub fn new(sources: Arc<dyn SourceRepository>, pipeline: Arc<BuildPipeline>) -> Self {
        Self {
            sources,
            pipeline,
            recordings: None,
        }
    }

    /// Enqueue per-chunk recording tasks for every successful build.
    pub fn with_recordings(mut self, recordings: Arc<dyn RecordingTaskRepository>) -> Self {
        self.recordings = Some(recordings);
        self
    }
}

/// Malformed input is rejected; everything else may succeed on retry.
fn outcome_for_error(error: Error) -> TaskOutcome {
    if error.is_validation() {
        TaskOutcome::rejected(error.to_string())
    } else {
        TaskOutcome::failed(error.to_string())
    }
}

#[async_trait]
impl TaskHandler<BuildTask> for KnowledgeBuildHandler {
    fn name(&self) -> &'static str {
        "knowledge_build"
    }

    async fn execute(&self, ctx: TaskContext<BuildTask>) -> TaskOutcome {
        let task = &ctx.task;

        if SourceCategory::parse(&task.source_category).is_none() {
            return TaskOutcome::rejected(format!(
                "unsupported source category {:?}",
                task.source_category
            ));
        }

        let request = match CrawlRequest::from_task(
            &task.source_url,
            task.source_name.as_deref(),
            &task.config,
        ) {
            Ok(request) => request,
            Err(e) => return TaskOutcome::rejected(e.to_string()),
        };

        let name = task
            .source_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| request.base_url.host_str().map(String::from))
            .unwrap_or_else(|| request.base_url.to_string());
        let request = request.with_source_name(name.clone());

        let source = match self
            .sources
            .ensure_source(&name, request.base_url.as_str())
            .await
        {
            Ok(source) => source,
            Err(e) => return outcome_for_error(e),
        };

        let options = BuildOptions {
            auto_publish: task.config.auto_publish(),
            commit_message: task
                .config
                .commit_message
                .clone()
                .or_else(|| Some(format!("Build task {}", task.id))),
        };

        let report = match self
            .pipeline
            .run(&source, &request, &options, &ctx, ctx.stop_flag())
            .await
        {
            Ok(report) => report,
            Err(e) => return outcome_for_error(e),
        };

        if report.stopped() {
            return TaskOutcome::Stopped;
        }
        if report.is_failure() {
            return TaskOutcome::failed(report.failure_reason());
        }

        let mut summary = report.summary_json();

        // The build is stored by now. Enqueue failures are recorded, not retried.
        if let Some(recordings) = &self.recordings {
            match recordings
                .enqueue_for_version(task.id, source.id, report.version_id)
                .await
            {
                Ok(count) => {
                    info!(
                        subsystem = "jobs",
                        component = "handler",
                        task_id = %task.id,
                        version_id = %report.version_id,
                        count,
                        "Enqueued recording tasks"
                    );
                    summary["recordingTasksEnqueued"] = json!(count);
                }
                Err(e) => {
                    error!(
                        subsystem = "jobs",
                        component = "handler",
                        task_id = %task.id,
                        version_id = %report.version_id,
                        error = %e,
                        "Failed to enqueue recording tasks; completing build without them"
                    );
                    summary["recordingError"] = json!(e.to_string());
                }
            }
        }

        TaskOutcome::Completed {
            source_id: Some(source.id),
            summary: Some(summary),
        }
    }
}
