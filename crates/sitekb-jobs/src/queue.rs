//! [`TaskQueue`] adapters over the task repositories.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use sitekb_core::{
    BuildProgress, BuildTask, BuildTaskRepository, ClaimFilter, ClaimSettings, RecordingTask,
    RecordingTaskRepository, Result, TaskDisposition, TaskOutcome, TaskQueue,
};

use crate::handler::ProgressStore;

/// Build tasks for one stage and set of categories.
#[derive(Clone)]
pub struct BuildTaskQueue {
    repo: Arc<dyn BuildTaskRepository>,
    filter: ClaimFilter,
    settings: ClaimSettings,
}

impl BuildTaskQueue {
    pub fn new(repo: Arc<dyn BuildTaskRepository>, filter: ClaimFilter, settings: ClaimSettings) -> Self {
        Self {
            repo,
            filter,
            settings,
        }
    }

    pub fn filter(&self) -> &ClaimFilter {
        &self.filter
    }
}

#[async_trait]
impl TaskQueue for BuildTaskQueue {
    type Task = BuildTask;

    async fn claim_next(&self) -> Result<Option<BuildTask>> {
        self.repo.claim_next(&self.filter, &self.settings).await
    }

    async fn heartbeat(&self, task_id: Uuid) -> Result<bool> {
        self.repo.heartbeat(task_id).await
    }

    async fn report(&self, task: &BuildTask, outcome: &TaskOutcome) -> Result<TaskDisposition> {
        self.repo
            .report(task, self.filter.target, outcome, &self.settings)
            .await
    }
}

#[async_trait]
impl ProgressStore for BuildTaskQueue {
    async fn record_progress(&self, task_id: Uuid, progress: &BuildProgress) -> Result<()> {
        self.repo.record_progress(task_id, progress).await
    }
}

/// Recording tasks, optionally scoped to one build task.
#[derive(Clone)]
pub struct RecordingTaskQueue {
    repo: Arc<dyn RecordingTaskRepository>,
    build_task_id: Option<Uuid>,
    settings: ClaimSettings,
}

impl RecordingTaskQueue {
    pub fn new(repo: Arc<dyn RecordingTaskRepository>, settings: ClaimSettings) -> Self {
        Self {
            repo,
            build_task_id: None,
            settings,
        }
    }

    pub fn for_build(mut self, build_task_id: Uuid) -> Self {
        self.build_task_id = Some(build_task_id);
        self
    }
}

#[async_trait]
impl TaskQueue for RecordingTaskQueue {
    type Task = RecordingTask;

    async fn claim_next(&self) -> Result<Option<RecordingTask>> {
        self.repo.claim_next(self.build_task_id, &self.settings).await
    }

    async fn heartbeat(&self, task_id: Uuid) -> Result<bool> {
        self.repo.heartbeat(task_id).await
    }

    async fn report(&self, task: &RecordingTask, outcome: &TaskOutcome) -> Result<TaskDisposition> {
        self.repo.report(task, outcome, &self.settings).await
    }
}
