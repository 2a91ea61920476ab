//! Task worker: polling loop, heartbeats, and outcome reporting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use sitekb_core::{
    defaults, BuildProgress, ClaimFilter, ClaimSettings, ClaimTarget, Error, QueuedTask, Result,
    SourceCategory, StopFlag, TaskDisposition, TaskOutcome, TaskQueue,
};

use crate::handler::{ProgressStore, TaskContext, TaskHandler};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub stale_threshold: Duration,
    pub max_attempts: i32,
    pub categories: Vec<SourceCategory>,
    /// Process at most one task, then stop.
    pub run_once: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
            heartbeat_interval: Duration::from_secs(defaults::HEARTBEAT_INTERVAL_SECS),
            stale_threshold: Duration::from_secs(defaults::STALE_THRESHOLD_SECS),
            max_attempts: defaults::MAX_ATTEMPTS,
            categories: SourceCategory::defaults(),
            run_once: false,
        }
    }
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no" | "off"))
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WORKER_ENABLED` | `true` | Enable/disable task processing |
    /// | `WORKER_POLL_INTERVAL_MS` | `5000` | Sleep when the queue is empty |
    /// | `WORKER_HEARTBEAT_INTERVAL_SECS` | `60` | Heartbeat period while a task runs |
    /// | `WORKER_STALE_THRESHOLD_SECS` | `600` | Age after which running tasks are reclaimed |
    /// | `WORKER_MAX_ATTEMPTS` | `3` | Attempts before terminal error |
    /// | `WORKER_SOURCE_CATEGORIES` | `any,help,unknown` | Categories this worker claims |
    /// | `WORKER_RUN_ONCE` | `false` | Process at most one task then exit |
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(enabled) = env_flag("WORKER_ENABLED") {
            config.enabled = enabled;
        }
        if let Some(ms) = env_u64("WORKER_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("WORKER_HEARTBEAT_INTERVAL_SECS") {
            config.heartbeat_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = env_u64("WORKER_STALE_THRESHOLD_SECS") {
            config.stale_threshold = Duration::from_secs(secs.max(1));
        }
        if let Some(n) = env_u64("WORKER_MAX_ATTEMPTS") {
            config.max_attempts = (n as i32).max(1);
        }
        if let Ok(list) = std::env::var("WORKER_SOURCE_CATEGORIES") {
            let categories = SourceCategory::parse_list(&list);
            if !categories.is_empty() {
                config.categories = categories;
            }
        }
        if let Some(run_once) = env_flag("WORKER_RUN_ONCE") {
            config.run_once = run_once;
        }
        config
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_categories(mut self, categories: Vec<SourceCategory>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_run_once(mut self, run_once: bool) -> Self {
        self.run_once = run_once;
        self
    }

    pub fn claim_settings(&self) -> ClaimSettings {
        ClaimSettings::default()
            .with_stale_threshold(self.stale_threshold)
            .with_max_attempts(self.max_attempts)
    }

    pub fn claim_filter(&self, target: ClaimTarget) -> ClaimFilter {
        ClaimFilter::new(target).with_categories(self.categories.clone())
    }
}

/// Event emitted by the task worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    WorkerStarted,
    TaskClaimed {
        task_id: Uuid,
        kind: &'static str,
    },
    TaskProgress {
        task_id: Uuid,
        progress: BuildProgress,
    },
    TaskCompleted {
        task_id: Uuid,
        kind: &'static str,
        duration_ms: u64,
    },
    TaskFailed {
        task_id: Uuid,
        kind: &'static str,
        error: String,
        disposition: TaskDisposition,
    },
    /// Released after a stop signal.
    TaskStopped {
        task_id: Uuid,
        kind: &'static str,
    },
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    stop: StopFlag,
    event_rx: broadcast::Receiver<WorkerEvent>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    ///
    /// A running task observes the stop between pages and is released.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop.stop();
        // The loop may already have exited (run_once); the stop flag is enough then.
        let _ = self.shutdown_tx.try_send(());
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    /// Wait for the worker loop to exit.
    pub async fn join(self) -> Result<()> {
        self.join
            .await
            .map_err(|e| Error::Internal(format!("worker task failed: {e}")))
    }
}

/// Claims tasks from one queue and runs them through one handler.
pub struct TaskWorker<Q: TaskQueue> {
    queue: Arc<Q>,
    handler: Arc<dyn TaskHandler<Q::Task>>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
    stop: StopFlag,
    progress_store: Option<Arc<dyn ProgressStore>>,
}

impl<Q: TaskQueue + 'static> TaskWorker<Q> {
    pub fn new(queue: Arc<Q>, handler: Arc<dyn TaskHandler<Q::Task>>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            queue,
            handler,
            config,
            event_tx,
            stop: StopFlag::new(),
            progress_store: None,
        }
    }

    /// Persist handler progress through this store.
    pub fn with_progress_store(mut self, store: Arc<dyn ProgressStore>) -> Self {
        self.progress_store = Some(store);
        self
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// The flag handed to every task this worker runs.
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        let stop = self.stop.clone();

        let join = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            stop,
            event_rx,
            join,
        }
    }

    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker", handler = self.handler.name()))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Task worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            heartbeat_interval_secs = self.config.heartbeat_interval.as_secs(),
            run_once = self.config.run_once,
            "Task worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        loop {
            if self.stop.is_stopped() || shutdown_rx.try_recv().is_ok() {
                info!("Task worker received shutdown signal");
                break;
            }

            let processed = match self.run_once().await {
                Ok(processed) => processed,
                Err(e) => {
                    error!(error = %e, "Worker iteration failed");
                    false
                }
            };

            if self.config.run_once {
                break;
            }
            if processed {
                continue;
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Task worker received shutdown signal");
                    break;
                }
                _ = sleep(self.config.poll_interval) => {}
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Task worker stopped");
    }

    /// Claim and run a single task. Returns whether a task was processed.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(task) = self.queue.claim_next().await? else {
            trace!(subsystem = "jobs", component = "worker", "No task ready");
            return Ok(false);
        };

        let task_id = task.id();
        let kind = Q::Task::KIND;
        let started = Instant::now();
        info!(
            subsystem = "jobs",
            component = "worker",
            task_id = %task_id,
            task_kind = kind,
            attempt = task.attempt_count(),
            "Claimed task"
        );
        let _ = self.event_tx.send(WorkerEvent::TaskClaimed { task_id, kind });

        let outcome = self.execute_with_heartbeat(task.clone()).await;
        let disposition = self.queue.report(&task, &outcome).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            TaskOutcome::Completed { .. } => {
                info!(
                    subsystem = "jobs",
                    component = "worker",
                    task_id = %task_id,
                    task_kind = kind,
                    duration_ms,
                    "Task completed"
                );
                let _ = self.event_tx.send(WorkerEvent::TaskCompleted {
                    task_id,
                    kind,
                    duration_ms,
                });
            }
            TaskOutcome::Stopped => {
                info!(
                    subsystem = "jobs",
                    component = "worker",
                    task_id = %task_id,
                    task_kind = kind,
                    "Task released after stop"
                );
                let _ = self.event_tx.send(WorkerEvent::TaskStopped { task_id, kind });
            }
            TaskOutcome::Failed { reason } | TaskOutcome::Rejected { reason } => {
                warn!(
                    subsystem = "jobs",
                    component = "worker",
                    task_id = %task_id,
                    task_kind = kind,
                    error = %reason,
                    disposition = ?disposition,
                    duration_ms,
                    "Task failed"
                );
                let _ = self.event_tx.send(WorkerEvent::TaskFailed {
                    task_id,
                    kind,
                    error: reason.clone(),
                    disposition,
                });
            }
        }

        Ok(true)
    }

    /// Run the handler while restamping the task on every heartbeat tick.
    async fn execute_with_heartbeat(&self, task: Q::Task) -> TaskOutcome {
        let task_id = task.id();
        let mut ctx = TaskContext::new(task)
            .with_stop_flag(self.stop.clone())
            .with_events(self.event_tx.clone());
        if let Some(store) = &self.progress_store {
            ctx = ctx.with_progress_store(store.clone());
        }

        let execution = self.handler.execute(ctx);
        tokio::pin!(execution);

        let period = self.config.heartbeat_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                outcome = &mut execution => return outcome,
                _ = ticker.tick() => match self.queue.heartbeat(task_id).await {
                    Ok(true) => debug!(subsystem = "jobs", component = "worker", task_id = %task_id, "Heartbeat"),
                    Ok(false) => warn!(
                        subsystem = "jobs",
                        component = "worker",
                        task_id = %task_id,
                        "Heartbeat found task no longer running"
                    ),
                    Err(e) => warn!(
                        subsystem = "jobs",
                        component = "worker",
                        task_id = %task_id,
                        error = %e,
                        "Heartbeat failed"
                    ),
                },
            }
        }
    }
}
