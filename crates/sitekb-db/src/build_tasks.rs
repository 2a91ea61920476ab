//! Build task repository and claim protocol.
//!
//! A claim is one round trip that both selects and mutates a row, using
//! `FOR UPDATE SKIP LOCKED` so concurrent workers never see the same row.
//! Stale recovery is tried before a fresh claim.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use sitekb_core::{
    defaults, new_v7, BuildProgress, BuildStage, BuildTask, BuildTaskRepository, ClaimFilter,
    ClaimSettings, ClaimTarget, Error, Result, RetryPolicy, SourceCategory, StageStatus,
    TaskConfig, TaskDisposition, TaskOutcome, STOPPED_REASON,
};

/// `lastError` recorded when a stale task is reclaimed.
pub const RECOVERED_REASON: &str = "recovered from stale running state";

/// `lastError` recorded when a stale task has no attempts left.
pub const EXHAUSTED_REASON: &str = "exceeded max attempts after timeout";

/// Attempt count read from the config column, tolerating non-numeric values.
const ATTEMPTS_EXPR: &str = "CASE WHEN jsonb_typeof(config->'attemptCount') = 'number' \
     THEN (config->>'attemptCount')::int ELSE 0 END";

/// Columns returned by every build task query, qualified with `prefix`.
fn task_columns(prefix: &str) -> String {
    format!(
        "{p}id, {p}source_id, {p}source_url, {p}source_name, {p}source_category, \
         {p}stage::text AS stage, {p}stage_status::text AS stage_status, {p}config, \
         {p}created_at, {p}updated_at, {p}knowledge_started_at, {p}knowledge_completed_at, \
         {p}action_started_at, {p}action_completed_at",
        p = prefix
    )
}

/// SQL predicate selecting rows a fresh claim may take for `target`.
fn ready_predicate(target: ClaimTarget) -> &'static str {
    match target {
        ClaimTarget::KnowledgeBuild => "stage = 'init' AND stage_status = 'pending'",
        ClaimTarget::ActionBuild => {
            "stage = 'knowledge_build' AND stage_status = 'completed' AND source_id IS NOT NULL"
        }
    }
}

/// PostgreSQL implementation of BuildTaskRepository.
#[derive(Clone)]
pub struct PgBuildTaskRepository {
    pool: Pool<Postgres>,
}

impl PgBuildTaskRepository {
    /// Create a new PgBuildTaskRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Parse a build task row.
    fn parse_task_row(row: &PgRow) -> BuildTask {
        let stage: String = row.get("stage");
        let stage_status: String = row.get("stage_status");
        let config: Option<serde_json::Value> = row.get("config");
        BuildTask {
            id: row.get("id"),
            source_id: row.get("source_id"),
            source_url: row.get("source_url"),
            source_name: row.get("source_name"),
            source_category: row.get("source_category"),
            stage: BuildStage::parse(&stage).unwrap_or(BuildStage::Error),
            stage_status: StageStatus::parse(&stage_status).unwrap_or(StageStatus::Error),
            config: TaskConfig::from_json(config.as_ref()),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            knowledge_started_at: row.get("knowledge_started_at"),
            knowledge_completed_at: row.get("knowledge_completed_at"),
            action_started_at: row.get("action_started_at"),
            action_completed_at: row.get("action_completed_at"),
        }
    }

    /// Submit a new task in `init/pending`.
    ///
    /// Submission normally happens outside the worker; this exists for
    /// tooling and tests.
    pub async fn submit(
        &self,
        source_url: &str,
        source_name: Option<&str>,
        category: SourceCategory,
        config: &TaskConfig,
    ) -> Result<Uuid> {
        let id = new_v7();
        sqlx::query(
            "INSERT INTO build_tasks (id, source_url, source_name, source_category, stage, stage_status, config)
             VALUES ($1, $2, $3, $4, 'init', 'pending', $5)",
        )
        .bind(id)
        .bind(source_url)
        .bind(source_name)
        .bind(category.as_str())
        .bind(config.to_json())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(subsystem = "db", component = "build_tasks", task_id = %id, "Build task submitted");
        Ok(id)
    }

    /// Reclaim the oldest stale running task, marking exhausted ones as errors.
    ///
    /// Exhausted rows are handled in a bounded loop so a backlog of them never
    /// grows the stack; each iteration is its own atomic statement.
    #[instrument(skip(self, filter, settings), fields(target = ?filter.target))]
    async fn recover_stale(
        &self,
        filter: &ClaimFilter,
        settings: &ClaimSettings,
    ) -> Result<Option<BuildTask>> {
        let started_col = filter.target.started_at_column();
        let sql = format!(
            "WITH stale AS (
                 SELECT id, {attempts} AS attempts
                 FROM build_tasks
                 WHERE stage = $1::build_task_stage
                   AND stage_status = 'running'
                   AND updated_at < NOW() - make_interval(secs => $2)
                   AND (cardinality($3::text[]) = 0 OR source_category = ANY($3))
                 ORDER BY updated_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE build_tasks t SET
                 stage = CASE WHEN s.attempts >= $4 THEN 'error'::build_task_stage ELSE t.stage END,
                 stage_status = CASE WHEN s.attempts >= $4 THEN 'error'::stage_status ELSE t.stage_status END,
                 config = jsonb_set(
                     jsonb_set(COALESCE(t.config, '{{}}'::jsonb), '{{attemptCount}}', to_jsonb(s.attempts + 1)),
                     '{{lastError}}',
                     to_jsonb(CASE WHEN s.attempts >= $4 THEN $5::text ELSE $6::text END)
                 ),
                 {started_col} = CASE WHEN s.attempts >= $4 THEN t.{started_col} ELSE NOW() END,
                 updated_at = NOW()
             FROM stale s
             WHERE t.id = s.id
             RETURNING {cols}, (s.attempts >= $4) AS exhausted",
            attempts = ATTEMPTS_EXPR,
            started_col = started_col,
            cols = task_columns("t."),
        );
        let categories = filter.category_strings();

        for _ in 0..defaults::STALE_SWEEP_LIMIT {
            let row = sqlx::query(&sql)
                .bind(filter.target.stage().as_str())
                .bind(settings.stale_threshold_secs())
                .bind(&categories)
                .bind(settings.max_attempts)
                .bind(EXHAUSTED_REASON)
                .bind(RECOVERED_REASON)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Database)?;

            let Some(row) = row else {
                return Ok(None);
            };
            let exhausted: bool = row.get("exhausted");
            let task = Self::parse_task_row(&row);

            if exhausted {
                warn!(
                    subsystem = "db",
                    component = "build_tasks",
                    op = "recover_stale",
                    task_id = %task.id,
                    attempt = task.config.attempt_count,
                    "Stale task exceeded max attempts, marked as error"
                );
                continue;
            }

            warn!(
                subsystem = "db",
                component = "build_tasks",
                op = "recover_stale",
                task_id = %task.id,
                attempt = task.config.attempt_count,
                "Recovered stale running task"
            );
            return Ok(Some(task));
        }

        warn!(
            subsystem = "db",
            component = "build_tasks",
            op = "recover_stale",
            limit = defaults::STALE_SWEEP_LIMIT,
            "Stale sweep limit reached, deferring remaining rows"
        );
        Ok(None)
    }

    /// Claim the oldest ready task and move it to the target stage.
    async fn claim_fresh(&self, filter: &ClaimFilter) -> Result<Option<BuildTask>> {
        let sql = format!(
            "UPDATE build_tasks
             SET stage = $1::build_task_stage, stage_status = 'running',
                 {started_col} = NOW(), updated_at = NOW()
             WHERE id = (
                 SELECT id FROM build_tasks
                 WHERE {ready}
                   AND (cardinality($2::text[]) = 0 OR source_category = ANY($2))
                 ORDER BY created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {cols}",
            started_col = filter.target.started_at_column(),
            ready = ready_predicate(filter.target),
            cols = task_columns(""),
        );

        let row = sqlx::query(&sql)
            .bind(filter.target.stage().as_str())
            .bind(filter.category_strings())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_task_row))
    }
}

#[async_trait]
impl BuildTaskRepository for PgBuildTaskRepository {
    async fn claim_next(
        &self,
        filter: &ClaimFilter,
        settings: &ClaimSettings,
    ) -> Result<Option<BuildTask>> {
        if let Some(task) = self.recover_stale(filter, settings).await? {
            return Ok(Some(task));
        }

        let task = self.claim_fresh(filter).await?;
        if let Some(ref task) = task {
            info!(
                subsystem = "db",
                component = "build_tasks",
                op = "claim_next",
                task_id = %task.id,
                source_url = %task.source_url,
                "Claimed build task"
            );
        }
        Ok(task)
    }

    async fn heartbeat(&self, task_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE build_tasks SET updated_at = NOW()
             WHERE id = $1 AND stage_status = 'running'",
        )
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, task, outcome, settings), fields(task_id = %task.id))]
    async fn report(
        &self,
        task: &BuildTask,
        target: ClaimTarget,
        outcome: &TaskOutcome,
        settings: &ClaimSettings,
    ) -> Result<TaskDisposition> {
        let disposition =
            RetryPolicy::new(settings.max_attempts).decide(task.config.attempt_count, outcome);
        let running_stage = target.stage().as_str();
        let (ready_stage, ready_status) = target.ready_state();

        let result = match disposition {
            TaskDisposition::Completed => {
                let source_id = match outcome {
                    TaskOutcome::Completed { source_id, .. } => *source_id,
                    _ => None,
                };
                let (stage, status) = match target {
                    ClaimTarget::KnowledgeBuild => {
                        (BuildStage::KnowledgeBuild, StageStatus::Completed)
                    }
                    ClaimTarget::ActionBuild => (BuildStage::Completed, StageStatus::Completed),
                };
                let sql = format!(
                    "UPDATE build_tasks
                     SET stage = $2::build_task_stage, stage_status = $3::stage_status,
                         source_id = COALESCE($4, source_id),
                         {completed_col} = NOW(), updated_at = NOW()
                     WHERE id = $1 AND stage = $5::build_task_stage AND stage_status = 'running'",
                    completed_col = target.completed_at_column(),
                );
                sqlx::query(&sql)
                    .bind(task.id)
                    .bind(stage.as_str())
                    .bind(status.as_str())
                    .bind(source_id)
                    .bind(running_stage)
                    .execute(&self.pool)
                    .await
            }
            TaskDisposition::Requeued { attempt_count }
            | TaskDisposition::Errored { attempt_count } => {
                let (stage, status) = if disposition.is_terminal() {
                    (BuildStage::Error, StageStatus::Error)
                } else {
                    (ready_stage, ready_status)
                };
                let reason = outcome.reason().unwrap_or("unknown failure");
                sqlx::query(
                    "UPDATE build_tasks
                     SET stage = $2::build_task_stage, stage_status = $3::stage_status,
                         config = jsonb_set(
                             jsonb_set(COALESCE(config, '{}'::jsonb), '{attemptCount}', to_jsonb($4::int)),
                             '{lastError}', to_jsonb($5::text)
                         ),
                         updated_at = NOW()
                     WHERE id = $1 AND stage = $6::build_task_stage AND stage_status = 'running'",
                )
                .bind(task.id)
                .bind(stage.as_str())
                .bind(status.as_str())
                .bind(attempt_count)
                .bind(reason)
                .bind(running_stage)
                .execute(&self.pool)
                .await
            }
            TaskDisposition::Released => {
                sqlx::query(
                    "UPDATE build_tasks
                     SET stage = $2::build_task_stage, stage_status = $3::stage_status,
                         config = jsonb_set(COALESCE(config, '{}'::jsonb), '{lastError}', to_jsonb($4::text)),
                         updated_at = NOW()
                     WHERE id = $1 AND stage = $5::build_task_stage AND stage_status = 'running'",
                )
                .bind(task.id)
                .bind(ready_stage.as_str())
                .bind(ready_status.as_str())
                .bind(STOPPED_REASON)
                .bind(running_stage)
                .execute(&self.pool)
                .await
            }
        }
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::Task(format!(
                "build task {} is no longer held by this worker",
                task.id
            )));
        }

        debug!(
            subsystem = "db",
            component = "build_tasks",
            op = "report",
            disposition = ?disposition,
            "Build task reported"
        );
        Ok(disposition)
    }

    async fn record_progress(&self, task_id: Uuid, progress: &BuildProgress) -> Result<()> {
        sqlx::query(
            "UPDATE build_tasks
             SET config = jsonb_set(COALESCE(config, '{}'::jsonb), '{progress}', $2),
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(task_id)
        .bind(serde_json::to_value(progress)?)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<BuildTask>> {
        let sql = format!("SELECT {} FROM build_tasks WHERE id = $1", task_columns(""));
        let row = sqlx::query(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.as_ref().map(Self::parse_task_row))
    }

    async fn count_ready(&self, filter: &ClaimFilter) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM build_tasks
             WHERE {ready}
               AND (cardinality($1::text[]) = 0 OR source_category = ANY($1))",
            ready = ready_predicate(filter.target),
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(filter.category_strings())
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(count)
    }
}
