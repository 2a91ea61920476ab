//! Recording task repository.
//!
//! Same claim shape as build tasks: stale recovery in a bounded loop, then a
//! fresh `FOR UPDATE SKIP LOCKED` claim. Rows are per chunk and scoped by the
//! build task that created them.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use sitekb_core::{
    defaults, new_v7, ClaimSettings, Error, RecordingStatus, RecordingTask, RecordingTaskCounts,
    RecordingTaskRepository, Result, RetryPolicy, TaskDisposition, TaskOutcome, STOPPED_REASON,
};

use crate::build_tasks::{EXHAUSTED_REASON, RECOVERED_REASON};

fn task_columns(prefix: &str) -> String {
    format!(
        "{p}id, {p}source_id, {p}document_id, {p}chunk_id, {p}build_task_id, \
         {p}status::text AS status, {p}attempt_count, {p}last_error, {p}created_at, \
         {p}updated_at, {p}started_at, {p}completed_at",
        p = prefix
    )
}

/// PostgreSQL implementation of RecordingTaskRepository.
#[derive(Clone)]
pub struct PgRecordingTaskRepository {
    pool: Pool<Postgres>,
}

impl PgRecordingTaskRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_task_row(row: &PgRow) -> RecordingTask {
        let status: String = row.get("status");
        RecordingTask {
            id: row.get("id"),
            source_id: row.get("source_id"),
            document_id: row.get("document_id"),
            chunk_id: row.get("chunk_id"),
            build_task_id: row.get("build_task_id"),
            status: RecordingStatus::parse(&status).unwrap_or(RecordingStatus::Failed),
            attempt_count: row.get("attempt_count"),
            last_error: row.get("last_error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        }
    }

    async fn recover_stale(
        &self,
        build_task_id: Option<Uuid>,
        settings: &ClaimSettings,
    ) -> Result<Option<RecordingTask>> {
        let sql = format!(
            "WITH stale AS (
                 SELECT id, attempt_count
                 FROM recording_tasks
                 WHERE status = 'running'
                   AND updated_at < NOW() - make_interval(secs => $1)
                   AND ($2::uuid IS NULL OR build_task_id = $2)
                 ORDER BY updated_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE recording_tasks t SET
                 status = CASE WHEN s.attempt_count >= $3
                          THEN 'failed'::recording_task_status ELSE t.status END,
                 attempt_count = s.attempt_count + 1,
                 last_error = CASE WHEN s.attempt_count >= $3 THEN $4 ELSE $5 END,
                 started_at = CASE WHEN s.attempt_count >= $3 THEN t.started_at ELSE NOW() END,
                 completed_at = CASE WHEN s.attempt_count >= $3 THEN NOW() ELSE t.completed_at END,
                 updated_at = NOW()
             FROM stale s
             WHERE t.id = s.id
             RETURNING {cols}, (s.attempt_count >= $3) AS exhausted",
            cols = task_columns("t."),
        );

        for _ in 0..defaults::STALE_SWEEP_LIMIT {
            let row = sqlx::query(&sql)
                .bind(settings.stale_threshold_secs())
                .bind(build_task_id)
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
                    component = "recording_tasks",
                    op = "recover_stale",
                    task_id = %task.id,
                    attempt = task.attempt_count,
                    "Stale recording task exceeded max attempts, marked as failed"
                );
                continue;
            }

            warn!(
                subsystem = "db",
                component = "recording_tasks",
                op = "recover_stale",
                task_id = %task.id,
                attempt = task.attempt_count,
                "Recovered stale recording task"
            );
            return Ok(Some(task));
        }

        warn!(
            subsystem = "db",
            component = "recording_tasks",
            op = "recover_stale",
            limit = defaults::STALE_SWEEP_LIMIT,
            "Stale sweep limit reached, deferring remaining rows"
        );
        Ok(None)
    }

    async fn claim_fresh(&self, build_task_id: Option<Uuid>) -> Result<Option<RecordingTask>> {
        let sql = format!(
            "UPDATE recording_tasks
             SET status = 'running', started_at = NOW(), updated_at = NOW()
             WHERE id = (
                 SELECT id FROM recording_tasks
                 WHERE status = 'pending'
                   AND ($1::uuid IS NULL OR build_task_id = $1)
                 ORDER BY created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {}",
            task_columns("")
        );
        let row = sqlx::query(&sql)
            .bind(build_task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.as_ref().map(Self::parse_task_row))
    }
}

#[async_trait]
impl RecordingTaskRepository for PgRecordingTaskRepository {
    async fn enqueue_for_version(
        &self,
        build_task_id: Uuid,
        source_id: Uuid,
        version_id: Uuid,
    ) -> Result<u64> {
        let chunk_ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM chunks WHERE source_version_id = $1 ORDER BY id",
        )
        .bind(version_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        let task_ids: Vec<Uuid> = chunk_ids.iter().map(|_| new_v7()).collect();

        let result = sqlx::query(
            "INSERT INTO recording_tasks (id, source_id, document_id, chunk_id, build_task_id, status)
             SELECT m.task_id, $2, c.document_id, c.id, $1, 'pending'
             FROM UNNEST($3::uuid[], $4::uuid[]) AS m(task_id, chunk_id)
             JOIN chunks c ON c.id = m.chunk_id
             ON CONFLICT (chunk_id, build_task_id) DO NOTHING",
        )
        .bind(build_task_id)
        .bind(source_id)
        .bind(&task_ids)
        .bind(&chunk_ids)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "recording_tasks",
            op = "enqueue_for_version",
            task_id = %build_task_id,
            version_id = %version_id,
            created = result.rows_affected(),
            "Recording tasks enqueued"
        );
        Ok(result.rows_affected())
    }

    async fn claim_next(
        &self,
        build_task_id: Option<Uuid>,
        settings: &ClaimSettings,
    ) -> Result<Option<RecordingTask>> {
        if let Some(task) = self.recover_stale(build_task_id, settings).await? {
            return Ok(Some(task));
        }
        let task = self.claim_fresh(build_task_id).await?;
        if let Some(ref task) = task {
            debug!(
                subsystem = "db",
                component = "recording_tasks",
                op = "claim_next",
                task_id = %task.id,
                "Claimed recording task"
            );
        }
        Ok(task)
    }

    async fn heartbeat(&self, task_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE recording_tasks SET updated_at = NOW() WHERE id = $1 AND status = 'running'",
        )
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn report(
        &self,
        task: &RecordingTask,
        outcome: &TaskOutcome,
        settings: &ClaimSettings,
    ) -> Result<TaskDisposition> {
        let disposition =
            RetryPolicy::new(settings.max_attempts).decide(task.attempt_count, outcome);

        let (status, attempt_count, last_error) = match disposition {
            TaskDisposition::Completed => (RecordingStatus::Completed, task.attempt_count, None),
            TaskDisposition::Requeued { attempt_count } => (
                RecordingStatus::Pending,
                attempt_count,
                outcome.reason().map(String::from),
            ),
            TaskDisposition::Errored { attempt_count } => (
                RecordingStatus::Failed,
                attempt_count,
                outcome.reason().map(String::from),
            ),
            TaskDisposition::Released => (
                RecordingStatus::Pending,
                task.attempt_count,
                Some(STOPPED_REASON.to_string()),
            ),
        };

        let result = sqlx::query(
            "UPDATE recording_tasks
             SET status = $2::recording_task_status,
                 attempt_count = $3,
                 last_error = COALESCE($4, last_error),
                 completed_at = CASE WHEN $2 IN ('completed', 'failed') THEN NOW() ELSE NULL END,
                 updated_at = NOW()
             WHERE id = $1 AND status = 'running'",
        )
        .bind(task.id)
        .bind(status.as_str())
        .bind(attempt_count)
        .bind(last_error)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::Task(format!(
                "recording task {} is no longer held by this worker",
                task.id
            )));
        }
        Ok(disposition)
    }

    async fn counts_for_build(&self, build_task_id: Uuid) -> Result<RecordingTaskCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status::text, COUNT(*) FROM recording_tasks
             WHERE build_task_id = $1 GROUP BY status",
        )
        .bind(build_task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut counts = RecordingTaskCounts::default();
        for (status, count) in rows {
            match RecordingStatus::parse(&status) {
                Some(RecordingStatus::Pending) => counts.pending = count,
                Some(RecordingStatus::Running) => counts.running = count,
                Some(RecordingStatus::Completed) => counts.completed = count,
                Some(RecordingStatus::Failed) => counts.failed = count,
                None => {}
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_columns_cast_status() {
        let cols = task_columns("");
        assert!(cols.contains("status::text AS status"));
        assert!(cols.contains("build_task_id"));
    }
}
