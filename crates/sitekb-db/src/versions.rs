//! Source versions and the Blue/Green publisher.
//!
//! A source has at most one active version (enforced by a partial unique
//! index) and at most one building version at a time. Publishing archives
//! the active version before activating the building one, all inside one
//! transaction that also moves `sources.current_version_id`.

use std::time::Instant;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use sitekb_core::{
    new_v7, Error, PublishResult, Result, SourceVersion, SourceVersionStatus, VersionRepository,
};

const VERSION_COLUMNS: &str = "id, source_id, version_number, status::text AS status, \
                               commit_message, created_by, created_at, published_at";

/// PostgreSQL implementation of VersionRepository.
#[derive(Clone)]
pub struct PgVersionRepository {
    pool: Pool<Postgres>,
}

impl PgVersionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_version_row(row: &PgRow) -> SourceVersion {
        let status: String = row.get("status");
        SourceVersion {
            id: row.get("id"),
            source_id: row.get("source_id"),
            version_number: row.get("version_number"),
            status: SourceVersionStatus::parse(&status).unwrap_or(SourceVersionStatus::Archived),
            commit_message: row.get("commit_message"),
            created_by: row.get("created_by"),
            created_at: row.get("created_at"),
            published_at: row.get("published_at"),
        }
    }

    async fn lock_source(tx: &mut Transaction<'_, Postgres>, source_id: Uuid) -> Result<()> {
        let locked: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM sources WHERE id = $1 FOR UPDATE")
                .bind(source_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(Error::Database)?;
        if locked.is_none() {
            return Err(Error::NotFound(format!("source {source_id}")));
        }
        Ok(())
    }

    async fn find_by_status(
        &self,
        source_id: Uuid,
        status: SourceVersionStatus,
    ) -> Result<Option<SourceVersion>> {
        let row = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM source_versions
             WHERE source_id = $1 AND status = $2::source_version_status
             ORDER BY version_number DESC
             LIMIT 1"
        ))
        .bind(source_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.as_ref().map(Self::parse_version_row))
    }

    /// Ids selected by `query` (bound to `scope`), paired with fresh v7 ids.
    async fn fresh_ids(
        tx: &mut Transaction<'_, Postgres>,
        query: &str,
        scope: Uuid,
    ) -> Result<(Vec<Uuid>, Vec<Uuid>)> {
        let old: Vec<Uuid> = sqlx::query_scalar(query)
            .bind(scope)
            .fetch_all(&mut **tx)
            .await
            .map_err(Error::Database)?;
        let new = old.iter().map(|_| new_v7()).collect();
        Ok((old, new))
    }

    /// Copy every document and chunk of `from` into `to`, remapping
    /// `parent_id` onto the copied documents. Returns (documents, chunks).
    async fn copy_forward(
        tx: &mut Transaction<'_, Postgres>,
        from: Uuid,
        to: Uuid,
    ) -> Result<(u64, u64)> {
        let (old_docs, new_docs) = Self::fresh_ids(
            tx,
            "SELECT id FROM documents WHERE source_version_id = $1 ORDER BY id",
            from,
        )
        .await?;
        let documents = sqlx::query(
            "WITH mapping AS (
                 SELECT * FROM UNNEST($3::uuid[], $4::uuid[]) AS m(old_id, new_id)
             )
             INSERT INTO documents (
                 id, source_id, source_version_id, url, url_hash, title, description,
                 content_text, content_html, content_md, content_hash, depth, breadcrumb,
                 parent_id, word_count
             )
             SELECT m.new_id, d.source_id, $2, d.url, d.url_hash, d.title, d.description,
                    d.content_text, d.content_html, d.content_md, d.content_hash, d.depth,
                    d.breadcrumb, pm.new_id, d.word_count
             FROM documents d
             JOIN mapping m ON m.old_id = d.id
             LEFT JOIN mapping pm ON pm.old_id = d.parent_id
             WHERE d.source_version_id = $1",
        )
        .bind(from)
        .bind(to)
        .bind(&old_docs)
        .bind(&new_docs)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

        let (old_chunks, new_chunks) = Self::fresh_ids(
            tx,
            "SELECT id FROM chunks WHERE source_version_id = $1 ORDER BY id",
            from,
        )
        .await?;
        let chunks = sqlx::query(
            "INSERT INTO chunks (
                 id, document_id, source_version_id, content, content_hash, chunk_index,
                 start_char, end_char, heading, heading_hierarchy, token_count,
                 embedding, embedding_model
             )
             SELECT m.new_id, nd.id, $2, c.content, c.content_hash, c.chunk_index,
                    c.start_char, c.end_char, c.heading, c.heading_hierarchy, c.token_count,
                    c.embedding, c.embedding_model
             FROM chunks c
             JOIN UNNEST($3::uuid[], $4::uuid[]) AS m(old_id, new_id) ON m.old_id = c.id
             JOIN documents od ON od.id = c.document_id
             JOIN documents nd ON nd.source_version_id = $2 AND nd.url_hash = od.url_hash
             WHERE c.source_version_id = $1",
        )
        .bind(from)
        .bind(to)
        .bind(&old_chunks)
        .bind(&new_chunks)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

        Ok((documents.rows_affected(), chunks.rows_affected()))
    }
}

#[async_trait]
impl VersionRepository for PgVersionRepository {
    async fn create_building_version(
        &self,
        source_id: Uuid,
        commit_message: Option<&str>,
        created_by: Option<&str>,
    ) -> Result<SourceVersion> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        Self::lock_source(&mut tx, source_id).await?;

        let existing = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM source_versions
             WHERE source_id = $1 AND status = 'building'
             ORDER BY version_number DESC
             LIMIT 1"
        ))
        .bind(source_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        if let Some(row) = existing {
            tx.commit().await.map_err(Error::Database)?;
            let version = Self::parse_version_row(&row);
            debug!(
                subsystem = "db",
                component = "versions",
                op = "create_building_version",
                source_id = %source_id,
                version_id = %version.id,
                "Reusing existing building version"
            );
            return Ok(version);
        }

        let active: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM source_versions WHERE source_id = $1 AND status = 'active'",
        )
        .bind(source_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let row = sqlx::query(&format!(
            "INSERT INTO source_versions (id, source_id, version_number, status, commit_message, created_by)
             SELECT $1, $2, COALESCE(MAX(version_number), 0) + 1, 'building', $3, $4
             FROM source_versions WHERE source_id = $2
             RETURNING {VERSION_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(source_id)
        .bind(commit_message)
        .bind(created_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;
        let version = Self::parse_version_row(&row);

        let (docs, chunks) = match active {
            Some((active_id,)) => Self::copy_forward(&mut tx, active_id, version.id).await?,
            None => (0, 0),
        };

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "versions",
            op = "create_building_version",
            source_id = %source_id,
            version_id = %version.id,
            version_number = version.version_number,
            copied_documents = docs,
            copied_chunks = chunks,
            duration_ms = start.elapsed().as_millis() as u64,
            "Created building version"
        );
        Ok(version)
    }

    async fn get_building(&self, source_id: Uuid) -> Result<Option<SourceVersion>> {
        self.find_by_status(source_id, SourceVersionStatus::Building)
            .await
    }

    async fn get_active(&self, source_id: Uuid) -> Result<Option<SourceVersion>> {
        self.find_by_status(source_id, SourceVersionStatus::Active)
            .await
    }

    async fn list(&self, source_id: Uuid) -> Result<Vec<SourceVersion>> {
        let rows = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM source_versions
             WHERE source_id = $1
             ORDER BY version_number DESC"
        ))
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.iter().map(Self::parse_version_row).collect())
    }

    async fn publish(&self, source_id: Uuid) -> Result<PublishResult> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        Self::lock_source(&mut tx, source_id).await?;

        let building: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM source_versions
             WHERE source_id = $1 AND status = 'building'
             ORDER BY version_number DESC
             LIMIT 1",
        )
        .bind(source_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let Some((version_id,)) = building else {
            return Err(Error::Task(format!(
                "source {source_id} has no building version to publish"
            )));
        };

        // Archive first: the partial unique index allows one active row.
        let archived: Option<(Uuid,)> = sqlx::query_as(
            "UPDATE source_versions SET status = 'archived'
             WHERE source_id = $1 AND status = 'active'
             RETURNING id",
        )
        .bind(source_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query(
            "UPDATE source_versions SET status = 'active', published_at = NOW() WHERE id = $1",
        )
        .bind(version_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query(
            "UPDATE sources SET current_version_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(source_id)
        .bind(version_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        let result = PublishResult {
            version_id,
            archived_version_id: archived.map(|(id,)| id),
        };
        info!(
            subsystem = "db",
            component = "versions",
            op = "publish",
            source_id = %source_id,
            version_id = %version_id,
            archived_version_id = ?result.archived_version_id,
            duration_ms = start.elapsed().as_millis() as u64,
            "Published source version"
        );
        Ok(result)
    }

    async fn delete_version(&self, version_id: Uuid) -> Result<()> {
        let result =
            sqlx::query("DELETE FROM source_versions WHERE id = $1 AND status = 'building'")
                .bind(version_id)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            let status: Option<(String,)> =
                sqlx::query_as("SELECT status::text FROM source_versions WHERE id = $1")
                    .bind(version_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(Error::Database)?;
            return Err(match status {
                None => Error::NotFound(format!("version {version_id}")),
                Some((status,)) => Error::Task(format!(
                    "version {version_id} is {status}; only building versions can be deleted"
                )),
            });
        }

        info!(
            subsystem = "db",
            component = "versions",
            op = "delete_version",
            version_id = %version_id,
            "Deleted building version"
        );
        Ok(())
    }
}
