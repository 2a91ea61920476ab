//! Document and chunk repository.
//!
//! Documents are unique per (version, url hash); chunks per (content hash,
//! version). Re-chunking a document replaces its chunks wholesale inside the
//! same transaction as the document upsert.

use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use tracing::debug;
use uuid::Uuid;

use sitekb_core::{new_v7, DocumentRepository, Error, NewChunk, NewDocument, Result, StoredDocument};

/// PostgreSQL implementation of DocumentRepository.
#[derive(Clone)]
pub struct PgDocumentRepository {
    pool: Pool<Postgres>,
}

impl PgDocumentRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn find_content_hash(
        &self,
        version_id: Uuid,
        url_hash: &str,
    ) -> Result<Option<(Uuid, String)>> {
        let row: Option<(Uuid, String)> = sqlx::query_as(
            "SELECT id, content_hash FROM documents
             WHERE source_version_id = $1 AND url_hash = $2",
        )
        .bind(version_id)
        .bind(url_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row)
    }

    async fn upsert_with_chunks(
        &self,
        document: &NewDocument,
        chunks: &[NewChunk],
    ) -> Result<StoredDocument> {
        let breadcrumb = serde_json::to_value(&document.breadcrumb)?;
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let (document_id,): (Uuid,) = sqlx::query_as(
            "INSERT INTO documents (
                 id, source_id, source_version_id, url, url_hash, title, description,
                 content_text, content_html, content_md, content_hash, depth, breadcrumb,
                 parent_id, word_count
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             ON CONFLICT (source_version_id, url_hash) DO UPDATE SET
                 url = EXCLUDED.url,
                 title = EXCLUDED.title,
                 description = EXCLUDED.description,
                 content_text = EXCLUDED.content_text,
                 content_html = EXCLUDED.content_html,
                 content_md = EXCLUDED.content_md,
                 content_hash = EXCLUDED.content_hash,
                 depth = EXCLUDED.depth,
                 breadcrumb = EXCLUDED.breadcrumb,
                 parent_id = EXCLUDED.parent_id,
                 word_count = EXCLUDED.word_count,
                 updated_at = NOW()
             RETURNING id",
        )
        .bind(new_v7())
        .bind(document.source_id)
        .bind(document.source_version_id)
        .bind(&document.url)
        .bind(&document.url_hash)
        .bind(&document.title)
        .bind(&document.description)
        .bind(&document.content_text)
        .bind(&document.content_html)
        .bind(&document.content_md)
        .bind(&document.content_hash)
        .bind(document.depth)
        .bind(&breadcrumb)
        .bind(document.parent_id)
        .bind(document.word_count)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query("DELETE FROM chunks WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let mut inserted = 0usize;
        for chunk in chunks {
            let hierarchy = serde_json::to_value(&chunk.heading_hierarchy)?;
            let result = sqlx::query(
                "INSERT INTO chunks (
                     id, document_id, source_version_id, content, content_hash, chunk_index,
                     start_char, end_char, heading, heading_hierarchy, token_count,
                     embedding, embedding_model
                 )
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                 ON CONFLICT (content_hash, source_version_id) DO NOTHING",
            )
            .bind(new_v7())
            .bind(document_id)
            .bind(document.source_version_id)
            .bind(&chunk.content)
            .bind(&chunk.content_hash)
            .bind(chunk.chunk_index)
            .bind(chunk.start_char)
            .bind(chunk.end_char)
            .bind(&chunk.heading)
            .bind(&hierarchy)
            .bind(chunk.token_count)
            .bind(&chunk.embedding)
            .bind(&chunk.embedding_model)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await.map_err(Error::Database)?;

        let stored = StoredDocument {
            document_id,
            chunks_inserted: inserted,
            chunks_deduplicated: chunks.len() - inserted,
        };
        debug!(
            subsystem = "db",
            component = "documents",
            op = "upsert_with_chunks",
            document_id = %document_id,
            version_id = %document.source_version_id,
            chunk_count = stored.chunks_inserted,
            deduplicated = stored.chunks_deduplicated,
            "Stored document"
        );
        Ok(stored)
    }

    async fn carry_forward(&self, document_id: Uuid, to_version: Uuid) -> Result<Uuid> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let (new_id,): (Uuid,) = sqlx::query_as(
            "INSERT INTO documents (
                 id, source_id, source_version_id, url, url_hash, title, description,
                 content_text, content_html, content_md, content_hash, depth, breadcrumb,
                 parent_id, word_count
             )
             SELECT $1, d.source_id, $3, d.url, d.url_hash, d.title, d.description,
                    d.content_text, d.content_html, d.content_md, d.content_hash, d.depth,
                    d.breadcrumb, NULL, d.word_count
             FROM documents d
             WHERE d.id = $2
             ON CONFLICT (source_version_id, url_hash) DO UPDATE SET updated_at = NOW()
             RETURNING id",
        )
        .bind(new_v7())
        .bind(document_id)
        .bind(to_version)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("document {document_id}")))?;

        let old_ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT id FROM chunks WHERE document_id = $1 ORDER BY chunk_index")
                .bind(document_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(Error::Database)?;
        let new_ids: Vec<Uuid> = old_ids.iter().map(|_| new_v7()).collect();

        let copied = sqlx::query(
            "INSERT INTO chunks (
                 id, document_id, source_version_id, content, content_hash, chunk_index,
                 start_char, end_char, heading, heading_hierarchy, token_count,
                 embedding, embedding_model
             )
             SELECT m.new_id, $2, $3, c.content, c.content_hash, c.chunk_index,
                    c.start_char, c.end_char, c.heading, c.heading_hierarchy, c.token_count,
                    c.embedding, c.embedding_model
             FROM chunks c
             JOIN UNNEST($4::uuid[], $5::uuid[]) AS m(old_id, new_id) ON m.old_id = c.id
             WHERE c.document_id = $1
               AND NOT EXISTS (SELECT 1 FROM chunks e WHERE e.document_id = $2)
             ON CONFLICT (content_hash, source_version_id) DO NOTHING",
        )
        .bind(document_id)
        .bind(new_id)
        .bind(to_version)
        .bind(&old_ids)
        .bind(&new_ids)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "documents",
            op = "carry_forward",
            document_id = %new_id,
            version_id = %to_version,
            chunk_count = copied.rows_affected(),
            "Carried document forward"
        );
        Ok(new_id)
    }

    async fn prune_unvisited(&self, version_id: Uuid, keep: &[String]) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM documents
             WHERE source_version_id = $1 AND NOT (url_hash = ANY($2))",
        )
        .bind(version_id)
        .bind(keep)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "documents",
            op = "prune_unvisited",
            version_id = %version_id,
            kept = keep.len(),
            deleted = result.rows_affected(),
            "Pruned unvisited documents"
        );
        Ok(result.rows_affected())
    }

    async fn count_by_version(&self, version_id: Uuid) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM documents WHERE source_version_id = $1")
                .bind(version_id)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(count)
    }
}
