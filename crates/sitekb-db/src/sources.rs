//! Source repository.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::info;
use uuid::Uuid;

use sitekb_core::{new_v7, Error, Result, Source, SourceRepository};

const SOURCE_COLUMNS: &str = "id, name, base_url, description, crawl_config, current_version_id, \
                              created_at, updated_at";

/// PostgreSQL implementation of SourceRepository.
#[derive(Clone)]
pub struct PgSourceRepository {
    pool: Pool<Postgres>,
}

impl PgSourceRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub(crate) fn parse_source_row(row: &PgRow) -> Source {
        Source {
            id: row.get("id"),
            name: row.get("name"),
            base_url: row.get("base_url"),
            description: row.get("description"),
            crawl_config: row.get("crawl_config"),
            current_version_id: row.get("current_version_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl SourceRepository for PgSourceRepository {
    async fn ensure_source(&self, name: &str, base_url: &str) -> Result<Source> {
        let inserted = sqlx::query(
            "INSERT INTO sources (id, name, base_url) VALUES ($1, $2, $3)
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(new_v7())
        .bind(name)
        .bind(base_url)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if inserted.rows_affected() > 0 {
            info!(
                subsystem = "db",
                component = "sources",
                op = "ensure_source",
                source_name = name,
                url = base_url,
                "Created source"
            );
        }

        self.get_by_name(name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("source {name}")))
    }

    async fn get(&self, source_id: Uuid) -> Result<Option<Source>> {
        let row = sqlx::query(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE id = $1"
        ))
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.as_ref().map(Self::parse_source_row))
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Source>> {
        let row = sqlx::query(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.as_ref().map(Self::parse_source_row))
    }
}
