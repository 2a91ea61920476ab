//! # sitekb-db
//!
//! PostgreSQL + pgvector storage layer for sitekb.
//!
//! This crate provides:
//! - Connection pool management
//! - The claim protocol for build tasks and recording tasks
//! - Sources, versions, and the Blue/Green publisher
//! - Document and chunk storage
//! - The heading-aware Markdown chunker
//!
//! ## Example
//!
//! ```rust,ignore
//! use sitekb_db::{BuildTaskRepository, ClaimFilter, ClaimSettings, Database};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/sitekb").await?;
//!
//!     if let Some(task) = db
//!         .build_tasks
//!         .claim_next(&ClaimFilter::default(), &ClaimSettings::default())
//!         .await?
//!     {
//!         println!("Claimed {}", task.id);
//!     }
//!     Ok(())
//! }
//! ```
pub mod build_tasks;
pub mod chunking;
pub mod documents;
pub mod pool;
pub mod recording_tasks;
pub mod sources;
pub mod versions;

// Always compiled so integration tests (in tests/) can use it.
pub mod test_fixtures;

// Re-export core types
pub use sitekb_core::*;

pub use build_tasks::{PgBuildTaskRepository, EXHAUSTED_REASON, RECOVERED_REASON};
pub use chunking::{ChunkerConfig, DocumentChunk, DocumentChunker};
pub use documents::PgDocumentRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use recording_tasks::PgRecordingTaskRepository;
pub use sources::PgSourceRepository;
pub use versions::PgVersionRepository;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Build tasks and their claim protocol.
    pub build_tasks: PgBuildTaskRepository,
    /// Per-chunk recording tasks.
    pub recording_tasks: PgRecordingTaskRepository,
    pub sources: PgSourceRepository,
    /// Source versions and publishing.
    pub versions: PgVersionRepository,
    pub documents: PgDocumentRepository,
}

impl Database {
    /// Create a new database context from a pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            build_tasks: PgBuildTaskRepository::new(pool.clone()),
            recording_tasks: PgRecordingTaskRepository::new(pool.clone()),
            sources: PgSourceRepository::new(pool.clone()),
            versions: PgVersionRepository::new(pool.clone()),
            documents: PgDocumentRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect to database with default pool settings.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
