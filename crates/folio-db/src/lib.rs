//! # folio-db
//!
//! Record store and byte storage for folio.
//!
//! This crate provides:
//! - Connection pool management
//! - PostgreSQL repositories for sources, notebooks, transformations, insights,
//!   embeddings (pgvector), the command queue and conversation threads
//! - An in-process [`MemoryStore`] with the same transition guards
//! - Token-measured recursive chunking for embedding
//! - Local and `gs://` object storage
//!
//! ## Example
//!
//! ```rust,ignore
//! use folio_db::{Database, PoolConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/folio", PoolConfig::default()).await?;
//!     db.migrate().await?;
//!
//!     let repos = db.repositories();
//!     println!("queued jobs: {}", repos.jobs.pending_count().await?);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

pub mod chunking;
pub mod embeddings;
pub mod file_storage;
pub mod jobs;
pub mod memory;
pub mod pool;
pub mod sources;
pub mod threads;
pub mod transformations;

// Re-export core types
pub use folio_core::*;

pub use chunking::{Chunker, ChunkerConfig, RecursiveTokenChunker};
pub use embeddings::PgEmbeddingRepository;
pub use file_storage::{
    FilesystemBackend, GcsBackend, GcsConfig, ObjectStore, StorageBackend, GCS_SCHEME,
};
pub use jobs::PgJobRepository;
pub use memory::MemoryStore;
pub use pool::{create_pool, PoolConfig};
pub use sources::{PgNotebookRepository, PgSourceRepository};
pub use threads::PgThreadStateRepository;
pub use transformations::{PgInsightRepository, PgTransformationRepository};

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub sources: Arc<PgSourceRepository>,
    pub notebooks: Arc<PgNotebookRepository>,
    pub transformations: Arc<PgTransformationRepository>,
    pub insights: Arc<PgInsightRepository>,
    pub embeddings: Arc<PgEmbeddingRepository>,
    /// Command queue; holds the notifier idle workers wait on.
    pub jobs: Arc<PgJobRepository>,
    pub threads: Arc<PgThreadStateRepository>,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            sources: Arc::new(PgSourceRepository::new(pool.clone())),
            notebooks: Arc::new(PgNotebookRepository::new(pool.clone())),
            transformations: Arc::new(PgTransformationRepository::new(pool.clone())),
            insights: Arc::new(PgInsightRepository::new(pool.clone())),
            embeddings: Arc::new(PgEmbeddingRepository::new(pool.clone())),
            jobs: Arc::new(PgJobRepository::new(pool.clone())),
            threads: Arc::new(PgThreadStateRepository::new(pool.clone())),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool(url, config).await?;
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

    /// Repository handles as trait objects.
    pub fn repositories(&self) -> Repositories {
        Repositories {
            sources: self.sources.clone(),
            notebooks: self.notebooks.clone(),
            transformations: self.transformations.clone(),
            insights: self.insights.clone(),
            embeddings: self.embeddings.clone(),
            jobs: self.jobs.clone(),
            threads: self.threads.clone(),
        }
    }
}
