//! Source embedding repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use folio_core::{EmbeddedChunk, EmbeddingRepository, Error, Result, SourceEmbedding};

/// PostgreSQL implementation of EmbeddingRepository.
pub struct PgEmbeddingRepository {
    pool: Pool<Postgres>,
}

impl PgEmbeddingRepository {
    /// Create a new PgEmbeddingRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmbeddingRepository for PgEmbeddingRepository {
    async fn replace_for_source(
        &self,
        source_id: Uuid,
        owner: Uuid,
        chunks: &[EmbeddedChunk],
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query("DELETE FROM source_embedding WHERE source_id = $1")
            .bind(source_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let now = Utc::now();
        for (index, chunk) in chunks.iter().enumerate() {
            sqlx::query(
                "INSERT INTO source_embedding (id, source_id, chunk_index, content, embedding, owner, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(Uuid::now_v7())
            .bind(source_id)
            .bind(index as i32)
            .bind(&chunk.content)
            .bind(&chunk.vector)
            .bind(owner)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "embeddings",
            op = "replace_for_source",
            source_id = %source_id,
            chunk_count = chunks.len(),
            "Replaced source embeddings"
        );
        Ok(chunks.len())
    }

    async fn list_for_source(&self, source_id: Uuid) -> Result<Vec<SourceEmbedding>> {
        let rows = sqlx::query(
            "SELECT id, source_id, chunk_index, content, embedding, owner, created_at
             FROM source_embedding
             WHERE source_id = $1
             ORDER BY chunk_index",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| SourceEmbedding {
                id: row.get("id"),
                source_id: row.get("source_id"),
                chunk_index: row.get("chunk_index"),
                content: row.get("content"),
                embedding: row.get("embedding"),
                owner: row.get("owner"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn delete_for_source(&self, source_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM source_embedding WHERE source_id = $1")
            .bind(source_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}
