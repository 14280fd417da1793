//! Transformation and insight repository implementations.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use uuid::Uuid;

use folio_core::{
    Error, InsightRepository, NewTransformation, Result, SourceInsight, Transformation,
    TransformationRepository,
};

/// PostgreSQL implementation of TransformationRepository.
pub struct PgTransformationRepository {
    pool: Pool<Postgres>,
}

impl PgTransformationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: PgRow) -> Transformation {
        Transformation {
            id: row.get("id"),
            name: row.get("name"),
            title: row.get("title"),
            description: row.get("description"),
            prompt: row.get("prompt"),
            apply_default: row.get("apply_default"),
            owner: row.get("owner"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl TransformationRepository for PgTransformationRepository {
    async fn create(&self, t: NewTransformation) -> Result<Transformation> {
        let row = sqlx::query(
            "INSERT INTO transformation (id, name, title, description, prompt, apply_default, owner, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING id, name, title, description, prompt, apply_default, owner, created_at",
        )
        .bind(Uuid::now_v7())
        .bind(&t.name)
        .bind(&t.title)
        .bind(&t.description)
        .bind(&t.prompt)
        .bind(t.apply_default)
        .bind(t.owner)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self::parse_row(row))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transformation>> {
        let row = sqlx::query(
            "SELECT id, name, title, description, prompt, apply_default, owner, created_at
             FROM transformation WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_row))
    }

    async fn list_defaults(&self, owner: Uuid) -> Result<Vec<Transformation>> {
        let rows = sqlx::query(
            "SELECT id, name, title, description, prompt, apply_default, owner, created_at
             FROM transformation
             WHERE apply_default AND (owner IS NULL OR owner = $1)
             ORDER BY name",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_row).collect())
    }
}

/// PostgreSQL implementation of InsightRepository.
pub struct PgInsightRepository {
    pool: Pool<Postgres>,
}

impl PgInsightRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InsightRepository for PgInsightRepository {
    async fn add(
        &self,
        source_id: Uuid,
        insight_type: &str,
        content: &str,
        owner: Uuid,
    ) -> Result<SourceInsight> {
        let insight = SourceInsight {
            id: Uuid::now_v7(),
            source_id,
            insight_type: insight_type.to_string(),
            content: content.to_string(),
            owner,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO source_insight (id, source_id, insight_type, content, owner, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(insight.id)
        .bind(insight.source_id)
        .bind(&insight.insight_type)
        .bind(&insight.content)
        .bind(insight.owner)
        .bind(insight.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(insight)
    }

    async fn list_for_source(&self, source_id: Uuid) -> Result<Vec<SourceInsight>> {
        let rows = sqlx::query(
            "SELECT id, source_id, insight_type, content, owner, created_at
             FROM source_insight WHERE source_id = $1
             ORDER BY created_at",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| SourceInsight {
                id: row.get("id"),
                source_id: row.get("source_id"),
                insight_type: row.get("insight_type"),
                content: row.get("content"),
                owner: row.get("owner"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}
