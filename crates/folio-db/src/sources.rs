//! Source and notebook repository implementations.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use uuid::Uuid;

use folio_core::{
    Asset, Error, NewSource, Notebook, NotebookRepository, Result, Source, SourceRepository,
};

const SOURCE_COLUMNS: &str = "id, title, topics, full_text, asset_url, asset_file_path, owner, \
                              command, created_at, updated_at";

const SOURCE_COLUMNS_JOINED: &str = "s.id, s.title, s.topics, s.full_text, s.asset_url, \
                                     s.asset_file_path, s.owner, s.command, s.created_at, \
                                     s.updated_at";

/// PostgreSQL implementation of SourceRepository.
pub struct PgSourceRepository {
    pool: Pool<Postgres>,
}

impl PgSourceRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_source_row(row: PgRow) -> Source {
        let url: Option<String> = row.get("asset_url");
        let file_path: Option<String> = row.get("asset_file_path");
        let asset = if url.is_none() && file_path.is_none() {
            None
        } else {
            Some(Asset { url, file_path })
        };

        Source {
            id: row.get("id"),
            title: row.get("title"),
            topics: row.get("topics"),
            full_text: row.get("full_text"),
            asset,
            owner: row.get("owner"),
            command: row.get("command"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl SourceRepository for PgSourceRepository {
    async fn insert(&self, source: NewSource) -> Result<Source> {
        let now = Utc::now();
        let asset = source.asset.unwrap_or_default();
        let row = sqlx::query(&format!(
            "INSERT INTO source (id, title, topics, asset_url, asset_file_path, owner, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
             RETURNING {SOURCE_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(&source.title)
        .bind(&source.topics)
        .bind(&asset.url)
        .bind(&asset.file_path)
        .bind(source.owner)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self::parse_source_row(row))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Source>> {
        let row = sqlx::query(&format!("SELECT {SOURCE_COLUMNS} FROM source WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(Self::parse_source_row))
    }

    async fn update(&self, source: &Source) -> Result<()> {
        let asset = source.asset.clone().unwrap_or_default();
        let result = sqlx::query(
            "UPDATE source
             SET title = $1, topics = $2, full_text = $3, asset_url = $4,
                 asset_file_path = $5, updated_at = $6
             WHERE id = $7",
        )
        .bind(&source.title)
        .bind(&source.topics)
        .bind(&source.full_text)
        .bind(&asset.url)
        .bind(&asset.file_path)
        .bind(Utc::now())
        .bind(source.id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::SourceNotFound(source.id));
        }
        Ok(())
    }

    async fn set_command(&self, id: Uuid, job_id: Option<Uuid>) -> Result<()> {
        let result = sqlx::query("UPDATE source SET command = $1, updated_at = $2 WHERE id = $3")
            .bind(job_id)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::SourceNotFound(id));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        // Insights, embeddings and notebook links cascade.
        sqlx::query("DELETE FROM source WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn link_notebook(&self, source_id: Uuid, notebook_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO source_notebook (source_id, notebook_id)
             VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(source_id)
        .bind(notebook_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn notebooks_for(&self, source_id: Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT notebook_id FROM source_notebook WHERE source_id = $1 ORDER BY created_at",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(|r| r.get("notebook_id")).collect())
    }

    async fn list_for_notebook(&self, notebook_id: Uuid) -> Result<Vec<Source>> {
        let rows = sqlx::query(&format!(
            "SELECT {SOURCE_COLUMNS_JOINED} FROM source s
             JOIN source_notebook sn ON sn.source_id = s.id
             WHERE sn.notebook_id = $1
             ORDER BY s.updated_at DESC"
        ))
        .bind(notebook_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_source_row).collect())
    }
}

/// PostgreSQL implementation of NotebookRepository.
pub struct PgNotebookRepository {
    pool: Pool<Postgres>,
}

impl PgNotebookRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotebookRepository for PgNotebookRepository {
    async fn create(&self, owner: Uuid, name: &str, description: Option<&str>) -> Result<Notebook> {
        let now = Utc::now();
        let id = Uuid::now_v7();
        sqlx::query(
            "INSERT INTO notebook (id, name, description, owner, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $5)",
        )
        .bind(id)
        .bind(name)
        .bind(description)
        .bind(owner)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Notebook {
            id,
            name: name.to_string(),
            description: description.map(String::from),
            owner,
            archived: false,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notebook>> {
        let row = sqlx::query(
            "SELECT id, name, description, owner, archived, created_at, updated_at
             FROM notebook WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| Notebook {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            owner: row.get("owner"),
            archived: row.get("archived"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }
}
