//! Conversation thread state repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres};

use folio_core::{Error, Result, ThreadState, ThreadStateRepository};

/// PostgreSQL implementation of ThreadStateRepository.
///
/// The whole state is one JSONB document per thread; a save replaces it.
pub struct PgThreadStateRepository {
    pool: Pool<Postgres>,
}

impl PgThreadStateRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ThreadStateRepository for PgThreadStateRepository {
    async fn load(&self, thread_id: &str) -> Result<Option<ThreadState>> {
        let state: Option<JsonValue> =
            sqlx::query_scalar("SELECT state FROM chat_thread_state WHERE thread_id = $1")
                .bind(thread_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Database)?;

        state
            .map(|value| serde_json::from_value(value).map_err(Error::from))
            .transpose()
    }

    async fn save(&self, thread_id: &str, state: &ThreadState) -> Result<()> {
        let value = serde_json::to_value(state)?;
        sqlx::query(
            "INSERT INTO chat_thread_state (thread_id, state, updated_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (thread_id) DO UPDATE SET state = EXCLUDED.state,
                                                   updated_at = EXCLUDED.updated_at",
        )
        .bind(thread_id)
        .bind(&value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}
