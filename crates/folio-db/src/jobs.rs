//! Command queue repository implementation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use tokio::sync::Notify;
use uuid::Uuid;

use folio_core::{Error, Job, JobRepository, JobStatus, Result};

const JOB_COLUMNS: &str = "id, app, command, payload, status::text AS status, result, \
                           error_message, attempts, max_attempts, created_at, started_at, \
                           completed_at";

/// PostgreSQL implementation of JobRepository.
pub struct PgJobRepository {
    pool: Pool<Postgres>,
    /// Wakes idle workers as soon as a job is queued.
    notify: Arc<Notify>,
}

impl PgJobRepository {
    /// Create a new PgJobRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    fn parse_job_row(row: PgRow) -> Result<Job> {
        let status: String = row.get("status");
        let status = JobStatus::parse(&status)
            .ok_or_else(|| Error::Job(format!("Unknown job status in store: {}", status)))?;

        Ok(Job {
            id: row.get("id"),
            app: row.get("app"),
            command: row.get("command"),
            payload: row.get("payload"),
            status,
            result: row.get("result"),
            error_message: row.get("error_message"),
            attempts: row.get("attempts"),
            max_attempts: row.get("max_attempts"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }

    /// Apply a terminal transition, refusing any job that is not running.
    async fn finish(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<&str>,
        result: Option<JsonValue>,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE command_queue
             SET status = $1::command_status, completed_at = $2, result = $3,
                 error_message = $4
             WHERE id = $5 AND status = 'running'::command_status",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(&result)
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if updated.rows_affected() == 0 {
            return Err(Error::Job(format!(
                "Job {} is not running; refusing transition to {}",
                id, status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn queue(
        &self,
        app: &str,
        command: &str,
        payload: JsonValue,
        max_attempts: i32,
    ) -> Result<Uuid> {
        let job_id = Uuid::now_v7();

        sqlx::query(
            "INSERT INTO command_queue (id, app, command, payload, status, max_attempts, created_at)
             VALUES ($1, $2, $3, $4, 'queued'::command_status, $5, $6)",
        )
        .bind(job_id)
        .bind(app)
        .bind(command)
        .bind(&payload)
        .bind(max_attempts.max(1))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        self.notify.notify_waiters();
        Ok(job_id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM command_queue WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn claim_next(&self, commands: &[String]) -> Result<Option<Job>> {
        // SKIP LOCKED keeps concurrent workers from dispatching the same job.
        // Empty array = claim any command.
        let row = sqlx::query(&format!(
            "UPDATE command_queue
             SET status = 'running'::command_status, started_at = $1, attempts = 1
             WHERE id = (
                 SELECT id FROM command_queue
                 WHERE status = 'queued'::command_status
                   AND (cardinality($2::text[]) = 0 OR (app || '/' || command) = ANY($2))
                 ORDER BY created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(commands)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn begin_retry(&self, id: Uuid, attempt: i32, last_error: &str) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE command_queue SET attempts = $1, error_message = $2
             WHERE id = $3 AND status = 'running'::command_status AND attempts < $1",
        )
        .bind(attempt)
        .bind(last_error)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if updated.rows_affected() == 0 {
            return Err(Error::Job(format!(
                "Job {} cannot start attempt {}: not running or attempt already recorded",
                id, attempt
            )));
        }
        Ok(())
    }

    async fn complete(&self, id: Uuid, result: Option<JsonValue>) -> Result<()> {
        self.finish(id, JobStatus::Completed, None, result).await
    }

    async fn fail(&self, id: Uuid, error: &str, result: Option<JsonValue>) -> Result<()> {
        self.finish(id, JobStatus::Failed, Some(error), result).await
    }

    async fn cancel(&self, id: Uuid, reason: &str) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE command_queue
             SET status = 'failed'::command_status, completed_at = $1, error_message = $2
             WHERE id = $3 AND status = 'queued'::command_status",
        )
        .bind(Utc::now())
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if updated.rows_affected() == 0 {
            return Err(Error::Job(format!(
                "Job {} is not queued; refusing cancellation",
                id
            )));
        }
        Ok(())
    }

    async fn requeue_stale(&self, started_before: DateTime<Utc>) -> Result<u64> {
        let updated = sqlx::query(
            "UPDATE command_queue
             SET status = 'queued'::command_status, started_at = NULL,
                 error_message = 'Requeued after worker lease expired'
             WHERE status = 'running'::command_status AND started_at < $1",
        )
        .bind(started_before)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(updated.rows_affected())
    }

    async fn pending_count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM command_queue WHERE status = 'queued'::command_status",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(count.0)
    }

    fn job_notify(&self) -> Option<Arc<Notify>> {
        Some(self.notify.clone())
    }
}
