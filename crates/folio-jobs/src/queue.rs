//! Command submission, status polling and synchronous execution.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use folio_core::defaults::{JOB_MAX_ATTEMPTS, SYNC_EXECUTION_TIMEOUT_SECS};
use folio_core::{Error, JobRepository, JobStatusReport, Result};

use crate::handler::{command_key, CommandRegistry, JobResult};
use crate::retry::{run_with_retry, AttemptTracker};

/// Error recorded on a queued job that was executed inline instead.
const SUPERSEDED_BY_INLINE: &str = "Superseded by inline execution";

/// Queue behaviour switches.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Skip the queue and run every verified submission inline.
    pub force_sync: bool,
    /// Bound on inline execution.
    pub sync_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            force_sync: false,
            sync_timeout: Duration::from_secs(SYNC_EXECUTION_TIMEOUT_SECS),
        }
    }
}

impl QueueConfig {
    /// Reads `FORCE_SYNC_PROCESSING` (`true`/`1`/`yes`).
    pub fn from_env() -> Self {
        let force_sync = std::env::var("FORCE_SYNC_PROCESSING")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);
        Self {
            force_sync,
            ..Self::default()
        }
    }

    pub fn with_force_sync(mut self, force_sync: bool) -> Self {
        self.force_sync = force_sync;
        self
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }
}

/// How a verified submission was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Durably queued under this job id.
    Queued(Uuid),
    /// Ran inline because the queue was bypassed or unavailable.
    Completed(JobResult),
}

impl Submission {
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            Submission::Queued(id) => Some(*id),
            Submission::Completed(_) => None,
        }
    }
}

/// Front door of the command queue.
#[derive(Clone)]
pub struct CommandService {
    jobs: Arc<dyn JobRepository>,
    registry: CommandRegistry,
    config: QueueConfig,
}

impl CommandService {
    pub fn new(jobs: Arc<dyn JobRepository>, registry: CommandRegistry) -> Self {
        Self {
            jobs,
            registry,
            config: QueueConfig::default(),
        }
    }

    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Enqueue durable work and return its id immediately.
    ///
    /// The job row records the attempt budget of the registered handler, or a
    /// single attempt when no handler is registered in this process.
    #[instrument(skip(self, payload), fields(subsystem = "jobs", component = "queue", op = "submit"))]
    pub async fn submit(&self, app: &str, command: &str, payload: JsonValue) -> Result<Uuid> {
        let max_attempts = match self.registry.get(app, command).await {
            Some(handler) => handler.retry_policy().attempts() as i32,
            None => JOB_MAX_ATTEMPTS,
        };
        let job_id = self.jobs.queue(app, command, payload, max_attempts).await?;
        info!(%job_id, command = %command_key(app, command), max_attempts, "Command queued");
        Ok(job_id)
    }

    /// Current status of a job. Safe to poll concurrently.
    pub async fn get_status(&self, job_id: Uuid) -> Result<JobStatusReport> {
        self.jobs
            .get(job_id)
            .await?
            .map(|job| job.status_report())
            .ok_or_else(|| Error::NotFound(format!("Job {} not found", job_id)))
    }

    /// Run the handler inline with its retry policy, bounded by `timeout`.
    ///
    /// Nothing is persisted: the handler sees an ephemeral, non-durable id.
    #[instrument(skip(self, payload), fields(subsystem = "jobs", component = "queue", op = "execute_sync"))]
    pub async fn execute_sync(
        &self,
        app: &str,
        command: &str,
        payload: JsonValue,
        timeout: Duration,
    ) -> Result<JobResult> {
        let key = command_key(app, command);
        let handler = self
            .registry
            .get(app, command)
            .await
            .ok_or_else(|| Error::Job(format!("No handler registered for {}", key)))?;

        let job_id = Uuid::now_v7();
        let execution = tokio::time::timeout(
            timeout,
            run_with_retry(
                handler.as_ref(),
                job_id,
                payload,
                false,
                AttemptTracker::default(),
            ),
        )
        .await
        .map_err(|_| {
            Error::Timeout(format!(
                "{} exceeded {} seconds of synchronous execution",
                key,
                timeout.as_secs()
            ))
        })?;

        info!(
            command = %key,
            attempts = execution.attempts,
            success = execution.result.is_success(),
            "Synchronous execution finished"
        );
        Ok(execution.result)
    }

    /// Submit and confirm the job row is readable, falling back to inline
    /// execution when submission or verification fails.
    pub async fn submit_verified(
        &self,
        app: &str,
        command: &str,
        payload: JsonValue,
    ) -> Result<Submission> {
        if self.config.force_sync {
            info!(command = %command_key(app, command), "FORCE_SYNC_PROCESSING set, running inline");
            return self.run_inline(app, command, payload).await;
        }

        match self.submit(app, command, payload.clone()).await {
            Ok(job_id) => {
                match self.jobs.get(job_id).await {
                    Ok(Some(_)) => return Ok(Submission::Queued(job_id)),
                    Ok(None) => warn!(%job_id, "Submitted job not readable, running inline"),
                    Err(e) => {
                        warn!(%job_id, error = %e, "Job verification failed, running inline")
                    }
                }
                // The row may still exist; a worker must not run it a second time.
                if let Err(e) = self.jobs.cancel(job_id, SUPERSEDED_BY_INLINE).await {
                    warn!(%job_id, error = %e, "Could not cancel unverified job");
                }
                self.run_inline(app, command, payload).await
            }
            Err(e) => {
                warn!(error = %e, "Job submission failed, running inline");
                self.run_inline(app, command, payload).await
            }
        }
    }

    async fn run_inline(&self, app: &str, command: &str, payload: JsonValue) -> Result<Submission> {
        self.execute_sync(app, command, payload, self.config.sync_timeout)
            .await
            .map(Submission::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use folio_core::{Job, JobStatus};
    use folio_db::MemoryStore;
    use serde_json::json;

    use crate::handler::{CommandContext, CommandHandler};
    use crate::retry::{Backoff, RetryPolicy};

    struct Doubler;

    #[async_trait]
    impl CommandHandler for Doubler {
        fn app(&self) -> &str {
            "test"
        }

        fn name(&self) -> &str {
            "double"
        }

        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy {
                max_attempts: 3,
                backoff: Backoff::None,
            }
        }

        async fn execute(&self, ctx: CommandContext) -> JobResult {
            assert!(!ctx.durable);
            let n = ctx.payload["n"].as_i64().unwrap_or(0);
            JobResult::Success(Some(json!({"n": n * 2})))
        }
    }

    struct Sleeper;

    #[async_trait]
    impl CommandHandler for Sleeper {
        fn app(&self) -> &str {
            "test"
        }

        fn name(&self) -> &str {
            "sleep"
        }

        async fn execute(&self, _ctx: CommandContext) -> JobResult {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            JobResult::Success(None)
        }
    }

    /// Accepts jobs but never returns them.
    struct Forgetful;

    #[async_trait]
    impl JobRepository for Forgetful {
        async fn queue(&self, _: &str, _: &str, _: JsonValue, _: i32) -> Result<Uuid> {
            Ok(Uuid::new_v4())
        }
        async fn get(&self, _: Uuid) -> Result<Option<Job>> {
            Ok(None)
        }
        async fn claim_next(&self, _: &[String]) -> Result<Option<Job>> {
            Ok(None)
        }
        async fn begin_retry(&self, _: Uuid, _: i32, _: &str) -> Result<()> {
            Ok(())
        }
        async fn complete(&self, _: Uuid, _: Option<JsonValue>) -> Result<()> {
            Ok(())
        }
        async fn fail(&self, _: Uuid, _: &str, _: Option<JsonValue>) -> Result<()> {
            Ok(())
        }
        async fn cancel(&self, _: Uuid, _: &str) -> Result<()> {
            Ok(())
        }
        async fn requeue_stale(&self, _: chrono::DateTime<chrono::Utc>) -> Result<u64> {
            Ok(0)
        }
        async fn pending_count(&self) -> Result<i64> {
            Ok(0)
        }
    }

    /// Stores jobs but reports them missing on read.
    struct Unreadable {
        inner: Arc<dyn JobRepository>,
    }

    #[async_trait]
    impl JobRepository for Unreadable {
        async fn queue(
            &self,
            app: &str,
            command: &str,
            payload: JsonValue,
            max_attempts: i32,
        ) -> Result<Uuid> {
            self.inner.queue(app, command, payload, max_attempts).await
        }
        async fn get(&self, _: Uuid) -> Result<Option<Job>> {
            Ok(None)
        }
        async fn claim_next(&self, commands: &[String]) -> Result<Option<Job>> {
            self.inner.claim_next(commands).await
        }
        async fn begin_retry(&self, id: Uuid, attempt: i32, last_error: &str) -> Result<()> {
            self.inner.begin_retry(id, attempt, last_error).await
        }
        async fn complete(&self, id: Uuid, result: Option<JsonValue>) -> Result<()> {
            self.inner.complete(id, result).await
        }
        async fn fail(&self, id: Uuid, error: &str, result: Option<JsonValue>) -> Result<()> {
            self.inner.fail(id, error, result).await
        }
        async fn cancel(&self, id: Uuid, reason: &str) -> Result<()> {
            self.inner.cancel(id, reason).await
        }
        async fn requeue_stale(
            &self,
            started_before: chrono::DateTime<chrono::Utc>,
        ) -> Result<u64> {
            self.inner.requeue_stale(started_before).await
        }
        async fn pending_count(&self) -> Result<i64> {
            self.inner.pending_count().await
        }
    }

    async fn service(jobs: Arc<dyn JobRepository>) -> CommandService {
        let registry = CommandRegistry::new();
        registry.register(Arc::new(Doubler)).await;
        registry.register(Arc::new(Sleeper)).await;
        CommandService::new(jobs, registry)
    }

    #[tokio::test]
    async fn test_submit_records_policy_attempts() {
        let store = MemoryStore::new();
        let svc = service(store.repositories().jobs).await;

        let id = svc.submit("test", "double", json!({"n": 2})).await.unwrap();
        let job = store.jobs().await.pop().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.max_attempts, 3);

        let unknown = svc.submit("other", "cmd", json!({})).await.unwrap();
        let report = svc.get_status(unknown).await.unwrap();
        assert_eq!(report.status, JobStatus::Queued);
        assert_eq!(report.execution_metadata.attempts, 0);
    }

    #[tokio::test]
    async fn test_get_status_unknown_job() {
        let svc = service(MemoryStore::new().repositories().jobs).await;
        let err = svc.get_status(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_execute_sync_runs_handler_inline() {
        let store = MemoryStore::new();
        let svc = service(store.repositories().jobs).await;

        let result = svc
            .execute_sync("test", "double", json!({"n": 21}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result, JobResult::Success(Some(json!({"n": 42}))));
        assert!(store.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_execute_sync_unknown_command() {
        let svc = service(MemoryStore::new().repositories().jobs).await;
        let err = svc
            .execute_sync("test", "missing", json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Job(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_sync_timeout() {
        let svc = service(MemoryStore::new().repositories().jobs).await;
        let err = svc
            .execute_sync("test", "sleep", json!({}), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_submit_verified_queues() {
        let store = MemoryStore::new();
        let svc = service(store.repositories().jobs).await;

        let submission = svc
            .submit_verified("test", "double", json!({"n": 1}))
            .await
            .unwrap();
        let job_id = submission.job_id().unwrap();
        assert_eq!(store.jobs().await[0].id, job_id);
    }

    #[tokio::test]
    async fn test_submit_verified_falls_back_when_unreadable() {
        let svc = service(Arc::new(Forgetful)).await;
        let submission = svc
            .submit_verified("test", "double", json!({"n": 4}))
            .await
            .unwrap();
        assert_eq!(
            submission,
            Submission::Completed(JobResult::Success(Some(json!({"n": 8}))))
        );
    }

    #[tokio::test]
    async fn test_unverified_job_cancelled_before_inline_run() {
        let store = MemoryStore::new();
        let svc = service(Arc::new(Unreadable {
            inner: store.repositories().jobs,
        }))
        .await;

        let submission = svc
            .submit_verified("test", "double", json!({"n": 3}))
            .await
            .unwrap();
        assert_eq!(
            submission,
            Submission::Completed(JobResult::Success(Some(json!({"n": 6}))))
        );

        let jobs = store.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert_eq!(jobs[0].error_message.as_deref(), Some(SUPERSEDED_BY_INLINE));
        assert!(store.repositories().jobs.claim_next(&[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_force_sync_skips_queue() {
        let store = MemoryStore::new();
        let svc = service(store.repositories().jobs)
            .await
            .with_config(QueueConfig::default().with_force_sync(true));

        let submission = svc
            .submit_verified("test", "double", json!({"n": 5}))
            .await
            .unwrap();
        assert!(submission.job_id().is_none());
        assert!(store.jobs().await.is_empty());
    }
}
