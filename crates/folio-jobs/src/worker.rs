//! Job worker that claims queued commands and runs them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use folio_core::defaults::{
    JOB_LEASE_SECS, JOB_MAX_CONCURRENT, JOB_POLL_INTERVAL_MS, JOB_TIMEOUT_SECS,
    WORKER_EVENT_CAPACITY,
};
use folio_core::{Error, Job, JobRepository, Result};

use crate::handler::{CommandHandler, CommandRegistry, JobResult};
use crate::retry::{run_with_retry, AttemptTracker};

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrent jobs.
    pub max_concurrent_jobs: usize,
    /// Whether to enable job processing.
    pub enabled: bool,
    /// Bound on one job execution, retries included.
    pub job_timeout: Duration,
    /// Running jobs older than this are presumed orphaned and requeued.
    pub job_lease: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: JOB_POLL_INTERVAL_MS,
            max_concurrent_jobs: JOB_MAX_CONCURRENT,
            enabled: true,
            job_timeout: Duration::from_secs(JOB_TIMEOUT_SECS),
            job_lease: Duration::from_secs(JOB_LEASE_SECS),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `4` | Max concurrent jobs |
    /// | `JOB_POLL_INTERVAL_MS` | `500` | Polling interval when queue is empty |
    /// | `JOB_TIMEOUT_SECS` | `600` | Bound on one job including retries |
    /// | `JOB_LEASE_SECS` | twice the timeout | Age at which a running job is requeued |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = std::env::var("JOB_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(JOB_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(JOB_POLL_INTERVAL_MS);

        let job_timeout = std::env::var("JOB_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(JOB_TIMEOUT_SECS));

        // A lease shorter than the timeout would steal jobs that are still running.
        let job_lease = std::env::var("JOB_LEASE_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(job_timeout * 2)
            .max(job_timeout);

        Self {
            poll_interval_ms,
            max_concurrent_jobs,
            enabled,
            job_timeout,
            job_lease,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_job_lease(mut self, lease: Duration) -> Self {
        self.job_lease = lease;
        self
    }
}

/// Event emitted by the job worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A job was claimed and started.
    JobStarted { job_id: Uuid, command: String },
    /// One attempt failed transiently; another follows.
    JobAttemptFailed {
        job_id: Uuid,
        command: String,
        attempt: u32,
        error: String,
    },
    /// A job completed successfully.
    JobCompleted {
        job_id: Uuid,
        command: String,
        attempts: u32,
    },
    /// A job failed terminally.
    JobFailed {
        job_id: Uuid,
        command: String,
        error: String,
    },
    WorkerStarted,
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    ///
    /// Jobs already claimed finish before the loop exits.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Job worker that processes commands from the queue.
pub struct JobWorker {
    jobs: Arc<dyn JobRepository>,
    registry: CommandRegistry,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    pub fn new(jobs: Arc<dyn JobRepository>, registry: CommandRegistry, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(WORKER_EVENT_CAPACITY);
        Self {
            jobs,
            registry,
            config,
            event_tx,
        }
    }

    /// Register a handler for its command key.
    pub async fn register_handler(&self, handler: Arc<dyn CommandHandler>) {
        self.registry.register(handler).await;
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Claim up to `max_concurrent_jobs` at a time and run them concurrently.
    ///
    /// Sleeps only when the queue is empty, waking early on enqueue when the
    /// repository offers a notification handle.
    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker"))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Job worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_jobs,
            job_lease_secs = self.config.job_lease.as_secs(),
            "Job worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let max_concurrent = self.config.max_concurrent_jobs.max(1);
        let notify = self
            .jobs
            .job_notify()
            .unwrap_or_else(|| Arc::new(Notify::new()));

        let sweep_interval = (self.config.job_lease / 2).max(poll_interval);
        let mut last_sweep: Option<Instant> = None;

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Job worker received shutdown signal");
                break;
            }

            if last_sweep.map_or(true, |at| at.elapsed() >= sweep_interval) {
                self.requeue_orphans().await;
                last_sweep = Some(Instant::now());
            }

            let mut tasks = tokio::task::JoinSet::new();
            for _ in 0..max_concurrent {
                match self.claim_job().await {
                    Some(job) => {
                        let worker = self.clone_refs();
                        tasks.spawn(async move {
                            worker.execute_job(job).await;
                        });
                    }
                    None => break,
                }
            }

            if tasks.is_empty() {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Job worker received shutdown signal");
                        break;
                    }
                    _ = notify.notified() => {
                        debug!("Woken by enqueue");
                    }
                    _ = sleep(poll_interval) => {}
                }
            } else {
                debug!(claimed = tasks.len(), "Processing concurrent job batch");
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(error = ?e, "Job task panicked");
                    }
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Job worker stopped");
    }

    /// Requeue running jobs whose claim outlived the lease.
    async fn requeue_orphans(&self) {
        let Ok(lease) = chrono::Duration::from_std(self.config.job_lease) else {
            return;
        };
        match self.jobs.requeue_stale(chrono::Utc::now() - lease).await {
            Ok(0) => {}
            Ok(moved) => warn!(moved, "Requeued jobs whose lease expired"),
            Err(e) => error!(error = %e, "Failed to requeue stale jobs"),
        }
    }

    async fn claim_job(&self) -> Option<Job> {
        let commands = self.registry.keys().await;
        if commands.is_empty() {
            return None;
        }

        match self.jobs.claim_next(&commands).await {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "Failed to claim job");
                None
            }
        }
    }

    fn clone_refs(&self) -> JobRunner {
        JobRunner {
            jobs: self.jobs.clone(),
            registry: self.registry.clone(),
            event_tx: self.event_tx.clone(),
            job_timeout: self.config.job_timeout,
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    pub async fn pending_count(&self) -> Result<i64> {
        self.jobs.pending_count().await
    }
}

/// References needed to execute one claimed job in a spawned task.
struct JobRunner {
    jobs: Arc<dyn JobRepository>,
    registry: CommandRegistry,
    event_tx: broadcast::Sender<WorkerEvent>,
    job_timeout: Duration,
}

impl JobRunner {
    async fn execute_job(self, job: Job) {
        let start = Instant::now();
        let job_id = job.id;
        let command = job.command_key();

        info!(
            subsystem = "jobs",
            component = "worker",
            op = "execute",
            %job_id,
            %command,
            "Processing job"
        );
        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job_id,
            command: command.clone(),
        });

        let (result, attempts) = match self.registry.get_by_key(&command).await {
            Some(handler) => {
                let tracker = AttemptTracker {
                    jobs: Some(self.jobs.as_ref()),
                    events: Some(&self.event_tx),
                };
                let execution = tokio::time::timeout(
                    self.job_timeout,
                    run_with_retry(handler.as_ref(), job_id, job.payload, true, tracker),
                )
                .await;
                match execution {
                    Ok(execution) => (execution.result, execution.attempts),
                    Err(_) => {
                        warn!(
                            %job_id,
                            %command,
                            "Job exceeded timeout of {}s",
                            self.job_timeout.as_secs()
                        );
                        (
                            JobResult::failed(format!(
                                "Job exceeded timeout of {}s",
                                self.job_timeout.as_secs()
                            )),
                            job.attempts.max(1) as u32,
                        )
                    }
                }
            }
            None => {
                warn!(%command, "No handler registered for command");
                (
                    JobResult::failed(format!("No handler for command: {}", command)),
                    1,
                )
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            JobResult::Success(result_data) => {
                if let Err(e) = self.jobs.complete(job_id, result_data).await {
                    error!(error = %e, %job_id, "Failed to mark job as completed");
                } else {
                    info!(%job_id, %command, attempts, duration_ms, "Job completed successfully");
                    let _ = self.event_tx.send(WorkerEvent::JobCompleted {
                        job_id,
                        command,
                        attempts,
                    });
                }
            }
            JobResult::Failed { error, result } => {
                self.record_failure(job_id, command, error, result, duration_ms)
                    .await;
            }
            JobResult::Retry(error) => {
                self.record_failure(job_id, command, error, None, duration_ms)
                    .await;
            }
        }
    }

    async fn record_failure(
        &self,
        job_id: Uuid,
        command: String,
        error: String,
        result: Option<serde_json::Value>,
        duration_ms: u64,
    ) {
        if let Err(e) = self.jobs.fail(job_id, &error, result).await {
            error!(error = %e, %job_id, "Failed to mark job as failed");
        } else {
            warn!(%job_id, %command, %error, duration_ms, "Job failed");
            let _ = self.event_tx.send(WorkerEvent::JobFailed {
                job_id,
                command,
                error,
            });
        }
    }
}

/// Builder for creating a job worker with handlers.
pub struct WorkerBuilder {
    jobs: Arc<dyn JobRepository>,
    registry: CommandRegistry,
    config: WorkerConfig,
    handlers: Vec<Arc<dyn CommandHandler>>,
}

impl WorkerBuilder {
    pub fn new(jobs: Arc<dyn JobRepository>) -> Self {
        Self {
            jobs,
            registry: CommandRegistry::new(),
            config: WorkerConfig::default(),
            handlers: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a registry with a [`CommandService`](crate::queue::CommandService).
    pub fn with_registry(mut self, registry: CommandRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn CommandHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub async fn build(self) -> JobWorker {
        let worker = JobWorker::new(self.jobs, self.registry, self.config);
        for handler in self.handlers {
            worker.register_handler(handler).await;
        }
        worker
    }
}
