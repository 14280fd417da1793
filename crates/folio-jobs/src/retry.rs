//! Per-command retry policy and the attempt loop.
//!
//! A command declares its policy once; every execution path (worker or
//! synchronous fallback) runs attempts through [`run_with_retry`]. Only
//! [`JobResult::Retry`] is retried. Attempts stay inside one execution, so a
//! persisted job remains `running` until the loop settles and its terminal
//! state is written exactly once.

use std::time::Duration;

use rand::Rng;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use folio_core::defaults::{RETRY_WAIT_MAX_MS, RETRY_WAIT_MIN_MS};
use folio_core::JobRepository;

use crate::handler::{CommandContext, CommandHandler, JobResult};
use crate::worker::WorkerEvent;

/// Delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// `min * 2^(attempt-1)` plus up to `min` of random jitter, capped at `max`.
    ExponentialJitter { min: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Values below 1 behave as 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
        }
    }

    pub fn exponential_jitter(max_attempts: u32, min: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::ExponentialJitter { min, max },
        }
    }

    /// `max_attempts` attempts with the default 1 s to 30 s backoff window.
    pub fn with_default_backoff(max_attempts: u32) -> Self {
        Self::exponential_jitter(
            max_attempts,
            Duration::from_millis(RETRY_WAIT_MIN_MS),
            Duration::from_millis(RETRY_WAIT_MAX_MS),
        )
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Wait before the attempt following `failed_attempt` (1-based).
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        match self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::ExponentialJitter { min, max } => {
                let exponent = failed_attempt.saturating_sub(1).min(31);
                let base = min.saturating_mul(1u32 << exponent).min(max);
                let jitter_ms = min.as_millis() as u64;
                let jitter = if jitter_ms == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
                };
                (base + jitter).min(max)
            }
        }
    }
}

/// Where attempt progress is reported while the loop runs.
#[derive(Clone, Copy, Default)]
pub struct AttemptTracker<'a> {
    /// Persisted job row to advance on each retry.
    pub jobs: Option<&'a dyn JobRepository>,
    pub events: Option<&'a broadcast::Sender<WorkerEvent>>,
}

/// Outcome of a settled attempt loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    /// Never [`JobResult::Retry`]: exhausted retries become `Failed`.
    pub result: JobResult,
    pub attempts: u32,
}

/// Run `handler` until it succeeds, fails terminally, or exhausts its policy.
pub async fn run_with_retry(
    handler: &dyn CommandHandler,
    job_id: Uuid,
    payload: JsonValue,
    durable: bool,
    tracker: AttemptTracker<'_>,
) -> Execution {
    let policy = handler.retry_policy();
    let max_attempts = policy.attempts();
    let command = handler.key();
    let mut attempt = 1;

    loop {
        let ctx = CommandContext {
            job_id,
            payload: payload.clone(),
            attempt,
            durable,
        };

        match handler.execute(ctx).await {
            JobResult::Retry(error) if attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    subsystem = "jobs",
                    component = "retry",
                    %job_id,
                    %command,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "Attempt failed with a transient error, retrying"
                );
                if let Some(events) = tracker.events {
                    let _ = events.send(WorkerEvent::JobAttemptFailed {
                        job_id,
                        command: command.clone(),
                        attempt,
                        error: error.clone(),
                    });
                }

                tokio::time::sleep(delay).await;
                attempt += 1;

                if let Some(jobs) = tracker.jobs {
                    if let Err(e) = jobs.begin_retry(job_id, attempt as i32, &error).await {
                        warn!(%job_id, error = %e, "Failed to record retry attempt");
                    }
                }
            }
            JobResult::Retry(error) => {
                info!(
                    subsystem = "jobs",
                    component = "retry",
                    %job_id,
                    %command,
                    attempts = attempt,
                    "Retry attempts exhausted"
                );
                return Execution {
                    result: JobResult::failed(format!(
                        "{} (gave up after {} attempts)",
                        error, attempt
                    )),
                    attempts: attempt,
                };
            }
            result => {
                return Execution {
                    result,
                    attempts: attempt,
                }
            }
        }
    }
}
