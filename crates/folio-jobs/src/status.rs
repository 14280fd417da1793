//! Bounded batch lookup of job statuses.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use folio_core::defaults::STATUS_LOOKUP_CONCURRENCY;
use folio_core::{JobStatus, JobStatusReport};

use crate::queue::CommandService;

/// Status of one job in a batch; lookups that failed are `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Unknown,
}

impl From<JobStatus> for ProcessingStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Queued => ProcessingStatus::Queued,
            JobStatus::Running => ProcessingStatus::Running,
            JobStatus::Completed => ProcessingStatus::Completed,
            JobStatus::Failed => ProcessingStatus::Failed,
        }
    }
}

impl ProcessingStatus {
    pub fn from_report(report: &JobStatusReport) -> Self {
        report.status.into()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Queued => "queued",
            ProcessingStatus::Running => "running",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Unknown => "unknown",
        }
    }
}

/// Look up many jobs with at most `STATUS_LOOKUP_CONCURRENCY` in flight.
///
/// Results come back in input order. A failed lookup degrades only its own
/// entry to [`ProcessingStatus::Unknown`].
pub async fn fetch_statuses(
    commands: &CommandService,
    job_ids: &[Uuid],
) -> Vec<(Uuid, ProcessingStatus)> {
    let indexed = job_ids.iter().copied().enumerate();
    let lookups = stream::iter(indexed).map(|(index, job_id)| async move {
        let status = match commands.get_status(job_id).await {
            Ok(report) => ProcessingStatus::from_report(&report),
            Err(e) => {
                warn!(subsystem = "jobs", %job_id, error = %e, "Status lookup failed");
                ProcessingStatus::Unknown
            }
        };
        (index, job_id, status)
    });
    let mut results: Vec<(usize, Uuid, ProcessingStatus)> = lookups
        .buffer_unordered(STATUS_LOOKUP_CONCURRENCY)
        .collect()
        .await;

    results.sort_by_key(|(index, _, _)| *index);
    results
        .into_iter()
        .map(|(_, job_id, status)| (job_id, status))
        .collect()
}
