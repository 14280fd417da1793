//! The `open_notebook/process_source` command.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tempfile::NamedTempFile;
use tracing::{error, info, warn};
use uuid::Uuid;

use folio_core::defaults::{
    COMMAND_APP, PROCESS_SOURCE_COMMAND, PROCESS_SOURCE_MAX_ATTEMPTS, SOURCE_PROCESS_TIMEOUT_SECS,
};
use folio_core::{ContentDescriptor, Error, Result, Transformation};
use folio_db::file_storage::ObjectStore;

use crate::handler::{CommandContext, CommandHandler, JobResult};
use crate::ingest::{IngestionOutcome, IngestionRequest, SourceIngestion, ORIGINAL_PATH_KEY};
use crate::retry::RetryPolicy;

/// Payload of a `process_source` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceProcessingInput {
    pub source_id: Uuid,
    pub content: ContentDescriptor,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, JsonValue>,
    #[serde(default)]
    pub notebook_ids: Vec<Uuid>,
    #[serde(default)]
    pub transformations: Vec<Uuid>,
    #[serde(default)]
    pub embed: bool,
    #[serde(default)]
    pub owner: Option<Uuid>,
}

/// Result payload of a `process_source` job, for success and failure alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProcessingOutput {
    pub success: bool,
    pub source_id: Uuid,
    #[serde(default)]
    pub embedded_chunks: usize,
    #[serde(default)]
    pub insights_created: usize,
    /// Seconds.
    pub processing_time: f64,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl SourceProcessingOutput {
    fn completed(outcome: &IngestionOutcome, elapsed: Duration) -> Self {
        Self {
            success: true,
            source_id: outcome.source.id,
            embedded_chunks: outcome.embedded_chunks,
            insights_created: outcome.insights_created,
            processing_time: elapsed.as_secs_f64(),
            error_message: None,
        }
    }

    fn failed(source_id: Uuid, error: &Error, elapsed: Duration) -> Self {
        Self {
            success: false,
            source_id,
            embedded_chunks: 0,
            insights_created: 0,
            processing_time: elapsed.as_secs_f64(),
            error_message: Some(error.to_string()),
        }
    }
}

/// Handler running the ingestion workflow for one source.
pub struct ProcessSourceHandler {
    ingestion: SourceIngestion,
    timeout: Duration,
    retry_policy: RetryPolicy,
}

impl ProcessSourceHandler {
    pub fn new(ingestion: SourceIngestion) -> Self {
        Self {
            ingestion,
            timeout: Duration::from_secs(SOURCE_PROCESS_TIMEOUT_SECS),
            retry_policy: RetryPolicy::with_default_backoff(PROCESS_SOURCE_MAX_ATTEMPTS),
        }
    }

    /// Reads `SOURCE_PROCESS_TIMEOUT` (seconds).
    pub fn from_env(ingestion: SourceIngestion) -> Self {
        let handler = Self::new(ingestion);
        match std::env::var("SOURCE_PROCESS_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            Some(secs) => handler.with_timeout(Duration::from_secs(secs)),
            None => handler,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Download `gs://` uploads to a temp file; check local uploads exist.
    ///
    /// The returned temp file is removed when dropped.
    async fn materialize(&self, input: &mut SourceProcessingInput) -> Result<Option<NamedTempFile>> {
        let ContentDescriptor::File { file_path } = &mut input.content else {
            return Ok(None);
        };

        input
            .metadata
            .entry(ORIGINAL_PATH_KEY)
            .or_insert_with(|| JsonValue::String(file_path.clone()));

        if ObjectStore::is_remote(file_path) {
            let temp = NamedTempFile::new()?;
            let bytes = self
                .ingestion
                .storage()
                .download_to(file_path, temp.path())
                .await?;
            info!(remote = %file_path, bytes, "Materialized cloud upload");
            *file_path = temp.path().to_string_lossy().into_owned();
            return Ok(Some(temp));
        }

        if !tokio::fs::try_exists(file_path.as_str()).await.unwrap_or(false) {
            return Err(Error::NotFound(format!("File not found: {}", file_path)));
        }
        Ok(None)
    }

    async fn load_transformations(
        &self,
        ids: &[Uuid],
        owner: Option<Uuid>,
    ) -> Result<Vec<Transformation>> {
        let mut loaded = Vec::with_capacity(ids.len());
        for &id in ids {
            let transformation = self
                .ingestion
                .repositories()
                .transformations
                .get(id)
                .await?
                .ok_or(Error::TransformationNotFound(id))?;
            if let Some(owner) = owner {
                if !transformation.is_accessible_to(owner) {
                    return Err(Error::Forbidden(format!(
                        "Transformation '{}' not accessible for this user",
                        id
                    )));
                }
            }
            loaded.push(transformation);
        }
        Ok(loaded)
    }

    async fn process(
        &self,
        ctx: &CommandContext,
        mut input: SourceProcessingInput,
    ) -> Result<IngestionOutcome> {
        // Held until the end of the run so the download outlives the workflow.
        let _temp = self.materialize(&mut input).await?;

        let transformations = self
            .load_transformations(&input.transformations, input.owner)
            .await?;
        info!(count = transformations.len(), "Loaded transformations");

        let sources = &self.ingestion.repositories().sources;
        if sources.get(input.source_id).await?.is_none() {
            return Err(Error::SourceNotFound(input.source_id));
        }
        if ctx.durable {
            sources.set_command(input.source_id, Some(ctx.job_id)).await?;
        }

        let request = IngestionRequest {
            source_id: input.source_id,
            content: input.content,
            metadata: input.metadata,
            transformations,
            embed: input.embed,
        };
        tokio::time::timeout(self.timeout, self.ingestion.run(request))
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "Source processing exceeded {} seconds",
                    self.timeout.as_secs()
                ))
            })?
    }
}

#[async_trait]
impl CommandHandler for ProcessSourceHandler {
    fn app(&self) -> &str {
        COMMAND_APP
    }

    fn name(&self) -> &str {
        PROCESS_SOURCE_COMMAND
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    async fn execute(&self, ctx: CommandContext) -> JobResult {
        let start = Instant::now();
        let input: SourceProcessingInput = match serde_json::from_value(ctx.payload.clone()) {
            Ok(input) => input,
            Err(e) => return JobResult::failed(format!("Invalid process_source payload: {}", e)),
        };
        let source_id = input.source_id;
        info!(
            subsystem = "ingest",
            component = "process_source",
            job_id = %ctx.job_id,
            %source_id,
            attempt = ctx.attempt,
            embed = input.embed,
            transformations = input.transformations.len(),
            notebooks = input.notebook_ids.len(),
            kind = input.content.kind(),
            "Starting source processing"
        );

        match self.process(&ctx, input).await {
            Ok(outcome) => {
                let output = SourceProcessingOutput::completed(&outcome, start.elapsed());
                info!(
                    %source_id,
                    chunk_count = output.embedded_chunks,
                    insight_count = output.insights_created,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Source processed"
                );
                JobResult::Success(serde_json::to_value(&output).ok())
            }
            Err(e) if e.is_retryable() => {
                warn!(%source_id, error = %e, "Transient failure, will retry");
                JobResult::Retry(e.to_string())
            }
            Err(e) => {
                error!(%source_id, error = %e, "Source processing failed");
                let output = SourceProcessingOutput::failed(source_id, &e, start.elapsed());
                JobResult::Failed {
                    error: e.to_string(),
                    result: serde_json::to_value(&output).ok(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_input_defaults() {
        let input: SourceProcessingInput = serde_json::from_value(json!({
            "source_id": Uuid::nil(),
            "content": {"type": "text", "content": "hi"}
        }))
        .unwrap();
        assert!(input.transformations.is_empty());
        assert!(input.metadata.is_empty());
        assert!(!input.embed);
        assert!(input.owner.is_none());
    }

    #[test]
    fn test_output_shape() {
        let err = Error::SourceNotFound(Uuid::nil());
        let output = SourceProcessingOutput::failed(Uuid::nil(), &err, Duration::from_millis(1500));
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["embedded_chunks"], 0);
        assert_eq!(value["processing_time"], 1.5);
        assert!(value["error_message"]
            .as_str()
            .unwrap()
            .starts_with("Source not found"));
    }
}
