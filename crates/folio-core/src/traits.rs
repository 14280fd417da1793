//! Core trait definitions for folio.
//!
//! Repository traits describe the record store; backend traits describe the
//! external AI and extraction services. Postgres and in-memory stores both
//! implement the repository traits, so workflows only ever see these seams.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// REPOSITORIES
// =============================================================================

/// Repository for source records and their notebook links.
#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Insert a placeholder source.
    async fn insert(&self, source: NewSource) -> Result<Source>;

    /// Fetch a source by id.
    async fn get(&self, id: Uuid) -> Result<Option<Source>>;

    /// Persist title, topics, full text and asset of an existing source.
    async fn update(&self, source: &Source) -> Result<()>;

    /// Point the source at its most recent processing job.
    async fn set_command(&self, id: Uuid, job_id: Option<Uuid>) -> Result<()>;

    /// Delete a source together with its insights and embeddings.
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Link a source to a notebook. Linking twice is a no-op.
    async fn link_notebook(&self, source_id: Uuid, notebook_id: Uuid) -> Result<()>;

    /// Notebook ids a source is linked to.
    async fn notebooks_for(&self, source_id: Uuid) -> Result<Vec<Uuid>>;

    /// Sources linked to a notebook, newest first.
    async fn list_for_notebook(&self, notebook_id: Uuid) -> Result<Vec<Source>>;
}

/// Repository for notebooks.
#[async_trait]
pub trait NotebookRepository: Send + Sync {
    async fn create(&self, owner: Uuid, name: &str, description: Option<&str>) -> Result<Notebook>;

    async fn get(&self, id: Uuid) -> Result<Option<Notebook>>;
}

/// Repository for transformation definitions.
#[async_trait]
pub trait TransformationRepository: Send + Sync {
    async fn create(&self, transformation: NewTransformation) -> Result<Transformation>;

    async fn get(&self, id: Uuid) -> Result<Option<Transformation>>;

    /// Transformations flagged `apply_default` that `owner` may use.
    async fn list_defaults(&self, owner: Uuid) -> Result<Vec<Transformation>>;
}

/// Repository for insights (append-only).
#[async_trait]
pub trait InsightRepository: Send + Sync {
    async fn add(
        &self,
        source_id: Uuid,
        insight_type: &str,
        content: &str,
        owner: Uuid,
    ) -> Result<SourceInsight>;

    async fn list_for_source(&self, source_id: Uuid) -> Result<Vec<SourceInsight>>;
}

/// Repository for source chunk embeddings.
#[async_trait]
pub trait EmbeddingRepository: Send + Sync {
    /// Replace every embedding of a source with `chunks`, indexed 0..N-1.
    ///
    /// The old set is removed and the new set written atomically; readers never
    /// observe a mix of both.
    async fn replace_for_source(
        &self,
        source_id: Uuid,
        owner: Uuid,
        chunks: &[EmbeddedChunk],
    ) -> Result<usize>;

    /// Embeddings of a source ordered by chunk index.
    async fn list_for_source(&self, source_id: Uuid) -> Result<Vec<SourceEmbedding>>;

    async fn delete_for_source(&self, source_id: Uuid) -> Result<()>;
}

/// Repository for the durable command queue.
///
/// Status updates are guarded: each transition only applies from the expected
/// prior state, so a terminal job can never move back to queued or running.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Enqueue a command and return its id.
    async fn queue(
        &self,
        app: &str,
        command: &str,
        payload: JsonValue,
        max_attempts: i32,
    ) -> Result<Uuid>;

    /// Fetch a job by id.
    async fn get(&self, id: Uuid) -> Result<Option<Job>>;

    /// Atomically claim the oldest queued job for one of `commands`
    /// (`app/command` keys), moving it to running.
    async fn claim_next(&self, commands: &[String]) -> Result<Option<Job>>;

    /// Move a running job on to attempt number `attempt` after a transient
    /// failure. The job stays running; only the attempt counter and last error
    /// change.
    async fn begin_retry(&self, id: Uuid, attempt: i32, last_error: &str) -> Result<()>;

    /// Mark a running job completed.
    async fn complete(&self, id: Uuid, result: Option<JsonValue>) -> Result<()>;

    /// Mark a running job failed.
    async fn fail(&self, id: Uuid, error: &str, result: Option<JsonValue>) -> Result<()>;

    /// Mark a job that never started failed, so no worker claims it.
    async fn cancel(&self, id: Uuid, reason: &str) -> Result<()>;

    /// Return running jobs started before `started_before` to the queue.
    ///
    /// Recovers jobs whose worker died mid-execution. Returns how many moved.
    async fn requeue_stale(&self, started_before: DateTime<Utc>) -> Result<u64>;

    /// Number of queued jobs.
    async fn pending_count(&self) -> Result<i64>;

    /// Handle notified whenever a job is queued, for event-driven workers.
    fn job_notify(&self) -> Option<Arc<Notify>> {
        None
    }
}

/// Durable conversation state keyed by thread id.
#[async_trait]
pub trait ThreadStateRepository: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<ThreadState>>;

    async fn save(&self, thread_id: &str, state: &ThreadState) -> Result<()>;
}

/// Every repository behind one cloneable handle.
#[derive(Clone)]
pub struct Repositories {
    pub sources: Arc<dyn SourceRepository>,
    pub notebooks: Arc<dyn NotebookRepository>,
    pub transformations: Arc<dyn TransformationRepository>,
    pub insights: Arc<dyn InsightRepository>,
    pub embeddings: Arc<dyn EmbeddingRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub threads: Arc<dyn ThreadStateRepository>,
}

// =============================================================================
// INFERENCE BACKENDS
// =============================================================================

/// Backend for generating embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for a batch of texts, in input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;

    /// Get the model name.
    fn model_name(&self) -> &str;
}

/// Backend for text generation.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate a response with a system prompt.
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String>;

    /// Answer a full conversation.
    async fn chat(&self, messages: &[PromptMessage]) -> Result<ChatReply>;

    /// Generate a response to a single prompt.
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_with_system("", prompt).await
    }

    /// Get the model name.
    fn model_name(&self) -> &str;
}

/// Backend that renders images from text prompts.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Provider name used for attribution and lookup.
    fn provider_name(&self) -> &str;

    /// Render `prompt` with `model_name`.
    ///
    /// Non-success responses surface as `Error::Provider` with the raw status.
    async fn generate_image(&self, prompt: &str, model_name: &str) -> Result<GeneratedImage>;
}

// =============================================================================
// EXTRACTION
// =============================================================================

/// How much of the ingestion pipeline an extractor supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    /// Full pipeline: batch embedding and transformations.
    Full,
    /// Text only: transformations skipped, chunks embedded one at a time.
    Reduced,
}

/// Normalizes a content reference into text plus metadata.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Strategy name for logs.
    fn name(&self) -> &str;

    /// Pipeline mode this strategy supports.
    fn mode(&self) -> ExtractionMode;

    /// Extract text and metadata for the described content.
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractedContent>;

    /// Whether the strategy can currently serve requests.
    async fn health_check(&self) -> Result<bool>;
}
