//! Core data models for folio.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::defaults::SOURCE_PLACEHOLDER_TITLE;

pub use pgvector::Vector;

// =============================================================================
// SOURCE TYPES
// =============================================================================

/// Where a source's bytes originally came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl Asset {
    pub fn is_empty(&self) -> bool {
        self.url.is_none() && self.file_path.is_none()
    }
}

/// A knowledge artifact derived from uploaded, linked, or typed content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub title: Option<String>,
    pub topics: Vec<String>,
    pub full_text: Option<String>,
    pub asset: Option<Asset>,
    pub owner: Uuid,
    /// Most recent processing job. A lookup key only; the job may be superseded.
    pub command: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    /// True when an extracted title may replace the current one.
    ///
    /// Only an empty title or the submission placeholder qualifies; a title the
    /// user typed is never overwritten.
    pub fn has_replaceable_title(&self) -> bool {
        match self.title.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(title) => {
                let lowered = title.to_lowercase();
                lowered == SOURCE_PLACEHOLDER_TITLE.to_lowercase() || lowered == "processing…"
            }
        }
    }
}

/// Request to create a placeholder source prior to ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSource {
    pub owner: Uuid,
    pub title: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub asset: Option<Asset>,
}

/// A container of sources scoped to one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notebook {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub owner: Uuid,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named prompt template applied to source text to produce an insight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transformation {
    pub id: Uuid,
    pub name: String,
    pub title: String,
    pub description: Option<String>,
    pub prompt: String,
    pub apply_default: bool,
    /// `None` means shared with every user.
    pub owner: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Transformation {
    /// Whether `user` may apply this transformation.
    pub fn is_accessible_to(&self, user: Uuid) -> bool {
        self.owner.map(|owner| owner == user).unwrap_or(true)
    }
}

/// Request to create a transformation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransformation {
    pub name: String,
    pub title: String,
    pub description: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub apply_default: bool,
    pub owner: Option<Uuid>,
}

/// Output of applying one transformation to one source. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInsight {
    pub id: Uuid,
    pub source_id: Uuid,
    pub insight_type: String,
    pub content: String,
    pub owner: Uuid,
    pub created_at: DateTime<Utc>,
}

/// One ordered chunk of a source's text with its vector.
#[derive(Debug, Clone)]
pub struct SourceEmbedding {
    pub id: Uuid,
    pub source_id: Uuid,
    pub chunk_index: i32,
    pub content: String,
    pub embedding: Vector,
    pub owner: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A chunk and its vector, before being assigned to a source.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub content: String,
    pub vector: Vector,
}

// =============================================================================
// EXTRACTION TYPES
// =============================================================================

/// Reference to the content an extractor should read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDescriptor {
    File { file_path: String },
    Url { url: String },
    Text { content: String },
}

impl ContentDescriptor {
    pub fn kind(&self) -> &'static str {
        match self {
            ContentDescriptor::File { .. } => "upload",
            ContentDescriptor::Url { .. } => "link",
            ContentDescriptor::Text { .. } => "text",
        }
    }
}

/// Input handed to a content extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRequest {
    #[serde(flatten)]
    pub content: ContentDescriptor,
    pub url_engine: String,
    pub document_engine: String,
    pub output_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_model: Option<String>,
    /// Caller flags that must survive the extraction round trip.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, JsonValue>,
}

impl ExtractionRequest {
    pub fn new(content: ContentDescriptor) -> Self {
        Self {
            content,
            url_engine: "auto".to_string(),
            document_engine: "auto".to_string(),
            output_format: "markdown".to_string(),
            audio_provider: None,
            audio_model: None,
            metadata: Map::new(),
        }
    }
}

/// Normalized extractor output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedContent {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub identified_type: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, JsonValue>,
}

// =============================================================================
// JOB TYPES
// =============================================================================

/// Lifecycle state of a queued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Still owned by a worker or waiting for one.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable unit of background work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub app: String,
    pub command: String,
    pub payload: JsonValue,
    pub status: JobStatus,
    pub result: Option<JsonValue>,
    pub error_message: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Fully qualified command name, `app/command`.
    pub fn command_key(&self) -> String {
        format!("{}/{}", self.app, self.command)
    }

    pub fn status_report(&self) -> JobStatusReport {
        JobStatusReport {
            job_id: self.id,
            status: self.status,
            result: self.result.clone(),
            error_message: self.error_message.clone(),
            execution_metadata: ExecutionMetadata {
                attempts: self.attempts,
                created_at: self.created_at,
                started_at: self.started_at,
                completed_at: self.completed_at,
            },
        }
    }
}

/// Timing and attempt data recorded for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Snapshot returned by status polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub result: Option<JsonValue>,
    pub error_message: Option<String>,
    pub execution_metadata: ExecutionMetadata,
}

// =============================================================================
// INFERENCE TYPES
// =============================================================================

/// Role of a message sent to a chat model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

impl PromptRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptRole::System => "system",
            PromptRole::User => "user",
            PromptRole::Assistant => "assistant",
        }
    }
}

/// A message in a chat-model request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
        }
    }
}

/// A chat model's reply. Providers do not always return an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub id: Option<String>,
    pub content: String,
}

/// Raw image returned by an image provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub mime_type: String,
    /// Base64 payload, no data-URI prefix.
    pub data: String,
}

impl GeneratedImage {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

// =============================================================================
// CONVERSATION TYPES
// =============================================================================

/// Author of a persisted chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    Human,
    Ai,
}

/// One message of a thread's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            id: None,
            role: ChatRole::Human,
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self {
            id: None,
            role: ChatRole::Ai,
            content: content.into(),
        }
    }
}

/// Image model selected for a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageModelRef {
    pub id: String,
    pub name: String,
    pub provider: String,
}

/// Request to generate an image on the next turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRequest {
    #[serde(alias = "image_prompt")]
    pub prompt: String,
    #[serde(default)]
    pub use_rag: bool,
    pub image_model: ImageModelRef,
}

/// Persisted state of a conversation thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadState {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_image_request: Option<ImageRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Uuid>,
}
