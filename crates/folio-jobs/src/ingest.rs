//! Source ingestion workflow.
//!
//! One run drives a single placeholder source through
//! `Extracting -> Saving -> Transforming -> Done`, skipping `Transforming` when
//! no transformations were requested or the reduced pipeline is in use.
//!
//! Errors are returned as-is; the command handler decides which of them are
//! retried and turns the rest into a structured failure.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use folio_core::{
    Asset, ContentDescriptor, ContentExtractor, Error, ExtractedContent, ExtractionMode,
    ExtractionRequest, Repositories, Result, Source, Transformation,
};
use folio_db::file_storage::StorageBackend;

use crate::embedding::EmbeddingPipeline;
use crate::extraction::ExtractorSelector;
use crate::transformation::TransformationRunner;

/// Metadata flag asking for the stored upload to be removed after ingestion.
pub const DELETE_SOURCE_FLAG: &str = "delete_source";

/// Metadata key holding the upload path as submitted, before any download.
pub const ORIGINAL_PATH_KEY: &str = "_orig_file_path";

/// Caller flags that extractors are not trusted to round-trip.
pub fn preserved_flags(metadata: &Map<String, JsonValue>) -> Map<String, JsonValue> {
    metadata
        .iter()
        .filter(|(key, _)| key.starts_with('_') || key.as_str() == DELETE_SOURCE_FLAG)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Workflow position, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionState {
    Extracting,
    Saving,
    Transforming,
    Done,
}

impl fmt::Display for IngestionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IngestionState::Extracting => "extracting",
            IngestionState::Saving => "saving",
            IngestionState::Transforming => "transforming",
            IngestionState::Done => "done",
        })
    }
}

/// Engine hints and speech-to-text selection sent with every extraction.
#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    pub url_engine: String,
    pub document_engine: String,
    pub output_format: String,
    pub audio_provider: Option<String>,
    pub audio_model: Option<String>,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            url_engine: "auto".to_string(),
            document_engine: "auto".to_string(),
            output_format: "markdown".to_string(),
            audio_provider: None,
            audio_model: None,
        }
    }
}

impl ExtractionOptions {
    /// Reads `STT_PROVIDER` and `STT_MODEL`. Missing values only warn.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let audio_provider = var("STT_PROVIDER");
        let audio_model = var("STT_MODEL");
        if audio_provider.is_none() || audio_model.is_none() {
            warn!(
                subsystem = "ingest",
                "No speech-to-text model configured; audio uses the extractor default"
            );
        }
        Self {
            audio_provider,
            audio_model,
            ..Self::default()
        }
    }

    pub fn request(
        &self,
        content: ContentDescriptor,
        metadata: Map<String, JsonValue>,
    ) -> ExtractionRequest {
        let mut request = ExtractionRequest::new(content);
        request.url_engine = self.url_engine.clone();
        request.document_engine = self.document_engine.clone();
        request.output_format = self.output_format.clone();
        request.audio_provider = self.audio_provider.clone();
        request.audio_model = self.audio_model.clone();
        request.metadata = metadata;
        request
    }
}

/// Input of one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestionRequest {
    pub source_id: Uuid,
    pub content: ContentDescriptor,
    pub metadata: Map<String, JsonValue>,
    pub transformations: Vec<Transformation>,
    pub embed: bool,
}

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct IngestionOutcome {
    pub source: Source,
    pub embedded_chunks: usize,
    pub insights_created: usize,
    pub mode: ExtractionMode,
}

/// The ingestion workflow and its collaborators.
#[derive(Clone)]
pub struct SourceIngestion {
    repos: Repositories,
    extractors: Arc<ExtractorSelector>,
    runner: TransformationRunner,
    storage: Arc<dyn StorageBackend>,
    embedding: Option<EmbeddingPipeline>,
    options: ExtractionOptions,
}

impl SourceIngestion {
    pub fn new(
        repos: Repositories,
        extractors: Arc<ExtractorSelector>,
        runner: TransformationRunner,
        storage: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            repos,
            extractors,
            runner,
            storage,
            embedding: None,
            options: ExtractionOptions::default(),
        }
    }

    pub fn with_embedding(mut self, pipeline: EmbeddingPipeline) -> Self {
        self.embedding = Some(pipeline);
        self
    }

    pub fn with_options(mut self, options: ExtractionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// Run the workflow to completion.
    #[instrument(
        skip(self, request),
        fields(subsystem = "ingest", component = "workflow", source_id = %request.source_id, kind = request.content.kind())
    )]
    pub async fn run(&self, request: IngestionRequest) -> Result<IngestionOutcome> {
        let extractor = self.extractors.select().await;
        let mode = extractor.mode();

        info!(state = %IngestionState::Extracting, extractor = extractor.name(), "Ingestion step");
        let extracted = self.extract(extractor.as_ref(), &request).await?;

        info!(state = %IngestionState::Saving, content_len = extracted.content.len(), "Ingestion step");
        let (source, embedded_chunks) = self.save(&request, &extracted, mode).await?;

        let insights_created = if request.transformations.is_empty() {
            0
        } else if mode == ExtractionMode::Reduced {
            warn!(
                requested = request.transformations.len(),
                "Reduced pipeline, skipping transformations"
            );
            0
        } else {
            info!(
                state = %IngestionState::Transforming,
                count = request.transformations.len(),
                "Ingestion step"
            );
            self.transform_all(&source, &request.transformations).await?
        };

        info!(
            state = %IngestionState::Done,
            embedded_chunks,
            insights_created,
            "Ingestion finished"
        );
        Ok(IngestionOutcome {
            source,
            embedded_chunks,
            insights_created,
            mode,
        })
    }

    /// Extract, carrying caller flags across the extractor call.
    async fn extract(
        &self,
        extractor: &dyn ContentExtractor,
        request: &IngestionRequest,
    ) -> Result<ExtractedContent> {
        let flags = preserved_flags(&request.metadata);
        let extraction = self
            .options
            .request(request.content.clone(), flags.clone());

        let mut extracted = extractor.extract(&extraction).await?;
        extracted.metadata.extend(flags);
        Ok(extracted)
    }

    /// Persist extracted text, embed, and drop the stored upload if asked.
    async fn save(
        &self,
        request: &IngestionRequest,
        extracted: &ExtractedContent,
        mode: ExtractionMode,
    ) -> Result<(Source, usize)> {
        let mut source = self
            .repos
            .sources
            .get(request.source_id)
            .await?
            .ok_or(Error::SourceNotFound(request.source_id))?;

        let original_path = extracted
            .metadata
            .get(ORIGINAL_PATH_KEY)
            .and_then(JsonValue::as_str)
            .map(String::from);

        let asset = Asset {
            url: extracted.url.clone().or_else(|| match &request.content {
                ContentDescriptor::Url { url } => Some(url.clone()),
                _ => None,
            }),
            file_path: original_path.clone().or_else(|| extracted.file_path.clone()),
        };
        source.asset = (!asset.is_empty()).then_some(asset);
        source.full_text = Some(extracted.content.clone());

        if let Some(title) = extracted
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            if source.has_replaceable_title() {
                source.title = Some(title.to_string());
            } else {
                debug!(extracted_title = title, "Keeping user-supplied title");
            }
        }

        self.repos.sources.update(&source).await?;

        let embedded_chunks = if request.embed {
            self.embed(&source, mode).await?
        } else {
            0
        };

        let delete_requested = extracted
            .metadata
            .get(DELETE_SOURCE_FLAG)
            .and_then(JsonValue::as_bool)
            .unwrap_or(false);
        let stored_path = original_path.or_else(|| source.asset.as_ref()?.file_path.clone());
        if delete_requested {
            if let Some(path) = stored_path {
                match self.storage.delete(&path).await {
                    Ok(()) => {
                        info!(path = %path, "Deleted original upload");
                        source.asset = None;
                        self.repos.sources.update(&source).await?;
                    }
                    Err(e) => warn!(path = %path, error = %e, "Failed to delete source file"),
                }
            }
        }

        Ok((source, embedded_chunks))
    }

    async fn embed(&self, source: &Source, mode: ExtractionMode) -> Result<usize> {
        let Some(pipeline) = &self.embedding else {
            warn!("Embedding requested but no embedding model configured");
            return Ok(0);
        };

        match mode {
            ExtractionMode::Full => pipeline.vectorize_source(source).await,
            ExtractionMode::Reduced => match pipeline.vectorize_source_per_chunk(source).await {
                Ok(count) => Ok(count),
                Err(e) if e.is_retryable() => Err(e),
                Err(e) => {
                    warn!(error = %e, "Reduced-pipeline embedding failed");
                    Ok(0)
                }
            },
        }
    }

    /// Apply every transformation concurrently.
    ///
    /// Permanent failures stay isolated to their transformation. A retryable
    /// one is returned once every sibling has settled, so the job runs again.
    async fn transform_all(
        &self,
        source: &Source,
        transformations: &[Transformation],
    ) -> Result<usize> {
        let results = join_all(transformations.iter().map(|t| self.apply(source, t))).await;

        let mut created = 0;
        let mut retryable = None;
        for (result, transformation) in results.into_iter().zip(transformations) {
            match result {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(e) if e.is_retryable() => {
                    warn!(
                        transformation_id = %transformation.id,
                        error = %e,
                        "Transformation hit a transient error"
                    );
                    retryable.get_or_insert(e);
                }
                Err(e) => warn!(
                    transformation_id = %transformation.id,
                    transformation = %transformation.name,
                    error = %e,
                    "Transformation failed"
                ),
            }
        }

        match retryable {
            Some(e) => Err(e),
            None => Ok(created),
        }
    }

    /// Returns whether an insight was written.
    async fn apply(&self, source: &Source, transformation: &Transformation) -> Result<bool> {
        let Some(text) = source.full_text.as_deref().filter(|t| !t.trim().is_empty()) else {
            debug!(transformation = %transformation.name, "No text, skipping transformation");
            return Ok(false);
        };

        let output = self.runner.run(transformation, text).await?;
        self.repos
            .insights
            .add(source.id, &transformation.title, &output, source.owner)
            .await?;
        Ok(true)
    }
}
