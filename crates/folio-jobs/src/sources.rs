//! Source submission, reprocessing and status listing.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use folio_core::defaults::{COMMAND_APP, PROCESS_SOURCE_COMMAND, SOURCE_PLACEHOLDER_TITLE};
use folio_core::{Asset, ContentDescriptor, Error, NewSource, Repositories, Result, Source};

use crate::handler::JobResult;
use crate::ingest::DELETE_SOURCE_FLAG;
use crate::process_source::SourceProcessingInput;
use crate::queue::{CommandService, Submission};
use crate::status::{fetch_statuses, ProcessingStatus};

/// Request to add a source to one or more notebooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSourceRequest {
    pub owner: Uuid,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub content: ContentDescriptor,
    #[serde(default)]
    pub notebook_ids: Vec<Uuid>,
    /// Transformations to apply; empty means the owner's defaults.
    #[serde(default)]
    pub transformations: Vec<Uuid>,
    #[serde(default)]
    pub embed: bool,
    /// Remove the stored upload once its text is captured.
    #[serde(default)]
    pub delete_source: bool,
}

/// A created source and how its processing was dispatched.
#[derive(Debug, Clone)]
pub struct SourceSubmission {
    pub source: Source,
    /// Queued job, when processing went through the queue.
    pub job_id: Option<Uuid>,
    /// Inline result, when processing ran synchronously.
    pub result: Option<JobResult>,
}

/// A source with the status of its most recent processing job.
#[derive(Debug, Clone)]
pub struct SourceWithStatus {
    pub source: Source,
    /// `None` when the source was never queued.
    pub status: Option<ProcessingStatus>,
}

#[derive(Clone)]
pub struct SourceService {
    repos: Repositories,
    commands: CommandService,
}

impl SourceService {
    pub fn new(repos: Repositories, commands: CommandService) -> Self {
        Self { repos, commands }
    }

    /// Create a placeholder source, link it, and dispatch processing.
    #[instrument(
        skip(self, request),
        fields(subsystem = "sources", component = "service", op = "create", kind = request.content.kind())
    )]
    pub async fn create_source(&self, request: CreateSourceRequest) -> Result<SourceSubmission> {
        validate_content(&request.content)?;
        let transformations = self
            .resolve_transformations(request.owner, &request.transformations)
            .await?;

        let title = request
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| SOURCE_PLACEHOLDER_TITLE.to_string());
        let source = self
            .repos
            .sources
            .insert(NewSource {
                owner: request.owner,
                title: Some(title),
                topics: request.topics,
                asset: asset_for(&request.content),
            })
            .await?;

        for &notebook_id in &request.notebook_ids {
            self.repos.sources.link_notebook(source.id, notebook_id).await?;
        }

        let mut metadata = Map::new();
        if request.delete_source {
            metadata.insert(DELETE_SOURCE_FLAG.to_string(), JsonValue::Bool(true));
        }
        let input = SourceProcessingInput {
            source_id: source.id,
            content: request.content,
            metadata,
            notebook_ids: request.notebook_ids,
            transformations,
            embed: request.embed,
            owner: Some(request.owner),
        };

        let submission = self
            .commands
            .submit_verified(COMMAND_APP, PROCESS_SOURCE_COMMAND, serde_json::to_value(&input)?)
            .await?;
        self.finish_submission(source.id, submission).await
    }

    /// Queue a fresh processing job for an existing source.
    ///
    /// Refused while the current job is queued or running. Reprocessing always
    /// embeds and applies the owner's default transformations.
    #[instrument(skip(self), fields(subsystem = "sources", component = "service", op = "retry"))]
    pub async fn retry_processing(&self, source_id: Uuid, owner: Uuid) -> Result<Uuid> {
        let source = self
            .repos
            .sources
            .get(source_id)
            .await?
            .ok_or(Error::SourceNotFound(source_id))?;
        if source.owner != owner {
            return Err(Error::Forbidden(format!("Source {} belongs to another user", source_id)));
        }

        if let Some(job_id) = source.command {
            match self.commands.get_status(job_id).await {
                Ok(report) if report.status.is_in_flight() => {
                    return Err(Error::InvalidInput(format!(
                        "Source is already processing (job {} is {}); cannot retry while processing is active",
                        job_id, report.status
                    )));
                }
                Ok(_) => {}
                Err(e) => warn!(%job_id, error = %e, "Could not check current job, retrying anyway"),
            }
        }

        let notebook_ids = self.repos.sources.notebooks_for(source_id).await?;
        if notebook_ids.is_empty() {
            return Err(Error::InvalidInput(
                "Source is not associated with any notebooks".to_string(),
            ));
        }

        let content = content_for_retry(&source)?;
        let transformations = self.resolve_transformations(owner, &[]).await?;
        let input = SourceProcessingInput {
            source_id,
            content,
            metadata: Map::new(),
            notebook_ids,
            transformations,
            embed: true,
            owner: Some(owner),
        };

        let job_id = self
            .commands
            .submit(COMMAND_APP, PROCESS_SOURCE_COMMAND, serde_json::to_value(&input)?)
            .await?;
        self.repos.sources.set_command(source_id, Some(job_id)).await?;
        info!(%source_id, %job_id, "Queued source reprocessing");
        Ok(job_id)
    }

    /// Sources of a notebook with their processing status.
    pub async fn list_with_status(&self, notebook_id: Uuid) -> Result<Vec<SourceWithStatus>> {
        let sources = self.repos.sources.list_for_notebook(notebook_id).await?;
        let job_ids: Vec<Uuid> = sources.iter().filter_map(|s| s.command).collect();
        let statuses: HashMap<Uuid, ProcessingStatus> = fetch_statuses(&self.commands, &job_ids)
            .await
            .into_iter()
            .collect();

        Ok(sources
            .into_iter()
            .map(|source| {
                let status = source.command.and_then(|id| statuses.get(&id).copied());
                SourceWithStatus { source, status }
            })
            .collect())
    }

    /// Requested transformations deduplicated by id and by case-insensitive
    /// name, or the owner's defaults when none were requested.
    async fn resolve_transformations(&self, owner: Uuid, requested: &[Uuid]) -> Result<Vec<Uuid>> {
        let candidates = if requested.is_empty() {
            self.repos.transformations.list_defaults(owner).await?
        } else {
            let mut loaded = Vec::with_capacity(requested.len());
            for &id in requested {
                let transformation = self
                    .repos
                    .transformations
                    .get(id)
                    .await?
                    .ok_or(Error::TransformationNotFound(id))?;
                if !transformation.is_accessible_to(owner) {
                    return Err(Error::Forbidden(format!(
                        "Transformation '{}' not accessible for this user",
                        id
                    )));
                }
                loaded.push(transformation);
            }
            loaded
        };

        let mut seen_ids = HashSet::new();
        let mut seen_names = HashSet::new();
        Ok(candidates
            .into_iter()
            .filter(|t| seen_ids.insert(t.id) && seen_names.insert(t.name.to_lowercase()))
            .map(|t| t.id)
            .collect())
    }

    async fn finish_submission(
        &self,
        source_id: Uuid,
        submission: Submission,
    ) -> Result<SourceSubmission> {
        let (job_id, result) = match submission {
            Submission::Queued(job_id) => {
                self.repos.sources.set_command(source_id, Some(job_id)).await?;
                info!(%source_id, %job_id, "Source processing queued");
                (Some(job_id), None)
            }
            Submission::Completed(result) => {
                info!(%source_id, success = result.is_success(), "Source processed inline");
                (None, Some(result))
            }
        };

        let source = self
            .repos
            .sources
            .get(source_id)
            .await?
            .ok_or(Error::SourceNotFound(source_id))?;
        Ok(SourceSubmission {
            source,
            job_id,
            result,
        })
    }
}

fn validate_content(content: &ContentDescriptor) -> Result<()> {
    let empty = match content {
        ContentDescriptor::File { file_path } => file_path.trim().is_empty(),
        ContentDescriptor::Url { url } => url.trim().is_empty(),
        ContentDescriptor::Text { content } => content.trim().is_empty(),
    };
    if empty {
        return Err(Error::InvalidInput(format!(
            "{} source has no content",
            content.kind()
        )));
    }
    Ok(())
}

fn asset_for(content: &ContentDescriptor) -> Option<Asset> {
    match content {
        ContentDescriptor::File { file_path } => Some(Asset {
            url: None,
            file_path: Some(file_path.clone()),
        }),
        ContentDescriptor::Url { url } => Some(Asset {
            url: Some(url.clone()),
            file_path: None,
        }),
        ContentDescriptor::Text { .. } => None,
    }
}

/// Content descriptor that reproduces a source's original input.
fn content_for_retry(source: &Source) -> Result<ContentDescriptor> {
    if let Some(asset) = &source.asset {
        if let Some(file_path) = &asset.file_path {
            return Ok(ContentDescriptor::File {
                file_path: file_path.clone(),
            });
        }
        if let Some(url) = &asset.url {
            return Ok(ContentDescriptor::Url { url: url.clone() });
        }
    }
    match source.full_text.as_deref().filter(|t| !t.is_empty()) {
        Some(text) => Ok(ContentDescriptor::Text {
            content: text.to_string(),
        }),
        None => Err(Error::InvalidInput(
            "Cannot determine source content for retry".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn source(asset: Option<Asset>, text: Option<&str>) -> Source {
        Source {
            id: Uuid::new_v4(),
            title: None,
            topics: vec![],
            full_text: text.map(String::from),
            asset,
            owner: Uuid::new_v4(),
            command: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_content_for_retry_prefers_file() {
        let s = source(
            Some(Asset {
                url: Some("https://x".into()),
                file_path: Some("/up/a.pdf".into()),
            }),
            Some("text"),
        );
        assert_eq!(
            content_for_retry(&s).unwrap(),
            ContentDescriptor::File {
                file_path: "/up/a.pdf".into()
            }
        );
    }

    #[test]
    fn test_content_for_retry_text_and_empty() {
        let s = source(None, Some("pasted"));
        assert_eq!(
            content_for_retry(&s).unwrap(),
            ContentDescriptor::Text {
                content: "pasted".into()
            }
        );
        assert!(matches!(
            content_for_retry(&source(None, None)),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_validate_content() {
        assert!(validate_content(&ContentDescriptor::Text { content: "  ".into() }).is_err());
        assert!(validate_content(&ContentDescriptor::Url { url: "https://a".into() }).is_ok());
    }

    #[test]
    fn test_asset_for() {
        assert!(asset_for(&ContentDescriptor::Text { content: "x".into() }).is_none());
        let asset = asset_for(&ContentDescriptor::Url { url: "https://a".into() }).unwrap();
        assert_eq!(asset.url.as_deref(), Some("https://a"));
    }
}
