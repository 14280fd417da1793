//! Source submission, reprocessing and status listing over the in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use folio_db::MemoryStore;
use folio_jobs::{
    CommandContext, CommandHandler, CommandRegistry, CommandService, ContentDescriptor,
    CreateSourceRequest, Error, JobResult, NewTransformation, ProcessingStatus, QueueConfig,
    Repositories, SourceProcessingInput, SourceService,
};

/// Records that it ran and succeeds.
struct Accepting;

#[async_trait]
impl CommandHandler for Accepting {
    fn app(&self) -> &str {
        "open_notebook"
    }

    fn name(&self) -> &str {
        "process_source"
    }

    async fn execute(&self, ctx: CommandContext) -> JobResult {
        JobResult::Success(Some(json!({"echo": ctx.payload["source_id"]})))
    }
}

struct Fixture {
    store: MemoryStore,
    repos: Repositories,
    service: SourceService,
    owner: Uuid,
    notebook: Uuid,
}

async fn fixture(config: QueueConfig) -> Fixture {
    let store = MemoryStore::new();
    let repos = store.repositories();
    let registry = CommandRegistry::new();
    registry.register(Arc::new(Accepting)).await;
    let commands = CommandService::new(repos.jobs.clone(), registry).with_config(config);

    let owner = Uuid::new_v4();
    let notebook = repos
        .notebooks
        .create(owner, "Research", None)
        .await
        .unwrap()
        .id;

    Fixture {
        service: SourceService::new(repos.clone(), commands),
        store,
        repos,
        owner,
        notebook,
    }
}

fn request(f: &Fixture, content: ContentDescriptor) -> CreateSourceRequest {
    CreateSourceRequest {
        owner: f.owner,
        title: None,
        topics: vec![],
        content,
        notebook_ids: vec![f.notebook],
        transformations: vec![],
        embed: true,
        delete_source: false,
    }
}

fn text(content: &str) -> ContentDescriptor {
    ContentDescriptor::Text {
        content: content.to_string(),
    }
}

async fn transformation(f: &Fixture, name: &str, apply_default: bool) -> Uuid {
    f.repos
        .transformations
        .create(NewTransformation {
            name: name.to_string(),
            title: name.to_uppercase(),
            description: None,
            prompt: format!("Do {}", name),
            apply_default,
            owner: None,
        })
        .await
        .unwrap()
        .id
}

async fn queued_payload(f: &Fixture) -> SourceProcessingInput {
    let job = f.store.jobs().await.pop().expect("a queued job");
    serde_json::from_value(job.payload).unwrap()
}

#[tokio::test]
async fn test_create_source_queues_processing() {
    let f = fixture(QueueConfig::default()).await;

    let submission = f
        .service
        .create_source(request(&f, text("some pasted text")))
        .await
        .unwrap();

    let job_id = submission.job_id.expect("queued");
    assert!(submission.result.is_none());
    assert_eq!(submission.source.title.as_deref(), Some("Processing..."));
    assert_eq!(submission.source.command, Some(job_id));
    assert_eq!(
        f.repos.sources.notebooks_for(submission.source.id).await.unwrap(),
        vec![f.notebook]
    );

    let input = queued_payload(&f).await;
    assert_eq!(input.source_id, submission.source.id);
    assert!(input.embed);
    assert_eq!(input.owner, Some(f.owner));
    assert!(input.metadata.is_empty());
}

#[tokio::test]
async fn test_create_source_keeps_given_title_and_delete_flag() {
    let f = fixture(QueueConfig::default()).await;
    let mut req = request(
        &f,
        ContentDescriptor::File {
            file_path: "/uploads/paper.pdf".to_string(),
        },
    );
    req.title = Some("  My Paper ".to_string());
    req.delete_source = true;

    let submission = f.service.create_source(req).await.unwrap();

    assert_eq!(submission.source.title.as_deref(), Some("My Paper"));
    assert_eq!(
        submission.source.asset.unwrap().file_path.as_deref(),
        Some("/uploads/paper.pdf")
    );
    let input = queued_payload(&f).await;
    assert_eq!(input.metadata["delete_source"], json!(true));
}

#[tokio::test]
async fn test_default_transformations_fill_empty_request() {
    let f = fixture(QueueConfig::default()).await;
    let lower = transformation(&f, "summary", true).await;
    let upper = transformation(&f, "Summary", true).await;
    transformation(&f, "optional", false).await;

    f.service
        .create_source(request(&f, text("body")))
        .await
        .unwrap();

    let chosen = queued_payload(&f).await.transformations;
    assert_eq!(chosen.len(), 1);
    assert!(chosen[0] == lower || chosen[0] == upper);
}

#[tokio::test]
async fn test_requested_transformations_deduplicated() {
    let f = fixture(QueueConfig::default()).await;
    let a = transformation(&f, "outline", false).await;
    let b = transformation(&f, "questions", false).await;
    let mut req = request(&f, text("body"));
    req.transformations = vec![a, b, a];

    f.service.create_source(req).await.unwrap();

    assert_eq!(queued_payload(&f).await.transformations, vec![a, b]);
}

#[tokio::test]
async fn test_unknown_transformation_rejected_before_insert() {
    let f = fixture(QueueConfig::default()).await;
    let mut req = request(&f, text("body"));
    req.transformations = vec![Uuid::new_v4()];

    let err = f.service.create_source(req).await.unwrap_err();

    assert!(matches!(err, Error::TransformationNotFound(_)));
    assert!(f.repos.sources.list_for_notebook(f.notebook).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_content_rejected() {
    let f = fixture(QueueConfig::default()).await;
    let err = f
        .service
        .create_source(request(&f, text("   ")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_force_sync_runs_inline() {
    let f = fixture(QueueConfig::default().with_force_sync(true)).await;

    let submission = f
        .service
        .create_source(request(&f, text("inline")))
        .await
        .unwrap();

    assert!(submission.job_id.is_none());
    assert!(submission.source.command.is_none());
    assert!(submission.result.unwrap().is_success());
    assert!(f.store.jobs().await.is_empty());
}

#[tokio::test]
async fn test_retry_refused_while_in_flight() {
    let f = fixture(QueueConfig::default()).await;
    let source = f
        .service
        .create_source(request(&f, text("body")))
        .await
        .unwrap()
        .source;

    let err = f
        .service
        .retry_processing(source.id, f.owner)
        .await
        .unwrap_err();
    match err {
        Error::InvalidInput(msg) => assert!(msg.contains("already processing")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(f.store.jobs().await.len(), 1);
}

#[tokio::test]
async fn test_retry_after_failure_requeues() {
    let f = fixture(QueueConfig::default()).await;
    let source = f
        .service
        .create_source(request(&f, text("retry me")))
        .await
        .unwrap()
        .source;
    let first_job = source.command.unwrap();

    let claimed = f
        .repos
        .jobs
        .claim_next(&["open_notebook/process_source".to_string()])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, first_job);
    f.repos.jobs.fail(first_job, "boom", None).await.unwrap();

    let mut stored = f.repos.sources.get(source.id).await.unwrap().unwrap();
    stored.full_text = Some("retry me".to_string());
    f.repos.sources.update(&stored).await.unwrap();

    let new_job = f.service.retry_processing(source.id, f.owner).await.unwrap();

    assert_ne!(new_job, first_job);
    let source = f.repos.sources.get(source.id).await.unwrap().unwrap();
    assert_eq!(source.command, Some(new_job));

    let job = f.repos.jobs.get(new_job).await.unwrap().unwrap();
    let input: SourceProcessingInput = serde_json::from_value(job.payload).unwrap();
    assert!(input.embed);
    assert_eq!(
        input.content,
        ContentDescriptor::Text {
            content: "retry me".to_string()
        }
    );
    assert_eq!(input.notebook_ids, vec![f.notebook]);
}

#[tokio::test]
async fn test_retry_checks_owner_and_notebooks() {
    let f = fixture(QueueConfig::default().with_force_sync(true)).await;
    let source = f
        .service
        .create_source(request(&f, text("x")))
        .await
        .unwrap()
        .source;

    let err = f
        .service
        .retry_processing(source.id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));

    let mut orphan = request(&f, text("y"));
    orphan.notebook_ids.clear();
    let orphan = f.service.create_source(orphan).await.unwrap().source;
    let err = f
        .service
        .retry_processing(orphan.id, f.owner)
        .await
        .unwrap_err();
    match err {
        Error::InvalidInput(msg) => assert!(msg.contains("not associated with any notebooks")),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_retry_without_content_rejected() {
    let f = fixture(QueueConfig::default().with_force_sync(true)).await;
    let source = f
        .service
        .create_source(request(&f, text("x")))
        .await
        .unwrap()
        .source;

    let err = f
        .service
        .retry_processing(source.id, f.owner)
        .await
        .unwrap_err();
    match err {
        Error::InvalidInput(msg) => assert!(msg.contains("Cannot determine source content")),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_list_with_status() {
    let f = fixture(QueueConfig::default()).await;
    let queued = f
        .service
        .create_source(request(&f, text("queued")))
        .await
        .unwrap();

    let inline = fixture(QueueConfig::default().with_force_sync(true)).await;
    let inline_source = inline
        .service
        .create_source(request(&inline, text("inline")))
        .await
        .unwrap()
        .source;
    let listed = inline.service.list_with_status(inline.notebook).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].source.id, inline_source.id);
    assert!(listed[0].status.is_none());

    let listed = f.service.list_with_status(f.notebook).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].source.id, queued.source.id);
    assert_eq!(listed[0].status, Some(ProcessingStatus::Queued));
}
