//! folio: command worker and operator CLI.
//!
//! `folio worker` runs the job worker against Postgres. The remaining
//! subcommands submit sources, inspect jobs and drive a chat thread from
//! the shell.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use folio_chat::{ChatConfig, ContextNote, ConversationOrchestrator, NotebookContext, TurnRequest};
use folio_db::{Database, ObjectStore, PoolConfig, StorageBackend};
use folio_inference::ModelRegistry;
use folio_jobs::{
    CommandRegistry, CommandService, ContentDescriptor, CreateSourceRequest, EmbeddingPipeline,
    ExtractionOptions, ExtractorSelector, ProcessSourceHandler, QueueConfig, SourceIngestion,
    SourceService, TransformationRunner, WorkerBuilder, WorkerConfig, WorkerEvent,
};

#[derive(Parser)]
#[command(name = "folio")]
#[command(author, version, about = "Research notebook backend worker")]
#[command(propagate_version = true)]
struct Cli {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", default_value = "postgres://localhost/folio")]
    database_url: String,

    /// Skip running migrations on startup
    #[arg(long, env = "SKIP_MIGRATIONS")]
    skip_migrations: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the job worker until interrupted
    Worker,

    /// Create a source and queue its processing
    Submit {
        /// Owning user
        #[arg(long)]
        owner: Uuid,

        /// Notebook to add the source to (repeatable)
        #[arg(long = "notebook", num_args = 1..)]
        notebooks: Vec<Uuid>,

        /// Local file or gs:// object to ingest
        #[arg(long, conflicts_with_all = ["url", "text"])]
        file: Option<String>,

        /// Web page to ingest
        #[arg(long, conflicts_with = "text")]
        url: Option<String>,

        /// Inline text to ingest
        #[arg(long)]
        text: Option<String>,

        #[arg(long)]
        title: Option<String>,

        /// Transformation to apply (repeatable; defaults apply when omitted)
        #[arg(long = "transformation")]
        transformations: Vec<Uuid>,

        /// Skip embedding
        #[arg(long)]
        no_embed: bool,

        /// Delete the uploaded file after processing
        #[arg(long)]
        delete_source: bool,
    },

    /// Queue processing again for a failed source
    Retry {
        source_id: Uuid,

        #[arg(long)]
        owner: Uuid,
    },

    /// Print a job's status report
    Status { job_id: Uuid },

    /// List a notebook's sources with their processing status
    Sources { notebook_id: Uuid },

    /// Send one message to a chat thread and print the reply
    Chat {
        /// Thread identifier
        #[arg(long)]
        thread: String,

        /// Ground the reply in this notebook's sources
        #[arg(long, requires = "owner")]
        notebook: Option<Uuid>,

        #[arg(long)]
        owner: Option<Uuid>,

        /// Generation model to use for this thread
        #[arg(long)]
        model: Option<String>,

        /// Note text to ground the reply in (repeatable)
        #[arg(long = "note")]
        notes: Vec<String>,

        message: String,
    },
}

/// Everything the subcommands share.
struct App {
    db: Database,
    models: ModelRegistry,
    registry: CommandRegistry,
    commands: CommandService,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_logging();

    let app = build(&cli).await?;
    match cli.command {
        Commands::Worker => run_worker(app).await,
        Commands::Submit {
            owner,
            notebooks,
            file,
            url,
            text,
            title,
            transformations,
            no_embed,
            delete_source,
        } => {
            let content = match (file, url, text) {
                (Some(file_path), _, _) => ContentDescriptor::File { file_path },
                (None, Some(url), _) => ContentDescriptor::Url { url },
                (None, None, Some(content)) => ContentDescriptor::Text { content },
                (None, None, None) => anyhow::bail!("one of --file, --url or --text is required"),
            };
            let request = CreateSourceRequest {
                owner,
                title,
                topics: Vec::new(),
                content,
                notebook_ids: notebooks,
                transformations,
                embed: !no_embed,
                delete_source,
            };
            let submission = sources(&app).create_source(request).await?;
            match (submission.job_id, submission.result) {
                (Some(job_id), _) => println!("source {} queued as job {}", submission.source.id, job_id),
                (None, Some(result)) => {
                    println!("source {} processed inline: {:?}", submission.source.id, result)
                }
                (None, None) => println!("source {} created", submission.source.id),
            }
            Ok(())
        }
        Commands::Retry { source_id, owner } => {
            let job_id = sources(&app).retry_processing(source_id, owner).await?;
            println!("source {} requeued as job {}", source_id, job_id);
            Ok(())
        }
        Commands::Status { job_id } => {
            let report = app.commands.get_status(job_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Sources { notebook_id } => {
            for entry in sources(&app).list_with_status(notebook_id).await? {
                let status = entry
                    .status
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}\t{}\t{}",
                    entry.source.id,
                    status,
                    entry.source.title.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }
        Commands::Chat {
            thread,
            notebook,
            owner,
            model,
            notes,
            message,
        } => {
            let repos = app.db.repositories();
            let mut context = match (notebook, owner) {
                (Some(notebook_id), Some(owner)) => {
                    NotebookContext::for_notebook(&repos, notebook_id, owner).await?
                }
                _ => NotebookContext::default(),
            };
            context = context.with_notes(notes.into_iter().map(|content| ContextNote {
                id: None,
                title: None,
                content,
            }));
            let mut request = TurnRequest::text(thread, message);
            if !context.is_empty() {
                request = request.with_context(context);
            }
            if let Some(model) = model {
                request = request.with_model_override(model);
            }
            if let Some(owner) = owner {
                request = request.with_owner(owner);
            }
            let chat = ConversationOrchestrator::new(
                repos.threads.clone(),
                app.models.clone(),
                ChatConfig::from_env(),
            );
            let history = chat.run_turn(request).await?;
            if let Some(reply) = history.last() {
                println!("{}", reply.content);
            }
            Ok(())
        }
    }
}

/// Connect, migrate and wire the `process_source` handler.
async fn build(cli: &Cli) -> anyhow::Result<App> {
    info!("Connecting to database...");
    let db = Database::connect(&cli.database_url, PoolConfig::from_env())
        .await
        .context("connecting to database")?;
    if cli.skip_migrations {
        warn!("Skipping database migrations");
    } else {
        db.migrate().await.context("running migrations")?;
        info!("Database migrations complete");
    }
    let repos = db.repositories();

    let models = ModelRegistry::from_env()?;
    let storage: Arc<dyn StorageBackend> = Arc::new(ObjectStore::from_env()?);
    let extractors = Arc::new(ExtractorSelector::from_env()?);

    let mut ingestion = SourceIngestion::new(
        repos.clone(),
        extractors,
        TransformationRunner::new(models.clone()),
        storage,
    )
    .with_options(ExtractionOptions::from_env());
    match models.embedding() {
        Ok(backend) => {
            ingestion = ingestion.with_embedding(EmbeddingPipeline::with_default_chunker(
                backend,
                repos.embeddings.clone(),
            )?);
        }
        Err(e) => warn!(error = %e, "Embedding disabled"),
    }

    let registry = CommandRegistry::new();
    registry
        .register(Arc::new(ProcessSourceHandler::from_env(ingestion)))
        .await;
    let commands =
        CommandService::new(repos.jobs.clone(), registry.clone()).with_config(QueueConfig::from_env());

    Ok(App {
        db,
        models,
        registry,
        commands,
    })
}

fn sources(app: &App) -> SourceService {
    SourceService::new(app.db.repositories(), app.commands.clone())
}

async fn run_worker(app: App) -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();
    if !config.enabled {
        warn!("JOB_WORKER_ENABLED is false; nothing to do");
        return Ok(());
    }

    let worker = WorkerBuilder::new(app.db.repositories().jobs)
        .with_registry(app.registry)
        .with_config(config)
        .build()
        .await;
    let handle = worker.start();

    let mut events = handle.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                WorkerEvent::JobFailed { job_id, command, error } => {
                    warn!(%job_id, %command, %error, "Job failed");
                }
                WorkerEvent::WorkerStopped => break,
                _ => {}
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");
    handle.shutdown().await?;
    Ok(())
}

/// Install the tracing subscriber.
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `LOG_FORMAT` | `text` | `json` or `text` |
/// | `LOG_FILE` | unset | Log to a daily-rotated file instead of stdout |
/// | `LOG_ANSI` | auto | Force ANSI colors on or off |
/// | `RUST_LOG` | `folio=debug` | Standard env filter |
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "folio=debug,folio_jobs=debug,folio_chat=debug,folio_db=info,folio_inference=info".into()
    });
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let path = Path::new(path);
        let dir = path.parent().unwrap_or(Path::new("."));
        let name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("folio.log");
        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(log_ansi.unwrap_or(false)),
                )
                .init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry.with(tracing_subscriber::fmt::layer().json()).init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}
