//! # folio-jobs
//!
//! Command queue and source ingestion for folio.
//!
//! This crate provides:
//! - Named command handlers with per-command retry policies
//! - Durable queueing, status polling and synchronous execution
//! - A polling worker with bounded concurrency and broadcast events
//! - The source ingestion workflow (extract, save, embed, transform)
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use folio_jobs::{ProcessSourceHandler, WorkerBuilder, WorkerConfig};
//!
//! let worker = WorkerBuilder::new(repos.jobs.clone())
//!     .with_config(WorkerConfig::default().with_poll_interval(1000))
//!     .with_handler(Arc::new(ProcessSourceHandler::new(ingestion)))
//!     .build()
//!     .await;
//!
//! let handle = worker.start();
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! handle.shutdown().await?;
//! ```

pub mod embedding;
pub mod extraction;
pub mod handler;
pub mod ingest;
pub mod process_source;
pub mod queue;
pub mod retry;
pub mod sources;
pub mod status;
pub mod transformation;
pub mod worker;

// Re-export core types
pub use folio_core::*;

pub use embedding::EmbeddingPipeline;
pub use extraction::{
    ContentServiceConfig, ContentServiceExtractor, ExtractorSelector, NativeExtractor,
};
pub use handler::{command_key, CommandContext, CommandHandler, CommandRegistry, JobResult};
pub use ingest::{
    ExtractionOptions, IngestionOutcome, IngestionRequest, IngestionState, SourceIngestion,
};
pub use process_source::{ProcessSourceHandler, SourceProcessingInput, SourceProcessingOutput};
pub use queue::{CommandService, QueueConfig, Submission};
pub use retry::{run_with_retry, AttemptTracker, Backoff, Execution, RetryPolicy};
pub use sources::{CreateSourceRequest, SourceService, SourceSubmission, SourceWithStatus};
pub use status::{fetch_statuses, ProcessingStatus};
pub use transformation::TransformationRunner;
pub use worker::{JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};
