//! Centralized default constants for folio.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic numbers;
//! environment variables override them at the component `from_env()` layer.

// =============================================================================
// SOURCES
// =============================================================================

/// Title given to a source between submission and extraction.
pub const SOURCE_PLACEHOLDER_TITLE: &str = "Processing...";

/// Application namespace under which folio registers its commands.
pub const COMMAND_APP: &str = "open_notebook";

/// Command name of the source ingestion workflow.
pub const PROCESS_SOURCE_COMMAND: &str = "process_source";

/// Wall-clock bound for one source ingestion run (seconds).
pub const SOURCE_PROCESS_TIMEOUT_SECS: u64 = 300;

/// Wall-clock bound for synchronous fallback execution (seconds).
pub const SYNC_EXECUTION_TIMEOUT_SECS: u64 = 300;

// =============================================================================
// CHUNKING
// =============================================================================

/// Maximum tokens per embedded chunk.
pub const CHUNK_SIZE_TOKENS: usize = 500;

/// Overlap between adjacent chunks, as a fraction of the chunk size.
pub const CHUNK_OVERLAP_RATIO: f64 = 0.15;

/// Separator hierarchy for recursive splitting, most meaningful first.
pub const CHUNK_SEPARATORS: &[&str] = &[
    "\n\n",
    "\n",
    ".",
    ",",
    " ",
    "\u{200b}", // zero-width space
    "\u{ff0c}", // fullwidth comma
    "\u{3001}", // ideographic comma
    "\u{ff0e}", // fullwidth full stop
    "\u{3002}", // ideographic full stop
    "",
];

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Attempts a command gets when it declares no policy of its own.
pub const JOB_MAX_ATTEMPTS: i32 = 1;

/// Attempts for the source ingestion command.
pub const PROCESS_SOURCE_MAX_ATTEMPTS: u32 = 5;

/// Lower bound of the exponential retry delay (milliseconds).
pub const RETRY_WAIT_MIN_MS: u64 = 1_000;

/// Upper bound of the exponential retry delay (milliseconds).
pub const RETRY_WAIT_MAX_MS: u64 = 30_000;

/// Worker poll interval when the queue is idle (milliseconds).
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// Jobs one worker runs at the same time.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Hard bound on one job execution including retries (seconds).
pub const JOB_TIMEOUT_SECS: u64 = 600;

/// Time a running job may hold its claim before another worker requeues it
/// (seconds). Must exceed [`JOB_TIMEOUT_SECS`].
pub const JOB_LEASE_SECS: u64 = 2 * JOB_TIMEOUT_SECS;

/// Capacity of the worker event broadcast channel.
pub const WORKER_EVENT_CAPACITY: usize = 100;

/// Simultaneous status lookups when listing many sources.
pub const STATUS_LOOKUP_CONCURRENCY: usize = 10;

// =============================================================================
// CONVERSATION
// =============================================================================

/// Wall-clock bound for one conversation turn (seconds).
pub const CHAT_TIMEOUT_SECS: u64 = 40;

/// Placeholder substituted for inline image payloads sent back to a model.
pub const IMAGE_OMITTED: &str = "[image omitted]";

/// Marker the image planner ends its answer with.
pub const FINAL_PROMPT_MARKER: &str = "FINAL PROMPT:";

/// Context sections included in an image plan.
pub const IMAGE_CONTEXT_MAX_SECTIONS: usize = 5;

/// Characters of a source's text quoted in an image plan context.
pub const IMAGE_CONTEXT_SOURCE_CHARS: usize = 800;

/// Characters of a note quoted in an image plan context.
pub const IMAGE_CONTEXT_NOTE_CHARS: usize = 600;

/// Insights quoted for a source without text.
pub const IMAGE_CONTEXT_INSIGHTS: usize = 2;

// =============================================================================
// INFERENCE
// =============================================================================

/// Prompt size above which the large-context model is used (tokens).
pub const LARGE_CONTEXT_THRESHOLD_TOKENS: usize = 105_000;

/// Default image model for the Gemini provider.
pub const IMAGE_MODEL: &str = "gemini-2.5-flash-image";

/// Default Gemini API base.
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

// =============================================================================
// EXTRACTION
// =============================================================================

/// How long a capability probe result is trusted (seconds).
pub const EXTRACTION_PROBE_TTL_SECS: u64 = 300;

/// Timeout of the extraction service health probe (seconds).
pub const EXTRACTION_PROBE_TIMEOUT_SECS: u64 = 5;
