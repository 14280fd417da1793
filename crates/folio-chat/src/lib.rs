//! # folio-chat
//!
//! Notebook conversations for folio.
//!
//! This crate provides:
//! - Turn orchestration over durable per-thread state
//! - Notebook context assembly for grounded replies
//! - Two-stage image generation (prompt planning, then rendering)
//!
//! ## Example
//!
//! ```ignore
//! use folio_chat::{ChatConfig, ConversationOrchestrator, TurnRequest};
//!
//! let chat = ConversationOrchestrator::new(repos.threads.clone(), models, ChatConfig::from_env());
//! let history = chat
//!     .run_turn(TurnRequest::text("chat_session:42", "What do my sources say about deltas?"))
//!     .await?;
//! println!("{}", history.last().map(|m| m.content.as_str()).unwrap_or_default());
//! ```

pub mod context;
pub mod image;
pub mod orchestrator;
pub mod prompts;

pub use folio_core::*;

pub use context::{ContextInsight, ContextNote, ContextSource, NotebookContext};
pub use image::{build_context_summary, extract_final_prompt, ImageGenerator, ImagePlan};
pub use orchestrator::{ChatConfig, ConversationOrchestrator, TurnInput, TurnRequest};
pub use prompts::strip_data_uris;
