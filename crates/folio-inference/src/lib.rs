//! # folio-inference
//!
//! Model backends for folio.
//!
//! This crate provides:
//! - An OpenAI-compatible backend for embeddings and chat completions
//! - A Gemini backend for image generation
//! - A task-based [`ModelRegistry`] with a large-context switch
//! - `<think>` block handling for reasoning models
//! - Mock backends for tests (feature `mock`)
//!
//! # Feature Flags
//!
//! - `mock`: Enable deterministic mock backends for downstream tests

pub mod gemini;
pub mod openai;
pub mod registry;
pub mod thinking;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use folio_core::*;

pub use gemini::{GeminiConfig, GeminiImageBackend, GEMINI_PROVIDER};
pub use openai::{OpenAIBackend, OpenAIConfig};
pub use registry::{ModelRegistry, ModelTask};
pub use thinking::{parse_thinking_response, strip_thinking, ThinkingResponse};
