//! OpenAI-compatible inference backend.
//!
//! Works with any endpoint speaking the OpenAI `/embeddings` and
//! `/chat/completions` protocol (OpenAI, Azure OpenAI, OpenRouter, vLLM,
//! Ollama in compatibility mode).
//!
//! # Example
//!
//! ```rust,no_run
//! use folio_inference::openai::{OpenAIBackend, OpenAIConfig};
//! use folio_core::EmbeddingBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OpenAIBackend::new(OpenAIConfig {
//!         base_url: "http://localhost:11434/v1".to_string(),
//!         embed_model: "nomic-embed-text".to_string(),
//!         embed_dimension: 768,
//!         ..Default::default()
//!     })
//!     .unwrap();
//!
//!     let vectors = backend.embed_texts(&["Hello, world!".to_string()]).await.unwrap();
//! }
//! ```

mod backend;
mod error;
mod types;

pub use backend::{
    OpenAIBackend, OpenAIConfig, DEFAULT_DIMENSION, DEFAULT_EMBED_MODEL, DEFAULT_GEN_MODEL,
    DEFAULT_OPENAI_URL, DEFAULT_TIMEOUT_SECS,
};
pub use error::{to_folio_error, OpenAIErrorCode};
pub use types::*;
