//! # folio-core
//!
//! Core types, traits, and abstractions for the folio notebook backend.
//!
//! This crate provides the data model, the error taxonomy, and the trait seams
//! (record store, inference, extraction) that the other folio crates build on.

pub mod cache;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod tokenizer;
pub mod traits;

// Re-export commonly used types at crate root
pub use cache::{CacheEntry, TtlCache};
pub use error::{Error, Result};
pub use models::*;
pub use tokenizer::*;
pub use traits::*;
