//! Token counting for chunk sizing and model selection.
//!
//! Chunk lengths are measured in model tokens, not characters, using the
//! cl100k_base encoding. Building the BPE tables is expensive, so the embedding
//! tokenizer is created once per process and shared.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::{Error, Result};

/// Trait for tokenization operations.
pub trait Tokenizer: Send + Sync {
    /// Count the number of tokens in the given text.
    fn count_tokens(&self, text: &str) -> usize;

    /// Get the name/identifier of this tokenizer.
    fn name(&self) -> &str;
}

/// Tiktoken-based tokenizer implementation.
pub struct TiktokenTokenizer {
    bpe: tiktoken_rs::CoreBPE,
    name: String,
}

impl TiktokenTokenizer {
    /// Create a tokenizer for embeddings (uses cl100k_base).
    pub fn for_embeddings() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| Error::Internal(format!("Failed to initialize cl100k_base: {}", e)))?;

        Ok(Self {
            bpe,
            name: "cl100k_base".to_string(),
        })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

static EMBEDDING_TOKENIZER: OnceCell<Arc<TiktokenTokenizer>> = OnceCell::new();

/// Process-wide cl100k_base tokenizer.
pub fn embedding_tokenizer() -> Result<Arc<TiktokenTokenizer>> {
    EMBEDDING_TOKENIZER
        .get_or_try_init(|| TiktokenTokenizer::for_embeddings().map(Arc::new))
        .cloned()
}

/// Count tokens with the shared tokenizer, estimating if it cannot be built.
pub fn token_count(text: &str) -> usize {
    match embedding_tokenizer() {
        Ok(tokenizer) => tokenizer.count_tokens(text),
        Err(_) => estimate_tokens(text),
    }
}

/// Quickly estimate token count without full tokenization.
///
/// Uses a heuristic ratio of ~3.7 characters per token for English text.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() as f32 / 3.7).ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_tokens_simple() {
        let tokenizer = TiktokenTokenizer::for_embeddings().unwrap();
        assert_eq!(tokenizer.count_tokens("hello world"), 2);
        assert_eq!(tokenizer.count_tokens(""), 0);
    }

    #[test]
    fn test_tokenizer_name() {
        let tokenizer = TiktokenTokenizer::for_embeddings().unwrap();
        assert_eq!(tokenizer.name(), "cl100k_base");
    }

    #[test]
    fn test_shared_tokenizer_is_reused() {
        let a = embedding_tokenizer().unwrap();
        let b = embedding_tokenizer().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_token_count_matches_tokenizer() {
        let text = "The quick brown fox jumps over the lazy dog.";
        let tokenizer = embedding_tokenizer().unwrap();
        assert_eq!(token_count(text), tokenizer.count_tokens(text));
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 2);
    }
}
