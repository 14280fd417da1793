//! Token-measured recursive text splitting for embedding generation.
//!
//! Text is split on the most meaningful separator present (paragraph, line,
//! sentence punctuation, whitespace, CJK punctuation, finally characters) and
//! the pieces are greedily merged back into chunks no longer than
//! `chunk_size` tokens, with up to `overlap` tokens carried into the next chunk.
//! Separators stay attached to the start of the piece that follows them, so
//! joining pieces reproduces the original text.
//!
//! # Example
//!
//! ```rust,ignore
//! use folio_db::chunking::{Chunker, RecursiveTokenChunker};
//!
//! let chunker = RecursiveTokenChunker::for_embeddings()?;
//! for chunk in chunker.chunk("First paragraph.\n\nSecond paragraph.") {
//!     println!("{chunk}");
//! }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use folio_core::defaults::{CHUNK_OVERLAP_RATIO, CHUNK_SEPARATORS, CHUNK_SIZE_TOKENS};
use folio_core::{embedding_tokenizer, Result, Tokenizer};

/// Configuration for chunking, in tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Maximum tokens per chunk.
    pub chunk_size: usize,
    /// Tokens of trailing context repeated at the start of the next chunk.
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self::with_overlap_ratio(CHUNK_SIZE_TOKENS, CHUNK_OVERLAP_RATIO)
    }
}

impl ChunkerConfig {
    /// Config whose overlap is a fraction of the chunk size, rounded down.
    pub fn with_overlap_ratio(chunk_size: usize, ratio: f64) -> Self {
        Self {
            chunk_size,
            overlap: (chunk_size as f64 * ratio) as usize,
        }
    }
}

/// Common trait for chunking strategies.
pub trait Chunker: Send + Sync {
    /// Split text into ordered chunks. Empty input yields no chunks.
    fn chunk(&self, text: &str) -> Vec<String>;

    /// Get the configuration used by this chunker.
    fn config(&self) -> &ChunkerConfig;
}

/// Recursive separator-hierarchy splitter measured in model tokens.
pub struct RecursiveTokenChunker {
    config: ChunkerConfig,
    separators: Vec<String>,
    tokenizer: Arc<dyn Tokenizer>,
}

impl RecursiveTokenChunker {
    /// Create a chunker with the default separator hierarchy.
    pub fn new(config: ChunkerConfig, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            config,
            separators: CHUNK_SEPARATORS.iter().map(|s| s.to_string()).collect(),
            tokenizer,
        }
    }

    /// Default embedding chunker: 500 tokens, 15% overlap, cl100k_base.
    pub fn for_embeddings() -> Result<Self> {
        let tokenizer: Arc<dyn Tokenizer> = embedding_tokenizer()?;
        Ok(Self::new(ChunkerConfig::default(), tokenizer))
    }

    /// Replace the separator hierarchy.
    pub fn with_separators(mut self, separators: &[&str]) -> Self {
        self.separators = separators.iter().map(|s| s.to_string()).collect();
        self
    }

    fn len(&self, text: &str) -> usize {
        self.tokenizer.count_tokens(text)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        // First separator present in the text; "" always matches.
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut remaining: &[String] = &[];
        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut fitting: Vec<(String, usize)> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            let tokens = self.len(&piece);
            if tokens < self.config.chunk_size {
                fitting.push((piece, tokens));
                continue;
            }

            if !fitting.is_empty() {
                chunks.extend(self.merge(std::mem::take(&mut fitting)));
            }
            if remaining.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_recursive(&piece, remaining));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge(fitting));
        }
        chunks
    }

    /// Greedily combine small pieces into chunks, keeping an overlap tail.
    fn merge(&self, pieces: Vec<(String, usize)>) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: VecDeque<(String, usize)> = VecDeque::new();
        let mut total = 0usize;

        for (piece, tokens) in pieces {
            if total + tokens > self.config.chunk_size && !current.is_empty() {
                push_joined(&mut chunks, &current);
                while total > self.config.overlap
                    || (total + tokens > self.config.chunk_size && total > 0)
                {
                    match current.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }
            total += tokens;
            current.push_back((piece, tokens));
        }

        push_joined(&mut chunks, &current);
        chunks
    }
}

impl Chunker for RecursiveTokenChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.split_recursive(text, &self.separators)
    }

    fn config(&self) -> &ChunkerConfig {
        &self.config
    }
}

/// Split on `separator`, attaching each separator to the start of the next piece.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(text[start..idx].to_string());
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(text[start..].to_string());
    }
    pieces.retain(|p| !p.is_empty());
    pieces
}

fn push_joined(chunks: &mut Vec<String>, current: &VecDeque<(String, usize)>) {
    let joined: String = current.iter().map(|(p, _)| p.as_str()).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts whitespace-separated words so expectations are easy to derive.
    struct WordTokenizer;

    impl Tokenizer for WordTokenizer {
        fn count_tokens(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }

        fn name(&self) -> &str {
            "words"
        }
    }

    fn word_chunker(chunk_size: usize, overlap: usize) -> RecursiveTokenChunker {
        RecursiveTokenChunker::new(
            ChunkerConfig {
                chunk_size,
                overlap,
            },
            Arc::new(WordTokenizer),
        )
    }

    #[test]
    fn test_default_config_is_500_with_75_overlap() {
        let config = ChunkerConfig::default();
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.overlap, 75);
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        let chunker = word_chunker(10, 2);
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("   \n\n ").is_empty());
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let chunker = RecursiveTokenChunker::for_embeddings().unwrap();
        assert_eq!(chunker.chunk("hello world"), vec!["hello world".to_string()]);
    }

    #[test]
    fn test_split_keeping_separator_attaches_to_next_piece() {
        let pieces = split_keeping_separator("a.b.c", ".");
        assert_eq!(pieces, vec!["a", ".b", ".c"]);
        assert_eq!(pieces.concat(), "a.b.c");
    }

    #[test]
    fn test_split_keeping_separator_leading_separator() {
        let pieces = split_keeping_separator("\n\nfirst\n\nsecond", "\n\n");
        assert_eq!(pieces, vec!["\n\nfirst", "\n\nsecond"]);
    }

    #[test]
    fn test_split_on_characters() {
        let pieces = split_keeping_separator("héllo", "");
        assert_eq!(pieces.len(), 5);
        assert_eq!(pieces[1], "é");
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let chunker = word_chunker(4, 0);
        let chunks = chunker.chunk("p1w1 p1w2 p1w3\n\np2w1 p2w2 p2w3");
        assert_eq!(chunks, vec!["p1w1 p1w2 p1w3", "p2w1 p2w2 p2w3"]);
    }

    #[test]
    fn test_overlap_carries_trailing_words() {
        let chunker = word_chunker(5, 2);
        let chunks = chunker.chunk("a b c d e f g h i j");
        assert_eq!(chunks, vec!["a b c d e", "d e f g h", "g h i j"]);
    }

    #[test]
    fn test_oversized_paragraph_recurses_to_words() {
        let chunker = word_chunker(4, 0);
        let chunks = chunker.chunk("one two three four five six\n\nseven");
        assert_eq!(chunks, vec!["one two three four", "five six", "seven"]);
    }

    #[test]
    fn test_chunks_respect_token_limit() {
        let chunker = RecursiveTokenChunker::for_embeddings().unwrap();
        let paragraph = "The pipeline splits long documents into overlapping windows. ".repeat(30);
        let text = format!("{paragraph}\n\n{paragraph}\n\n{paragraph}");
        let chunks = chunker.chunk(&text);

        assert!(chunks.len() > 1);
        let tokenizer = embedding_tokenizer().unwrap();
        for chunk in &chunks {
            assert!(tokenizer.count_tokens(chunk) <= 500);
        }
    }

    #[test]
    fn test_cjk_punctuation_separator() {
        let chunker = word_chunker(2, 0).with_separators(&["\u{3002}", ""]);
        // No whitespace: each CJK sentence counts as one word.
        let chunks = chunker.chunk("第一句\u{3002}第二句\u{3002}第三句");
        assert_eq!(chunks, vec!["第一句\u{3002}第二句", "\u{3002}第三句"]);
    }
}
