//! Source embedding: chunk, embed, replace.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use folio_core::{EmbeddedChunk, EmbeddingBackend, EmbeddingRepository, Error, Result, Source};
use folio_db::chunking::{Chunker, RecursiveTokenChunker};

/// Turns source text into ordered embedded chunks and stores them.
#[derive(Clone)]
pub struct EmbeddingPipeline {
    backend: Arc<dyn EmbeddingBackend>,
    chunker: Arc<dyn Chunker>,
    embeddings: Arc<dyn EmbeddingRepository>,
}

impl EmbeddingPipeline {
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        chunker: Arc<dyn Chunker>,
        embeddings: Arc<dyn EmbeddingRepository>,
    ) -> Self {
        Self {
            backend,
            chunker,
            embeddings,
        }
    }

    /// Pipeline with the default 500-token recursive chunker.
    pub fn with_default_chunker(
        backend: Arc<dyn EmbeddingBackend>,
        embeddings: Arc<dyn EmbeddingRepository>,
    ) -> Result<Self> {
        let chunker = Arc::new(RecursiveTokenChunker::for_embeddings()?);
        Ok(Self::new(backend, chunker, embeddings))
    }

    /// Split `text` and embed every chunk in one batch, preserving order.
    pub async fn embed(&self, text: &str) -> Result<Vec<EmbeddedChunk>> {
        let chunks = self.chunker.chunk(text);
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self.backend.embed_texts(&chunks).await?;
        if vectors.len() != chunks.len() {
            return Err(Error::Embedding(format!(
                "Embedding count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }

        Ok(chunks
            .into_iter()
            .zip(vectors)
            .map(|(content, vector)| EmbeddedChunk { content, vector })
            .collect())
    }

    /// Re-embed a source, replacing every previous chunk. Returns the count.
    #[instrument(
        skip(self, source),
        fields(subsystem = "embedding", component = "pipeline", op = "vectorize", source_id = %source.id)
    )]
    pub async fn vectorize_source(&self, source: &Source) -> Result<usize> {
        let text = source.full_text.as_deref().unwrap_or_default();
        let chunks = self.embed(text).await?;
        self.store(source, &chunks).await
    }

    /// Reduced-mode variant: one embedding request per chunk.
    ///
    /// Writes the same rows as [`vectorize_source`](Self::vectorize_source).
    pub async fn vectorize_source_per_chunk(&self, source: &Source) -> Result<usize> {
        let text = source.full_text.as_deref().unwrap_or_default();
        let mut chunks = Vec::new();
        for content in self.chunker.chunk(text) {
            let vector = self
                .backend
                .embed_texts(std::slice::from_ref(&content))
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| Error::Embedding("Embedding backend returned no vector".into()))?;
            chunks.push(EmbeddedChunk { content, vector });
        }
        self.store(source, &chunks).await
    }

    async fn store(&self, source: &Source, chunks: &[EmbeddedChunk]) -> Result<usize> {
        if chunks.is_empty() {
            debug!(source_id = %source.id, "No text to embed, clearing embeddings");
            self.embeddings.delete_for_source(source.id).await?;
            return Ok(0);
        }

        let written = self
            .embeddings
            .replace_for_source(source.id, source.owner, chunks)
            .await?;
        info!(
            subsystem = "embedding",
            source_id = %source.id,
            chunk_count = written,
            model = self.backend.model_name(),
            "Source embedded"
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use folio_db::MemoryStore;
    use folio_inference::mock::MockEmbeddingBackend;
    use uuid::Uuid;

    /// Splits on blank lines.
    struct Paragraphs(folio_db::ChunkerConfig);

    impl Chunker for Paragraphs {
        fn chunk(&self, text: &str) -> Vec<String> {
            text.split("\n\n")
                .filter(|p| !p.trim().is_empty())
                .map(String::from)
                .collect()
        }

        fn config(&self) -> &folio_db::ChunkerConfig {
            &self.0
        }
    }

    fn source(text: &str) -> Source {
        Source {
            id: Uuid::new_v4(),
            title: None,
            topics: vec![],
            full_text: Some(text.to_string()),
            asset: None,
            owner: Uuid::new_v4(),
            command: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn pipeline(store: &MemoryStore, backend: MockEmbeddingBackend) -> EmbeddingPipeline {
        EmbeddingPipeline::new(
            Arc::new(backend),
            Arc::new(Paragraphs(folio_db::ChunkerConfig::default())),
            store.repositories().embeddings,
        )
    }

    #[tokio::test]
    async fn test_embed_preserves_chunk_order() {
        let store = MemoryStore::new();
        let chunks = pipeline(&store, MockEmbeddingBackend::new(4))
            .embed("one\n\ntwo\n\nthree")
            .await
            .unwrap();
        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert_eq!(
            chunks[1].vector.as_slice(),
            MockEmbeddingBackend::vector_for("two", 4).as_slice()
        );
    }

    #[tokio::test]
    async fn test_reembedding_replaces_whole_set() {
        let store = MemoryStore::new();
        let pipeline = pipeline(&store, MockEmbeddingBackend::new(4));
        let mut src = source("a\n\nb\n\nc\n\nd");

        assert_eq!(pipeline.vectorize_source(&src).await.unwrap(), 4);
        src.full_text = Some("x\n\ny".to_string());
        assert_eq!(pipeline.vectorize_source(&src).await.unwrap(), 2);

        let rows = store.repositories().embeddings.list_for_source(src.id).await.unwrap();
        let indices: Vec<i32> = rows.iter().map(|r| r.chunk_index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(rows[0].content, "x");
    }

    #[tokio::test]
    async fn test_per_chunk_matches_batch_shape() {
        let store = MemoryStore::new();
        let backend = MockEmbeddingBackend::new(4);
        let pipeline = pipeline(&store, backend.clone());
        let src = source("p1\n\np2\n\np3");

        assert_eq!(pipeline.vectorize_source_per_chunk(&src).await.unwrap(), 3);
        assert_eq!(backend.calls().len(), 3);

        let rows = store.repositories().embeddings.list_for_source(src.id).await.unwrap();
        let indices: Vec<i32> = rows.iter().map(|r| r.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(rows.iter().all(|r| r.owner == src.owner));
    }

    #[tokio::test]
    async fn test_empty_text_clears_embeddings() {
        let store = MemoryStore::new();
        let pipeline = pipeline(&store, MockEmbeddingBackend::new(4));
        let mut src = source("a\n\nb");
        pipeline.vectorize_source(&src).await.unwrap();

        src.full_text = None;
        assert_eq!(pipeline.vectorize_source(&src).await.unwrap(), 0);
        assert!(store
            .repositories()
            .embeddings
            .list_for_source(src.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let store = MemoryStore::new();
        let backend =
            MockEmbeddingBackend::new(4).failing(1, || Error::Embedding("quota".to_string()));
        let err = pipeline(&store, backend).embed("text").await.unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }
}
