//! Index seams consumed by the pipeline (writes) and the retriever
//! (reads). Writes for one document are a versioned replace: implementors
//! must never leave a partially replaced chunk set observable for a
//! document, and must ignore upserts carrying a version older than what
//! they already hold.

use crate::error::SearchError;
use crate::models::{Chunk, IndexDocument, QueryFilters, ScoredChunk};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Record (or verify) the embedding space backing this index. A
    /// model or dimensionality change must fail with
    /// [`SearchError::SpaceMismatch`] rather than silently mixing vector
    /// spaces.
    async fn ensure_space(&self, model_id: &str, dimensions: usize) -> Result<(), SearchError>;

    async fn upsert_chunks(
        &self,
        document: &IndexDocument,
        version: u64,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError>;

    async fn remove_document(&self, document_id: Uuid) -> Result<(), SearchError>;

    /// Cosine-ranked nearest chunks among those matching `filters`.
    /// Scores are normalized to [0,1].
    async fn search_dense(
        &self,
        query_vector: &[f32],
        filters: &QueryFilters,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, SearchError>;
}

#[async_trait]
pub trait LexicalIndex: Send + Sync {
    async fn upsert_chunks(
        &self,
        document: &IndexDocument,
        version: u64,
        chunks: &[Chunk],
    ) -> Result<(), SearchError>;

    async fn remove_document(&self, document_id: Uuid) -> Result<(), SearchError>;

    /// Ranked full-text match among chunks matching `filters`. Scores are
    /// normalized to [0,1] within the returned set.
    async fn search_lexical(
        &self,
        query_text: &str,
        filters: &QueryFilters,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, SearchError>;
}
