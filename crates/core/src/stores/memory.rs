//! In-process index implementing both retrieval paths over one lock, so
//! a document's chunk set replacement is atomic by construction.

use crate::error::SearchError;
use crate::models::{Chunk, IndexDocument, QueryFilters, ScoredChunk};
use crate::traits::{LexicalIndex, VectorIndex};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryIndex {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    space: Option<(String, usize)>,
    documents: HashMap<Uuid, StoredSet>,
}

struct StoredSet {
    document: IndexDocument,
    version: u64,
    chunks: Vec<Chunk>,
    embeddings: Vec<Vec<f32>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_set(
        &self,
        document: &IndexDocument,
        version: u64,
        chunks: &[Chunk],
        embeddings: Option<&[Vec<f32>]>,
    ) {
        let mut inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };

        match inner.documents.get_mut(&document.document_id) {
            // A stale writer never clobbers a newer set.
            Some(existing) if existing.version > version => {}
            Some(existing) if existing.version == version => {
                if let Some(embeddings) = embeddings {
                    existing.embeddings = embeddings.to_vec();
                }
            }
            _ => {
                inner.documents.insert(
                    document.document_id,
                    StoredSet {
                        document: document.clone(),
                        version,
                        chunks: chunks.to_vec(),
                        embeddings: embeddings.map(<[Vec<f32>]>::to_vec).unwrap_or_default(),
                    },
                );
            }
        }
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0f64;
    let mut norm_a = 0f64;
    let mut norm_b = 0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn terms(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| term.len() > 1)
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_space(&self, model_id: &str, dimensions: usize) -> Result<(), SearchError> {
        let mut inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        match &inner.space {
            Some((existing_model, existing_dims))
                if existing_model != model_id || *existing_dims != dimensions =>
            {
                Err(SearchError::SpaceMismatch {
                    details: format!(
                        "index holds {existing_model} ({existing_dims} dims), requested {model_id} ({dimensions} dims)"
                    ),
                })
            }
            Some(_) => Ok(()),
            None => {
                inner.space = Some((model_id.to_string(), dimensions));
                Ok(())
            }
        }
    }

    async fn upsert_chunks(
        &self,
        document: &IndexDocument,
        version: u64,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError> {
        if chunks.len() != embeddings.len() {
            return Err(SearchError::Request(format!(
                "embedding count {} does not match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }
        self.write_set(document, version, chunks, Some(embeddings));
        Ok(())
    }

    async fn remove_document(&self, document_id: Uuid) -> Result<(), SearchError> {
        let mut inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.documents.remove(&document_id);
        Ok(())
    }

    async fn search_dense(
        &self,
        query_vector: &[f32],
        filters: &QueryFilters,
        _limit: usize,
    ) -> Result<Vec<ScoredChunk>, SearchError> {
        let inner = match self.inner.read() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut hits = Vec::new();
        for set in inner.documents.values() {
            if !filters.matches(&set.document) {
                continue;
            }
            for (chunk, embedding) in set.chunks.iter().zip(set.embeddings.iter()) {
                let score = cosine(query_vector, embedding).clamp(0.0, 1.0);
                if score > 0.0 {
                    hits.push(ScoredChunk {
                        chunk: chunk.clone(),
                        document: set.document.clone(),
                        version: set.version,
                        score,
                    });
                }
            }
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(hits)
    }
}

#[async_trait]
impl LexicalIndex for MemoryIndex {
    async fn upsert_chunks(
        &self,
        document: &IndexDocument,
        version: u64,
        chunks: &[Chunk],
    ) -> Result<(), SearchError> {
        self.write_set(document, version, chunks, None);
        Ok(())
    }

    async fn remove_document(&self, document_id: Uuid) -> Result<(), SearchError> {
        VectorIndex::remove_document(self, document_id).await
    }

    /// Term-frequency scoring normalized by the best score in the result
    /// set, so the top lexical hit always lands at 1.0.
    async fn search_lexical(
        &self,
        query_text: &str,
        filters: &QueryFilters,
        _limit: usize,
    ) -> Result<Vec<ScoredChunk>, SearchError> {
        let query_terms = terms(query_text);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let inner = match self.inner.read() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut hits = Vec::new();
        for set in inner.documents.values() {
            if !filters.matches(&set.document) {
                continue;
            }
            for chunk in &set.chunks {
                let chunk_terms = terms(&chunk.content);
                if chunk_terms.is_empty() {
                    continue;
                }
                let mut matched = 0usize;
                for term in &query_terms {
                    matched += chunk_terms.iter().filter(|t| *t == term).count();
                }
                if matched == 0 {
                    continue;
                }
                let score = matched as f64 / chunk_terms.len() as f64;
                hits.push(ScoredChunk {
                    chunk: chunk.clone(),
                    document: set.document.clone(),
                    version: set.version,
                    score,
                });
            }
        }

        if let Some(best) = hits
            .iter()
            .map(|hit| hit.score)
            .max_by(|a, b| a.total_cmp(b))
        {
            if best > 0.0 {
                for hit in &mut hits {
                    hit.score /= best;
                }
            }
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(hits)
    }
}
