//! Hybrid retrieval: dense similarity and lexical full-text search fused
//! into one ranking.
//!
//! Both paths run concurrently over the filtered chunk set and are merged
//! as a union: a chunk missing from one path contributes zero for that
//! path's score, never exclusion. The combined score is a weighted sum
//! (0.7 dense / 0.3 lexical by default, see [`RetrievalConfig`]); `top_k`
//! truncation happens strictly after the merge so a chunk strong in only
//! one signal is never biased out. Hits are checked against the registry
//! so superseded or soft-deleted chunk sets are never surfaced.

use crate::config::RetrievalConfig;
use crate::embeddings::Embedder;
use crate::error::SearchError;
use crate::models::{Citation, IndexDocument, RetrievalResult, ScoredChunk, SearchQuery};
use crate::registry::DocumentRegistry;
use crate::traits::{LexicalIndex, VectorIndex};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

pub struct HybridRetriever {
    registry: Arc<DocumentRegistry>,
    vectors: Arc<dyn VectorIndex>,
    lexical: Arc<dyn LexicalIndex>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

struct MergedHit {
    chunk: crate::models::Chunk,
    document: IndexDocument,
    version: u64,
    dense_score: f64,
    lexical_score: f64,
}

impl HybridRetriever {
    pub fn new(
        registry: Arc<DocumentRegistry>,
        vectors: Arc<dyn VectorIndex>,
        lexical: Arc<dyn LexicalIndex>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            registry,
            vectors,
            lexical,
            embedder,
            config,
        }
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<RetrievalResult>, SearchError> {
        if query.text.trim().is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }

        let query_vector = self
            .embedder
            .embed_query(&query.text)
            .await
            .map_err(|error| SearchError::Request(error.to_string()))?;

        let candidate_limit = self.config.candidate_limit.max(query.top_k);
        let (dense_hits, lexical_hits) = tokio::try_join!(
            self.vectors
                .search_dense(&query_vector, &query.filters, candidate_limit),
            self.lexical
                .search_lexical(&query.text, &query.filters, candidate_limit),
        )?;

        let mut merged: HashMap<String, MergedHit> = HashMap::new();
        fold_path(&mut merged, dense_hits, Signal::Dense);
        fold_path(&mut merged, lexical_hits, Signal::Lexical);

        let mut results: Vec<(MergedHit, Option<DateTime<Utc>>)> = merged
            .into_values()
            .filter(|hit| self.is_current(hit))
            .map(|hit| {
                let updated_at = self
                    .registry
                    .get(hit.document.document_id)
                    .map(|record| record.updated_at);
                (hit, updated_at)
            })
            .collect();

        let dense_weight = self.config.dense_weight;
        let lexical_weight = self.config.lexical_weight;
        let combined = |hit: &MergedHit| {
            dense_weight * hit.dense_score + lexical_weight * hit.lexical_score
        };

        // Ties break on most recent document update, then chunk ordinal,
        // then chunk id, so rankings are reproducible.
        results.sort_by(|(a, a_updated), (b, b_updated)| {
            combined(b)
                .total_cmp(&combined(a))
                .then_with(|| b_updated.cmp(a_updated))
                .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
                .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
        });
        results.truncate(query.top_k);

        Ok(results
            .into_iter()
            .enumerate()
            .map(|(position, (hit, _))| {
                let combined_score = combined(&hit);
                RetrievalResult {
                    chunk: hit.chunk,
                    document: hit.document,
                    version: hit.version,
                    dense_score: hit.dense_score,
                    lexical_score: hit.lexical_score,
                    combined_score,
                    rank: position + 1,
                }
            })
            .collect())
    }

    pub async fn cite(&self, query: &SearchQuery) -> Result<Vec<Citation>, SearchError> {
        let results = self.search(query).await?;
        Ok(results.iter().map(Citation::from_result).collect())
    }

    /// The transactional status check: a hit survives only if the
    /// registry still publishes exactly this chunk-set version and the
    /// document is not soft-deleted. Documents this process never
    /// registered pass through, the index being the only authority left.
    fn is_current(&self, hit: &MergedHit) -> bool {
        match self.registry.get(hit.document.document_id) {
            Some(record) => !record.deleted && record.published_version == Some(hit.version),
            None => true,
        }
    }
}

enum Signal {
    Dense,
    Lexical,
}

fn fold_path(merged: &mut HashMap<String, MergedHit>, hits: Vec<ScoredChunk>, signal: Signal) {
    for hit in hits {
        let entry = merged
            .entry(hit.chunk.chunk_id.clone())
            .or_insert_with(|| MergedHit {
                chunk: hit.chunk,
                document: hit.document,
                version: hit.version,
                dense_score: 0.0,
                lexical_score: 0.0,
            });
        match signal {
            Signal::Dense => entry.dense_score = entry.dense_score.max(hit.score),
            Signal::Lexical => entry.lexical_score = entry.lexical_score.max(hit.score),
        }
    }
}
