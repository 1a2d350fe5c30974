//! Embedding seam: batched text-to-vector mapping.
//!
//! Embedders are deterministic for a given model version; the model id
//! and dimensionality are recorded with the index so a model change is
//! detected instead of silently mixing vector spaces.

use crate::error::IngestError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identifier of the model version producing these vectors.
    fn model_id(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Prefix some models expect on query text (not on document text).
    fn query_prefix(&self) -> &str {
        ""
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, IngestError> {
        let prefixed = format!("{}{}", self.query_prefix(), text);
        let mut vectors = self.embed_batch(&[prefixed]).await?;
        vectors
            .pop()
            .ok_or_else(|| IngestError::EmbeddingBackend("empty embedding batch".to_string()))
    }
}

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;

/// Offline deterministic embedder: FNV-hashed character trigrams bucketed
/// into a fixed-dimension vector, L2-normalized.
#[derive(Debug, Clone)]
pub struct CharacterNgramEmbedder {
    dimensions: usize,
    model_id: String,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            model_id: format!("char-ngram-v1/{}", dimensions.max(1)),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Remote embedding service over HTTP. Transport failures and 5xx
/// responses are transient; a dimensionality disagreement is not.
pub struct HttpEmbedder {
    endpoint: Url,
    model: String,
    dimensions: usize,
    query_prefix: String,
    client: Client,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: &str,
        model: impl Into<String>,
        dimensions: usize,
        query_prefix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, IngestError> {
        let endpoint = Url::parse(endpoint)?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint,
            model: model.into(),
            dimensions,
            query_prefix: query_prefix.into(),
            client,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn query_prefix(&self) -> &str {
        &self.query_prefix
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let payload = EmbedRequest {
            model: &self.model,
            texts,
        };
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        let body: EmbedResponse = response.json().await?;
        if body.embeddings.len() != texts.len() {
            return Err(IngestError::EmbeddingBackend(format!(
                "service returned {} vectors for {} texts",
                body.embeddings.len(),
                texts.len()
            )));
        }
        for vector in &body.embeddings {
            if vector.len() != self.dimensions {
                return Err(IngestError::InvalidArgument(format!(
                    "embedding service produced {} dims, configured for {}",
                    vector.len(),
                    self.dimensions
                )));
            }
        }

        Ok(body.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedding_is_idempotent() {
        let embedder = CharacterNgramEmbedder::default();
        let texts = vec!["Wages reported in box 1 of the W-2".to_string()];
        let first = embedder.embed_batch(&texts).await.unwrap();
        let second = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn vectors_have_the_declared_dimensionality() {
        let embedder = CharacterNgramEmbedder::new(64);
        assert_eq!(embedder.dimensions(), 64);
        let vectors = embedder
            .embed_batch(&["interest income".to_string(), "dividends".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|vector| vector.len() == 64));
    }

    #[tokio::test]
    async fn vectors_are_normalized() {
        let embedder = CharacterNgramEmbedder::default();
        let vectors = embedder
            .embed_batch(&["estimated tax payment".to_string()])
            .await
            .unwrap();
        let magnitude: f32 = vectors[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn model_id_tracks_dimensions() {
        let embedder = CharacterNgramEmbedder::new(128);
        assert_eq!(embedder.model_id(), "char-ngram-v1/128");
    }

    #[tokio::test]
    async fn empty_text_embeds_to_the_zero_vector() {
        let embedder = CharacterNgramEmbedder::new(16);
        let vectors = embedder.embed_batch(&[String::new()]).await.unwrap();
        assert!(vectors[0].iter().all(|v| *v == 0.0));
    }
}
