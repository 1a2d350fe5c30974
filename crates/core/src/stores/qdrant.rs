//! Dense vector index over Qdrant HTTP.

use crate::error::SearchError;
use crate::models::{Chunk, IndexDocument, QueryFilters, ScoredChunk};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use uuid::Uuid;

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        }
    }

    /// Qdrant point ids must be integers or UUIDs; chunk ids are sha256
    /// hex, so the first 16 bytes become the point UUID.
    fn point_id(chunk_id: &str) -> String {
        let mut bytes = [0u8; 16];
        for (index, slot) in bytes.iter_mut().enumerate() {
            let hex = chunk_id.get(index * 2..index * 2 + 2).unwrap_or("00");
            *slot = u8::from_str_radix(hex, 16).unwrap_or(0);
        }
        Uuid::from_bytes(bytes).to_string()
    }

    async fn delete_document_points(&self, document_id: Uuid) -> Result<(), SearchError> {
        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/delete?wait=true",
                self.endpoint, self.collection
            ))
            .json(&json!({
                "filter": {
                    "must": [
                        {"key": "document_id", "match": {"value": document_id.to_string()}}
                    ]
                }
            }))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn ensure_space(&self, model_id: &str, dimensions: usize) -> Result<(), SearchError> {
        if dimensions != self.vector_size {
            return Err(SearchError::SpaceMismatch {
                details: format!(
                    "collection configured for {} dims, {model_id} produces {dimensions}",
                    self.vector_size
                ),
            });
        }

        let response = self
            .client
            .put(format!(
                "{}/collections/{}",
                self.endpoint, self.collection
            ))
            .json(&json!({
                "vectors": {"size": dimensions, "distance": "Cosine"}
            }))
            .send()
            .await?;

        // Conflict just means the collection already exists.
        if response.status().is_success()
            || response.status() == reqwest::StatusCode::CONFLICT
        {
            Ok(())
        } else {
            Err(SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            })
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

        self.delete_document_points(document.document_id).await?;

        let points = chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, embedding)| {
                if embedding.len() != self.vector_size {
                    return Err(SearchError::Request(format!(
                        "embedding dimension {} != {}",
                        embedding.len(),
                        self.vector_size
                    )));
                }

                let payload = json!({
                    "chunk_id": chunk.chunk_id,
                    "document_id": chunk.document_id.to_string(),
                    "case_id": document.case_id.to_string(),
                    "filename": document.filename,
                    "tags": document.tags,
                    "content": chunk.content,
                    "section_header": chunk.section_header,
                    "page_start": chunk.page_start,
                    "page_end": chunk.page_end,
                    "chunk_index": chunk.chunk_index,
                    "token_count": chunk.token_count,
                    "is_ocr": chunk.is_ocr,
                    "version": version,
                });

                Ok(json!({
                    "id": Self::point_id(&chunk.chunk_id),
                    "vector": embedding,
                    "payload": payload,
                }))
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!(
                "{}/collections/{}/points?wait=true",
                self.endpoint, self.collection
            ))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn remove_document(&self, document_id: Uuid) -> Result<(), SearchError> {
        self.delete_document_points(document_id).await
    }

    async fn search_dense(
        &self,
        query_vector: &[f32],
        filters: &QueryFilters,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, SearchError> {
        if query_vector.len() != self.vector_size {
            return Err(SearchError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }

        let mut body = json!({
            "vector": query_vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(filter) = build_filter(filters) {
            body["filter"] = filter;
        }

        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/search",
                self.endpoint, self.collection
            ))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::new();
        for hit in &hits {
            if let Some(scored) = parse_hit(hit) {
                result.push(scored);
            }
        }

        Ok(result)
    }
}

fn parse_hit(raw: &Value) -> Option<ScoredChunk> {
    let payload = raw.pointer("/payload")?;
    let document_id: Uuid = payload
        .pointer("/document_id")
        .and_then(Value::as_str)?
        .parse()
        .ok()?;
    let case_id: Uuid = payload
        .pointer("/case_id")
        .and_then(Value::as_str)?
        .parse()
        .ok()?;

    let tags = payload
        .pointer("/tags")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Some(ScoredChunk {
        chunk: Chunk {
            chunk_id: payload
                .pointer("/chunk_id")
                .and_then(Value::as_str)?
                .to_string(),
            document_id,
            chunk_index: payload.pointer("/chunk_index").and_then(Value::as_u64)?,
            content: payload
                .pointer("/content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            page_start: payload.pointer("/page_start").and_then(Value::as_u64)? as u32,
            page_end: payload.pointer("/page_end").and_then(Value::as_u64)? as u32,
            token_count: payload
                .pointer("/token_count")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize,
            is_ocr: payload
                .pointer("/is_ocr")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            section_header: payload
                .pointer("/section_header")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        document: IndexDocument {
            document_id,
            case_id,
            filename: payload
                .pointer("/filename")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            tags,
        },
        version: payload
            .pointer("/version")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        score: raw
            .pointer("/score")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .clamp(0.0, 1.0),
    })
}

fn build_filter(filters: &QueryFilters) -> Option<Value> {
    let mut must = Vec::new();

    if let Some(case_id) = &filters.case_id {
        must.push(json!({"key": "case_id", "match": {"value": case_id.to_string()}}));
    }
    if !filters.document_ids.is_empty() {
        let ids: Vec<String> = filters.document_ids.iter().map(Uuid::to_string).collect();
        must.push(json!({"key": "document_id", "match": {"any": ids}}));
    }
    if !filters.tags.is_empty() {
        must.push(json!({"key": "tags", "match": {"any": filters.tags}}));
    }

    if must.is_empty() {
        None
    } else {
        Some(json!({"must": must}))
    }
}
