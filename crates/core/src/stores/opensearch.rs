//! Lexical index over OpenSearch HTTP.

use crate::error::SearchError;
use crate::models::{Chunk, IndexDocument, QueryFilters, ScoredChunk};
use crate::traits::LexicalIndex;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

pub struct OpenSearchStore {
    client: Client,
    endpoint: String,
    index_name: String,
}

impl OpenSearchStore {
    pub fn new(endpoint: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            index_name: index_name.into(),
        }
    }

    pub async fn ensure_index(&self) -> Result<(), SearchError> {
        let response = self
            .client
            .head(format!("{}/{}", self.endpoint, self.index_name))
            .send()
            .await?;

        if response.status() == StatusCode::OK {
            return Ok(());
        }

        if !response.status().is_client_error() {
            return Err(SearchError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .client
            .put(format!("{}/{}", self.endpoint, self.index_name))
            .json(&json!({
                "settings": {
                    "number_of_shards": 1,
                    "number_of_replicas": 0
                },
                "mappings": {
                    "properties": {
                        "content": {"type": "text"},
                        "section_header": {"type": "text"},
                        "document_id": {"type": "keyword"},
                        "case_id": {"type": "keyword"},
                        "filename": {"type": "keyword"},
                        "tags": {"type": "keyword"},
                        "page_start": {"type": "integer"},
                        "page_end": {"type": "integer"},
                        "chunk_index": {"type": "long"},
                        "token_count": {"type": "integer"},
                        "is_ocr": {"type": "boolean"},
                        "version": {"type": "long"}
                    }
                }
            }))
            .send()
            .await?;

        if response.status().is_server_error() || response.status().is_client_error() {
            return Err(SearchError::Request(format!(
                "opensearch index setup failed with {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn delete_document_chunks(&self, document_id: Uuid) -> Result<(), SearchError> {
        let response = self
            .client
            .post(format!(
                "{}/{}/_delete_by_query?refresh=true",
                self.endpoint, self.index_name
            ))
            .json(&json!({
                "query": {"term": {"document_id": document_id.to_string()}}
            }))
            .send()
            .await?;

        // A missing index simply means there is nothing to delete yet.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LexicalIndex for OpenSearchStore {
    async fn upsert_chunks(
        &self,
        document: &IndexDocument,
        version: u64,
        chunks: &[Chunk],
    ) -> Result<(), SearchError> {
        self.ensure_index().await?;
        self.delete_document_chunks(document.document_id).await?;

        let mut operations = Vec::new();
        for chunk in chunks {
            operations.push(json!({
                "index": {
                    "_index": self.index_name,
                    "_id": chunk.chunk_id,
                }
            }));
            operations.push(json!({
                "content": chunk.content,
                "section_header": chunk.section_header,
                "document_id": chunk.document_id.to_string(),
                "case_id": document.case_id.to_string(),
                "filename": document.filename,
                "tags": document.tags,
                "page_start": chunk.page_start,
                "page_end": chunk.page_end,
                "chunk_index": chunk.chunk_index,
                "token_count": chunk.token_count,
                "is_ocr": chunk.is_ocr,
                "version": version,
            }));
        }

        if operations.is_empty() {
            return Ok(());
        }

        let payload: String = operations
            .into_iter()
            .map(|value| serde_json::to_string(&value))
            .collect::<Result<Vec<_>, serde_json::Error>>()?
            .join("\n")
            + "\n";

        let response = self
            .client
            .post(format!("{}/_bulk?refresh=true", self.endpoint))
            .header("Content-Type", "application/x-ndjson")
            .body(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }
        Ok(())
    }

    async fn remove_document(&self, document_id: Uuid) -> Result<(), SearchError> {
        self.delete_document_chunks(document_id).await
    }

    async fn search_lexical(
        &self,
        query_text: &str,
        filters: &QueryFilters,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, SearchError> {
        let body = json!({
            "size": limit,
            "query": {
                "bool": {
                    "must": [
                        {
                            "multi_match": {
                                "query": query_text,
                                "fields": ["content", "section_header"]
                            }
                        }
                    ],
                    "filter": build_filters(filters)
                }
            }
        });

        let response = self
            .client
            .post(format!("{}/{}/_search", self.endpoint, self.index_name))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let response_json: Value = response.json().await?;
        let hits = response_json
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::new();
        for raw in &hits {
            if let Some(hit) = parse_hit(raw) {
                result.push(hit);
            }
        }

        // BM25 scores are unbounded; normalize within the result set so
        // the hybrid merge sees [0,1].
        if let Some(best) = result
            .iter()
            .map(|hit| hit.score)
            .max_by(|a, b| a.total_cmp(b))
        {
            if best > 0.0 {
                for hit in &mut result {
                    hit.score /= best;
                }
            }
        }

        Ok(result)
    }
}

fn parse_hit(raw: &Value) -> Option<ScoredChunk> {
    let source = raw.pointer("/_source")?;
    let chunk_id = raw.pointer("/_id").and_then(Value::as_str)?.to_string();
    let document_id: Uuid = source
        .pointer("/document_id")
        .and_then(Value::as_str)?
        .parse()
        .ok()?;
    let case_id: Uuid = source
        .pointer("/case_id")
        .and_then(Value::as_str)?
        .parse()
        .ok()?;

    let tags = source
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
            chunk_id,
            document_id,
            chunk_index: source.pointer("/chunk_index").and_then(Value::as_u64)?,
            content: source
                .pointer("/content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            page_start: source.pointer("/page_start").and_then(Value::as_u64)? as u32,
            page_end: source.pointer("/page_end").and_then(Value::as_u64)? as u32,
            token_count: source
                .pointer("/token_count")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize,
            is_ocr: source
                .pointer("/is_ocr")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            section_header: source
                .pointer("/section_header")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        document: IndexDocument {
            document_id,
            case_id,
            filename: source
                .pointer("/filename")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            tags,
        },
        version: source
            .pointer("/version")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        score: raw.pointer("/_score").and_then(Value::as_f64).unwrap_or(0.0),
    })
}

fn build_filters(filters: &QueryFilters) -> Vec<Value> {
    let mut predicates = Vec::new();

    if let Some(case_id) = &filters.case_id {
        predicates.push(json!({"term": {"case_id": case_id.to_string()}}));
    }
    if !filters.document_ids.is_empty() {
        let ids: Vec<String> = filters
            .document_ids
            .iter()
            .map(Uuid::to_string)
            .collect();
        predicates.push(json!({"terms": {"document_id": ids}}));
    }
    if !filters.tags.is_empty() {
        predicates.push(json!({"terms": {"tags": filters.tags}}));
    }

    predicates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_become_term_predicates() {
        let case_id = Uuid::new_v4();
        let document_id = Uuid::new_v4();
        let filters = QueryFilters {
            case_id: Some(case_id),
            document_ids: vec![document_id],
            tags: vec!["W2".to_string()],
        };

        let predicates = build_filters(&filters);
        assert_eq!(predicates.len(), 3);
        assert_eq!(
            predicates[0].pointer("/term/case_id").and_then(Value::as_str),
            Some(case_id.to_string().as_str())
        );
    }

    #[test]
    fn hit_parsing_round_trips_chunk_fields() {
        let document_id = Uuid::new_v4();
        let case_id = Uuid::new_v4();
        let raw = json!({
            "_id": "abc123",
            "_score": 7.5,
            "_source": {
                "content": "wages reported",
                "document_id": document_id.to_string(),
                "case_id": case_id.to_string(),
                "filename": "w2.pdf",
                "tags": ["W2"],
                "page_start": 1,
                "page_end": 2,
                "chunk_index": 4,
                "token_count": 120,
                "is_ocr": true,
                "version": 9
            }
        });

        let hit = parse_hit(&raw).unwrap();
        assert_eq!(hit.chunk.chunk_id, "abc123");
        assert_eq!(hit.chunk.page_end, 2);
        assert_eq!(hit.chunk.chunk_index, 4);
        assert!(hit.chunk.is_ocr);
        assert_eq!(hit.document.filename, "w2.pdf");
        assert_eq!(hit.version, 9);
        assert_eq!(hit.score, 7.5);
    }

    #[test]
    fn malformed_hits_are_dropped() {
        assert!(parse_hit(&json!({"_id": "x"})).is_none());
    }
}
