use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Xlsx,
}

impl DocumentFormat {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" | "doc" => Some(Self::Docx),
            "xlsx" | "xls" => Some(Self::Xlsx),
            _ => None,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "application/pdf" => Some(Self::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            | "application/msword" => Some(Self::Docx),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "application/vnd.ms-excel" => Some(Self::Xlsx),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Xlsx => "xlsx",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stages of the per-document ingestion state machine. Transitions are
/// one-directional; `Failed` is reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Extracting,
    Ocr,
    Canonicalizing,
    Chunking,
    Embedding,
    Ready,
    Failed,
}

impl ProcessingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Ocr => "ocr",
            Self::Canonicalizing => "canonicalizing",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Registry view of one ingested file. Mutated only by the pipeline; the
/// status field is the single source of truth for whether the document's
/// chunks are safe to read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: Uuid,
    pub case_id: Uuid,
    pub filename: String,
    pub storage_ref: String,
    pub format: DocumentFormat,
    pub byte_size: u64,
    pub content_hash: String,
    pub tags: Vec<String>,
    pub page_count: Option<u32>,
    /// Per-page extraction accounting, recorded at publish and immutable
    /// while the document stays `ready`.
    pub pages: Vec<PageRecord>,
    pub is_ocr: bool,
    pub status: ProcessingStatus,
    pub failure_reason: Option<String>,
    pub embedding_model: Option<String>,
    pub embedding_dims: Option<usize>,
    pub deleted: bool,
    /// Version of the chunk set currently visible to retrieval, if any.
    pub published_version: Option<u64>,
    /// Version of the in-flight pipeline run, if any.
    pub active_run: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Extraction accounting for one page, kept after the run for auditing
/// which pages were OCR'd and how confidently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub page_number: u32,
    pub char_count: usize,
    pub ocr_applied: bool,
    pub ocr_confidence: Option<f32>,
}

/// A page's text as it moves through the pipeline between extraction/OCR
/// and canonicalization.
#[derive(Debug, Clone)]
pub struct SourcePage {
    pub page_number: u32,
    pub text: String,
    pub char_count: usize,
    pub ocr_applied: bool,
    pub ocr_confidence: Option<f32>,
}

/// A retrievable slice of a document's canonical text, anchored to the
/// page range that contributed its content. Immutable once created;
/// re-ingestion supersedes the whole set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: Uuid,
    pub chunk_index: u64,
    pub content: String,
    pub page_start: u32,
    pub page_end: u32,
    pub token_count: usize,
    pub is_ocr: bool,
    pub section_header: Option<String>,
}

/// Document metadata replicated into index payloads so both index paths
/// can filter and cite without a registry lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDocument {
    pub document_id: Uuid,
    pub case_id: Uuid,
    pub filename: String,
    pub tags: Vec<String>,
}

/// One hit from a single index path, before hybrid merging.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub document: IndexDocument,
    pub version: u64,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueryFilters {
    pub case_id: Option<Uuid>,
    pub document_ids: Vec<Uuid>,
    pub tags: Vec<String>,
}

impl QueryFilters {
    /// Index-side filter evaluation against the metadata stored with each
    /// chunk. Tag filters match on any overlap.
    pub fn matches(&self, document: &IndexDocument) -> bool {
        if let Some(case_id) = self.case_id {
            if document.case_id != case_id {
                return false;
            }
        }
        if !self.document_ids.is_empty() && !self.document_ids.contains(&document.document_id) {
            return false;
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|tag| document.tags.contains(tag)) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    pub top_k: usize,
    pub filters: QueryFilters,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            top_k,
            filters: QueryFilters::default(),
        }
    }
}

/// Per-query result; never persisted.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub document: IndexDocument,
    pub version: u64,
    pub dense_score: f64,
    pub lexical_score: f64,
    pub combined_score: f64,
    pub rank: usize,
}

pub const CITATION_SNIPPET_CHARS: usize = 500;

/// A retrieval result projected to document + page provenance for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: Uuid,
    pub document_filename: String,
    pub chunk_id: String,
    pub page_start: u32,
    pub page_end: u32,
    pub is_ocr: bool,
    pub snippet: String,
    pub relevance_score: f64,
    pub rank: usize,
}

impl Citation {
    pub fn from_result(result: &RetrievalResult) -> Self {
        let snippet: String = result
            .chunk
            .content
            .chars()
            .take(CITATION_SNIPPET_CHARS)
            .collect();
        Self {
            document_id: result.document.document_id,
            document_filename: result.document.filename.clone(),
            chunk_id: result.chunk.chunk_id.clone(),
            page_start: result.chunk.page_start,
            page_end: result.chunk.page_end,
            is_ocr: result.chunk.is_ocr,
            snippet,
            relevance_score: result.combined_score.clamp(0.0, 1.0),
            rank: result.rank,
        }
    }
}

/// What the pipeline reports back for one arrival notification. Stage
/// errors never escape as errors; they surface here as status + reason.
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub document_id: Uuid,
    pub status: ProcessingStatus,
    pub failure_reason: Option<String>,
    pub page_count: Option<u32>,
    pub chunk_count: usize,
    pub is_ocr: bool,
    /// True when a newer arrival for the same document won the race and
    /// this run's output was discarded.
    pub superseded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_detection_from_extension_and_mime() {
        assert_eq!(DocumentFormat::from_extension("PDF"), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::from_extension("docx"), Some(DocumentFormat::Docx));
        assert_eq!(DocumentFormat::from_extension("xlsx"), Some(DocumentFormat::Xlsx));
        assert_eq!(DocumentFormat::from_extension("png"), None);
        assert_eq!(
            DocumentFormat::from_mime("application/pdf"),
            Some(DocumentFormat::Pdf)
        );
    }

    #[test]
    fn filters_match_on_case_and_tag_overlap() {
        let document = IndexDocument {
            document_id: Uuid::new_v4(),
            case_id: Uuid::new_v4(),
            filename: "w2.pdf".to_string(),
            tags: vec!["W2".to_string()],
        };

        let mut filters = QueryFilters::default();
        assert!(filters.matches(&document));

        filters.case_id = Some(document.case_id);
        filters.tags = vec!["1099".to_string(), "W2".to_string()];
        assert!(filters.matches(&document));

        filters.tags = vec!["1099".to_string()];
        assert!(!filters.matches(&document));
    }

    #[test]
    fn citation_snippet_is_bounded() {
        let chunk = Chunk {
            chunk_id: "c".to_string(),
            document_id: Uuid::new_v4(),
            chunk_index: 0,
            content: "x".repeat(2_000),
            page_start: 1,
            page_end: 2,
            token_count: 500,
            is_ocr: true,
            section_header: None,
        };
        let result = RetrievalResult {
            document: IndexDocument {
                document_id: chunk.document_id,
                case_id: Uuid::new_v4(),
                filename: "notice.pdf".to_string(),
                tags: Vec::new(),
            },
            chunk,
            version: 1,
            dense_score: 0.9,
            lexical_score: 0.2,
            combined_score: 1.4,
            rank: 1,
        };

        let citation = Citation::from_result(&result);
        assert_eq!(citation.snippet.chars().count(), CITATION_SNIPPET_CHARS);
        assert_eq!(citation.relevance_score, 1.0);
        assert!(citation.is_ocr);
    }
}
