use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported or corrupt {format} file: {details}")]
    UnsupportedOrCorruptFile { format: String, details: String },

    #[error("document not registered: {0}")]
    UnknownDocument(uuid::Uuid),

    #[error("storage read failed for {storage_ref}: {details}")]
    StorageRead { storage_ref: String, details: String },

    #[error("ocr failed: {0}")]
    OcrFailed(String),

    #[error("ocr engine not configured")]
    OcrUnavailable,

    #[error("embedding backend error: {0}")]
    EmbeddingBackend(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("index write failed: {0}")]
    IndexWrite(#[from] SearchError),
}

impl IngestError {
    /// Whether the pipeline may retry this error with backoff. Everything
    /// else is fatal for the current run.
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Io(_)
            | IngestError::StorageRead { .. }
            | IngestError::EmbeddingBackend(_)
            | IngestError::Http(_) => true,
            IngestError::IndexWrite(inner) => inner.is_transient(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("embedding space mismatch: {details}")]
    SpaceMismatch { details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search request failed: {0}")]
    Request(String),
}

impl SearchError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SearchError::BackendResponse { .. } | SearchError::Http(_)
        )
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::IngestError;

    #[test]
    fn corrupt_file_is_fatal() {
        let error = IngestError::UnsupportedOrCorruptFile {
            format: "pdf".to_string(),
            details: "bad xref".to_string(),
        };
        assert!(!error.is_transient());
    }

    #[test]
    fn storage_read_is_transient() {
        let error = IngestError::StorageRead {
            storage_ref: "clients/a.pdf".to_string(),
            details: "timed out".to_string(),
        };
        assert!(error.is_transient());
    }

    #[test]
    fn space_mismatch_is_fatal_even_behind_index_write() {
        let error = IngestError::IndexWrite(super::SearchError::SpaceMismatch {
            details: "384 != 768".to_string(),
        });
        assert!(!error.is_transient());
    }
}
