pub mod canonicalize;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod models;
pub mod ocr;
pub mod pipeline;
pub mod registry;
pub mod retriever;
pub mod storage;
pub mod stores;
pub mod traits;

pub use canonicalize::{collapse_whitespace, CanonicalPage, Canonicalizer};
pub use chunking::{chunk_pages, estimate_tokens, make_chunk_id, CHARS_PER_TOKEN};
pub use config::{
    CanonicalizeConfig, ChunkingConfig, OcrConfig, OcrMode, OcrThresholds, PipelineConfig,
    RetrievalConfig, RetryPolicy,
};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{IngestError, Result, SearchError};
pub use extractor::{
    extractor_for, DocxTextExtractor, ExtractedDocument, PdfTextExtractor, RawPage,
    TextExtractor, XlsxTextExtractor,
};
pub use models::{
    Chunk, Citation, DocumentFormat, DocumentRecord, IndexDocument, IngestReceipt, PageRecord,
    ProcessingStatus, QueryFilters, RetrievalResult, ScoredChunk, SearchQuery, SourcePage,
};
pub use ocr::{needs_ocr, HttpOcrEngine, OcrDecision, OcrEngine, OcrPageText};
pub use pipeline::{digest_bytes, discover_case_files, IngestionPipeline};
pub use registry::{ArrivalDisposition, DocumentRegistry, NewDocument, PublishSummary, RunToken};
pub use retriever::HybridRetriever;
pub use storage::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use stores::{MemoryIndex, OpenSearchStore, QdrantStore};
pub use traits::{LexicalIndex, VectorIndex};
