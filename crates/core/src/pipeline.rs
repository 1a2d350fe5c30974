//! Per-document ingestion orchestration.
//!
//! Each arrival drives one run of the state machine:
//! `pending → extracting → (ocr) → canonicalizing → chunking → embedding
//! → ready`, with `failed` reachable from every non-terminal state.
//! Transient failures retry with bounded exponential backoff; fatal ones
//! fail the document with a recorded reason. Chunks become queryable only
//! through the atomic publish at `ready`, and a newer run for the same
//! document supersedes an older in-flight one (last writer wins).

use crate::canonicalize::Canonicalizer;
use crate::chunking::chunk_pages;
use crate::config::{PipelineConfig, RetryPolicy};
use crate::error::IngestError;
use crate::extractor::{extractor_for, TextExtractor};
use crate::models::{
    DocumentFormat, IndexDocument, IngestReceipt, PageRecord, ProcessingStatus, SourcePage,
};
use crate::ocr::{needs_ocr, OcrEngine};
use crate::embeddings::Embedder;
use crate::registry::{
    ArrivalDisposition, DocumentRegistry, NewDocument, PublishSummary, RunToken,
};
use crate::storage::BlobStore;
use crate::traits::{LexicalIndex, VectorIndex};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

pub struct IngestionPipeline {
    registry: Arc<DocumentRegistry>,
    blobs: Arc<dyn BlobStore>,
    ocr: Arc<dyn OcrEngine>,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorIndex>,
    lexical: Arc<dyn LexicalIndex>,
    extractors: Vec<Box<dyn TextExtractor>>,
    canonicalizer: Canonicalizer,
    config: PipelineConfig,
}

enum RunOutcome {
    Published {
        page_count: u32,
        chunk_count: usize,
        is_ocr: bool,
    },
    Superseded,
}

impl IngestionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<DocumentRegistry>,
        blobs: Arc<dyn BlobStore>,
        ocr: Arc<dyn OcrEngine>,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorIndex>,
        lexical: Arc<dyn LexicalIndex>,
        config: PipelineConfig,
    ) -> Result<Self, IngestError> {
        config.chunking.validate()?;
        let canonicalizer = Canonicalizer::new(config.canonicalize.clone())?;
        Ok(Self {
            registry,
            blobs,
            ocr,
            embedder,
            vectors,
            lexical,
            extractors: vec![
                extractor_for(DocumentFormat::Pdf),
                extractor_for(DocumentFormat::Docx),
                extractor_for(DocumentFormat::Xlsx),
            ],
            canonicalizer,
            config,
        })
    }

    /// Replace the per-format extractors (tests and exotic deployments).
    pub fn with_extractors(mut self, extractors: Vec<Box<dyn TextExtractor>>) -> Self {
        self.extractors = extractors;
        self
    }

    pub fn registry(&self) -> &Arc<DocumentRegistry> {
        &self.registry
    }

    /// Arrival notification from the filesystem watcher. Never returns an
    /// error: stage failures surface only as document status + reason.
    pub async fn notify_arrived(&self, arrival: NewDocument) -> IngestReceipt {
        let document_id = arrival.document_id;
        match self.registry.record_arrival(arrival) {
            ArrivalDisposition::Duplicate => {
                info!(%document_id, "arrival matches ready document, skipping");
                self.receipt_for(document_id, false)
            }
            ArrivalDisposition::New(token) | ArrivalDisposition::Reingest(token) => {
                self.run(token).await
            }
        }
    }

    /// Deletion notification: soft delete, retrieval exclusion only.
    /// Stored bytes and index purging stay with the storage collaborator.
    pub fn notify_deleted(&self, document_id: Uuid) {
        if self.registry.mark_deleted(document_id) {
            info!(%document_id, "document soft-deleted, excluded from retrieval");
        } else {
            warn!(%document_id, "deletion notice for unknown document");
        }
    }

    async fn run(&self, token: RunToken) -> IngestReceipt {
        match self.execute(token).await {
            Ok(RunOutcome::Published {
                page_count,
                chunk_count,
                is_ocr,
            }) => IngestReceipt {
                document_id: token.document_id,
                status: ProcessingStatus::Ready,
                failure_reason: None,
                page_count: Some(page_count),
                chunk_count,
                is_ocr,
                superseded: false,
            },
            Ok(RunOutcome::Superseded) => {
                info!(document_id = %token.document_id, run = token.version, "run superseded, output discarded");
                self.receipt_for(token.document_id, true)
            }
            Err(ingest_error) => {
                error!(document_id = %token.document_id, error = %ingest_error, "ingestion failed");
                self.registry.mark_failed(token, ingest_error.to_string());
                self.receipt_for(token.document_id, false)
            }
        }
    }

    async fn execute(&self, token: RunToken) -> Result<RunOutcome, IngestError> {
        let document = self
            .registry
            .get(token.document_id)
            .ok_or(IngestError::UnknownDocument(token.document_id))?;

        info!(
            document_id = %token.document_id,
            filename = %document.filename,
            format = %document.format,
            run = token.version,
            "starting ingestion run"
        );

        if !self.registry.try_transition(token, ProcessingStatus::Extracting) {
            return Ok(RunOutcome::Superseded);
        }

        let blobs = &self.blobs;
        let storage_ref = document.storage_ref.as_str();
        let bytes = with_retries(&self.config.retry, "storage read", || async move {
            blobs.read(storage_ref).await
        })
        .await?;

        let extractor = self
            .extractors
            .iter()
            .find(|extractor| extractor.format() == document.format)
            .ok_or_else(|| {
                IngestError::InvalidArgument(format!(
                    "no extractor registered for format {}",
                    document.format
                ))
            })?;
        let extracted = extractor.extract(&bytes)?;

        let mut pages: Vec<SourcePage> = extracted
            .pages
            .iter()
            .map(|page| SourcePage {
                page_number: page.page_number,
                text: page.text.clone(),
                char_count: page.char_count,
                ocr_applied: false,
                ocr_confidence: None,
            })
            .collect();

        let decision = needs_ocr(&extracted.pages, extracted.total_bytes, &self.config.ocr);
        if decision.triggered() {
            if !self.registry.try_transition(token, ProcessingStatus::Ocr) {
                return Ok(RunOutcome::Superseded);
            }
            info!(
                document_id = %token.document_id,
                pages = ?decision.pages_to_ocr,
                reason = decision.reason.as_deref().unwrap_or(""),
                "running ocr fallback"
            );

            let ocr_engine = &self.ocr;
            let source = bytes.as_slice();
            let format = document.format;
            let dpi = self.config.ocr.dpi;
            for page_number in &decision.pages_to_ocr {
                let page = *page_number;
                let outcome = with_retries(&self.config.retry, "ocr", || async move {
                    ocr_engine.recognize_page(source, format, page, dpi).await
                })
                .await;

                let Some(page) = pages
                    .iter_mut()
                    .find(|page| page.page_number == *page_number)
                else {
                    continue;
                };

                match outcome {
                    Ok(recognized) => {
                        page.char_count = recognized.text.trim().chars().count();
                        page.text = recognized.text;
                        page.ocr_applied = true;
                        page.ocr_confidence = recognized.confidence;
                    }
                    // Engine unavailable even after retries: the whole run
                    // fails per the transient taxonomy.
                    Err(engine_error) if engine_error.is_transient() => return Err(engine_error),
                    // This page alone is unreadable: record it empty and
                    // low-confidence, keep the document searchable.
                    Err(page_error) => {
                        warn!(
                            page = *page_number,
                            error = %page_error,
                            "page ocr failed, recording empty low-confidence page"
                        );
                        page.text = String::new();
                        page.char_count = 0;
                        page.ocr_applied = true;
                        page.ocr_confidence = Some(0.0);
                    }
                }
            }
        }

        let is_ocr = pages.iter().any(|page| page.ocr_applied);

        if !self
            .registry
            .try_transition(token, ProcessingStatus::Canonicalizing)
        {
            return Ok(RunOutcome::Superseded);
        }
        let canonical = self.canonicalizer.canonicalize(&pages);

        if !self.registry.try_transition(token, ProcessingStatus::Chunking) {
            return Ok(RunOutcome::Superseded);
        }
        let chunks = chunk_pages(token.document_id, &canonical, &self.config.chunking)?;

        if !self.registry.try_transition(token, ProcessingStatus::Embedding) {
            return Ok(RunOutcome::Superseded);
        }
        // From here the prior chunk set must no longer be served.
        self.registry.unpublish(token);

        let vectors = &self.vectors;
        let model_id = self.embedder.model_id();
        let dimensions = self.embedder.dimensions();
        with_retries(&self.config.retry, "embedding space check", || async move {
            vectors
                .ensure_space(model_id, dimensions)
                .await
                .map_err(IngestError::from)
        })
        .await?;

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        let embedder = &self.embedder;
        let texts_ref = texts.as_slice();
        let embeddings = with_retries(&self.config.retry, "embedding", || async move {
            embedder.embed_batch(texts_ref).await
        })
        .await?;
        if embeddings.len() != chunks.len() {
            return Err(IngestError::EmbeddingBackend(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        // Narrow the window for a superseded run reaching shared indexes.
        match self.registry.get(token.document_id) {
            Some(record) if record.active_run == Some(token.version) => {}
            _ => return Ok(RunOutcome::Superseded),
        }

        let index_document = IndexDocument {
            document_id: token.document_id,
            case_id: document.case_id,
            filename: document.filename.clone(),
            tags: document.tags.clone(),
        };

        let lexical = &self.lexical;
        let index_document_ref = &index_document;
        let chunks_ref = chunks.as_slice();
        let embeddings_ref = embeddings.as_slice();
        let version = token.version;
        with_retries(&self.config.retry, "vector index write", || async move {
            vectors
                .upsert_chunks(index_document_ref, version, chunks_ref, embeddings_ref)
                .await
                .map_err(IngestError::from)
        })
        .await?;
        with_retries(&self.config.retry, "lexical index write", || async move {
            lexical
                .upsert_chunks(index_document_ref, version, chunks_ref)
                .await
                .map_err(IngestError::from)
        })
        .await?;

        let page_count = pages.len() as u32;
        let page_records: Vec<PageRecord> = pages
            .iter()
            .map(|page| PageRecord {
                page_number: page.page_number,
                char_count: page.char_count,
                ocr_applied: page.ocr_applied,
                ocr_confidence: page.ocr_confidence,
            })
            .collect();
        let published = self.registry.publish(
            token,
            PublishSummary {
                pages: page_records,
                is_ocr,
                embedding_model: self.embedder.model_id().to_string(),
                embedding_dims: self.embedder.dimensions(),
            },
        );
        if !published {
            return Ok(RunOutcome::Superseded);
        }

        info!(
            document_id = %token.document_id,
            page_count,
            chunk_count = chunks.len(),
            is_ocr,
            "document ready"
        );

        Ok(RunOutcome::Published {
            page_count,
            chunk_count: chunks.len(),
            is_ocr,
        })
    }

    fn receipt_for(&self, document_id: Uuid, superseded: bool) -> IngestReceipt {
        let record = self.registry.get(document_id);
        IngestReceipt {
            document_id,
            status: record
                .as_ref()
                .map(|record| record.status)
                .unwrap_or(ProcessingStatus::Failed),
            failure_reason: record.as_ref().and_then(|record| record.failure_reason.clone()),
            page_count: record.as_ref().and_then(|record| record.page_count),
            chunk_count: 0,
            is_ocr: record.map(|record| record.is_ocr).unwrap_or(false),
            superseded,
        }
    }
}

async fn with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, IngestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, IngestError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(transient) if transient.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %transient,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(final_error) => return Err(final_error),
        }
    }
}

/// Files under `folder` the pipeline can ingest, with their format tags,
/// in stable path order.
pub fn discover_case_files(folder: &Path) -> Vec<(PathBuf, DocumentFormat)> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let format = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(DocumentFormat::from_extension);
        if let Some(format) = format {
            files.push((entry.path().to_path_buf(), format));
        }
    }

    files.sort_unstable_by(|a, b| a.0.cmp(&b.0));
    files
}

/// Content hash used for arrival dedup and change detection.
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkingConfig, OcrConfig, OcrThresholds};
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::IngestError;
    use crate::extractor::{ExtractedDocument, RawPage};
    use crate::models::QueryFilters;
    use crate::ocr::OcrPageText;
    use crate::storage::MemoryBlobStore;
    use crate::stores::MemoryIndex;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Treats the blob as UTF-8 text, one page per form-feed separator.
    /// `CORRUPT` blobs fail extraction the way a broken PDF would.
    struct FakeTextExtractor {
        calls: Arc<AtomicUsize>,
    }

    impl TextExtractor for FakeTextExtractor {
        fn format(&self) -> DocumentFormat {
            DocumentFormat::Pdf
        }

        fn extract(&self, bytes: &[u8]) -> Result<ExtractedDocument, IngestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if bytes.starts_with(b"CORRUPT") {
                return Err(IngestError::UnsupportedOrCorruptFile {
                    format: "pdf".to_string(),
                    details: "unreadable xref table".to_string(),
                });
            }
            let text = String::from_utf8_lossy(bytes);
            let pages = text
                .split('\u{000c}')
                .enumerate()
                .map(|(index, page_text)| {
                    let page_text = page_text.to_string();
                    let char_count = page_text.trim().chars().count();
                    RawPage {
                        page_number: index as u32 + 1,
                        text: page_text,
                        char_count,
                    }
                })
                .collect();
            Ok(ExtractedDocument {
                pages,
                total_bytes: bytes.len() as u64,
            })
        }
    }

    struct FakeOcrEngine {
        calls: Arc<AtomicUsize>,
        fail_pages: Vec<u32>,
    }

    #[async_trait]
    impl OcrEngine for FakeOcrEngine {
        async fn recognize_page(
            &self,
            _source: &[u8],
            _format: DocumentFormat,
            page_number: u32,
            _dpi: u32,
        ) -> Result<OcrPageText, IngestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_pages.contains(&page_number) {
                return Err(IngestError::OcrFailed(format!(
                    "engine rejected page {page_number}"
                )));
            }
            Ok(OcrPageText {
                text: format!("recognized scan text for page {page_number} with wages detail"),
                confidence: Some(0.9),
            })
        }
    }

    struct FlakyBlobStore {
        inner: MemoryBlobStore,
        failures_remaining: AtomicUsize,
    }

    #[async_trait]
    impl BlobStore for FlakyBlobStore {
        async fn read(&self, storage_ref: &str) -> Result<Vec<u8>, IngestError> {
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(IngestError::StorageRead {
                    storage_ref: storage_ref.to_string(),
                    details: "simulated timeout".to_string(),
                });
            }
            self.inner.read(storage_ref).await
        }
    }

    struct Harness {
        pipeline: IngestionPipeline,
        blobs: Arc<MemoryBlobStore>,
        index: Arc<MemoryIndex>,
        extractor_calls: Arc<AtomicUsize>,
        ocr_calls: Arc<AtomicUsize>,
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            ocr: OcrConfig {
                thresholds: OcrThresholds {
                    min_chars_per_page: 50,
                    min_text_ratio: 0.001,
                },
                ..OcrConfig::default()
            },
            chunking: ChunkingConfig {
                target_min_tokens: 10,
                target_max_tokens: 20,
                overlap_tokens: 4,
                hard_cap_factor: 1.5,
            },
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            ..PipelineConfig::default()
        }
    }

    fn harness_with(blobs: Arc<dyn BlobStore>, memory: Arc<MemoryBlobStore>, ocr_fail_pages: Vec<u32>) -> Harness {
        let registry = Arc::new(DocumentRegistry::new());
        let index = Arc::new(MemoryIndex::new());
        let extractor_calls = Arc::new(AtomicUsize::new(0));
        let ocr_calls = Arc::new(AtomicUsize::new(0));

        let pipeline = IngestionPipeline::new(
            registry,
            blobs,
            Arc::new(FakeOcrEngine {
                calls: ocr_calls.clone(),
                fail_pages: ocr_fail_pages,
            }),
            Arc::new(CharacterNgramEmbedder::new(64)),
            index.clone(),
            index.clone(),
            test_config(),
        )
        .unwrap()
        .with_extractors(vec![Box::new(FakeTextExtractor {
            calls: extractor_calls.clone(),
        })]);

        Harness {
            pipeline,
            blobs: memory,
            index,
            extractor_calls,
            ocr_calls,
        }
    }

    fn harness() -> Harness {
        let blobs = Arc::new(MemoryBlobStore::new());
        harness_with(blobs.clone(), blobs, Vec::new())
    }

    fn arrival(document_id: Uuid, storage_ref: &str, bytes: &[u8]) -> NewDocument {
        NewDocument {
            document_id,
            case_id: Uuid::new_v4(),
            filename: "w2.pdf".to_string(),
            storage_ref: storage_ref.to_string(),
            format: DocumentFormat::Pdf,
            byte_size: bytes.len() as u64,
            content_hash: digest_bytes(bytes),
            tags: Vec::new(),
        }
    }

    fn clean_document_text() -> String {
        let paragraph = |tag: &str| {
            format!("{tag} wages salaries tips and other compensation reported on the return")
        };
        format!(
            "{}\n{}\u{000c}{}\n{}",
            paragraph("alpha"),
            paragraph("bravo"),
            paragraph("charlie"),
            paragraph("delta")
        )
    }

    #[tokio::test]
    async fn clean_document_reaches_ready_without_ocr() {
        let harness = harness();
        let bytes = clean_document_text().into_bytes();
        harness.blobs.insert("doc.pdf", bytes.clone());

        let receipt = harness
            .pipeline
            .notify_arrived(arrival(Uuid::new_v4(), "doc.pdf", &bytes))
            .await;

        assert_eq!(receipt.status, ProcessingStatus::Ready);
        assert_eq!(receipt.page_count, Some(2));
        assert!(receipt.chunk_count > 0);
        assert!(!receipt.is_ocr);
        assert_eq!(harness.ocr_calls.load(Ordering::SeqCst), 0);

        let hits = harness
            .index
            .search_lexical("wages", &QueryFilters::default(), 10)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|hit| !hit.chunk.is_ocr));
    }

    #[tokio::test]
    async fn corrupt_document_fails_without_retry() {
        let harness = harness();
        let bytes = b"CORRUPT bytes".to_vec();
        harness.blobs.insert("bad.pdf", bytes.clone());

        let receipt = harness
            .pipeline
            .notify_arrived(arrival(Uuid::new_v4(), "bad.pdf", &bytes))
            .await;

        assert_eq!(receipt.status, ProcessingStatus::Failed);
        assert!(receipt
            .failure_reason
            .as_deref()
            .unwrap_or("")
            .contains("unsupported or corrupt"));
        // Fatal errors are not retried.
        assert_eq!(harness.extractor_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn scanned_document_goes_through_ocr_and_flags_chunks() {
        let harness = harness();
        // No extractable text at all: avg chars/page is 0.
        let bytes = Vec::new();
        harness.blobs.insert("scan.pdf", bytes.clone());

        let receipt = harness
            .pipeline
            .notify_arrived(arrival(Uuid::new_v4(), "scan.pdf", &bytes))
            .await;

        assert_eq!(receipt.status, ProcessingStatus::Ready);
        assert!(receipt.is_ocr);
        assert_eq!(harness.ocr_calls.load(Ordering::SeqCst), 1);

        let hits = harness
            .index
            .search_lexical("recognized", &QueryFilters::default(), 10)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|hit| hit.chunk.is_ocr));
    }

    #[tokio::test]
    async fn single_page_ocr_failure_degrades_but_document_stays_searchable() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let harness = harness_with(blobs.clone(), blobs, vec![2]);
        // Two empty pages; page 2's OCR is rejected by the engine.
        let bytes = "\u{000c}".as_bytes().to_vec();
        harness.blobs.insert("scan.pdf", bytes.clone());
        let document_id = Uuid::new_v4();

        let receipt = harness
            .pipeline
            .notify_arrived(arrival(document_id, "scan.pdf", &bytes))
            .await;

        assert_eq!(receipt.status, ProcessingStatus::Ready);
        assert_eq!(receipt.page_count, Some(2));

        // The unreadable page is still part of the document's page range,
        // recorded empty with a low-confidence flag.
        let record = harness.pipeline.registry().get(document_id).unwrap();
        assert_eq!(record.pages.len(), 2);
        assert!(record.pages[1].ocr_applied);
        assert_eq!(record.pages[1].char_count, 0);
        assert_eq!(record.pages[1].ocr_confidence, Some(0.0));

        let hits = harness
            .index
            .search_lexical("recognized", &QueryFilters::default(), 10)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|hit| hit.chunk.page_start == 1));
    }

    #[tokio::test]
    async fn transient_storage_failures_are_retried_to_success() {
        let memory = Arc::new(MemoryBlobStore::new());
        let bytes = clean_document_text().into_bytes();
        memory.insert("doc.pdf", bytes.clone());
        let flaky = Arc::new(FlakyBlobStore {
            inner: MemoryBlobStore::new(),
            failures_remaining: AtomicUsize::new(2),
        });
        flaky.inner.insert("doc.pdf", bytes.clone());

        let harness = harness_with(flaky, memory, Vec::new());
        let receipt = harness
            .pipeline
            .notify_arrived(arrival(Uuid::new_v4(), "doc.pdf", &bytes))
            .await;

        assert_eq!(receipt.status, ProcessingStatus::Ready);
    }

    #[tokio::test]
    async fn exhausted_transient_retries_become_fatal() {
        let memory = Arc::new(MemoryBlobStore::new());
        let bytes = clean_document_text().into_bytes();
        let flaky = Arc::new(FlakyBlobStore {
            inner: MemoryBlobStore::new(),
            failures_remaining: AtomicUsize::new(10),
        });

        let harness = harness_with(flaky, memory, Vec::new());
        let receipt = harness
            .pipeline
            .notify_arrived(arrival(Uuid::new_v4(), "doc.pdf", &bytes))
            .await;

        assert_eq!(receipt.status, ProcessingStatus::Failed);
        assert!(receipt
            .failure_reason
            .as_deref()
            .unwrap_or("")
            .contains("storage read failed"));
    }

    #[tokio::test]
    async fn duplicate_arrival_is_skipped() {
        let harness = harness();
        let bytes = clean_document_text().into_bytes();
        harness.blobs.insert("doc.pdf", bytes.clone());
        let document_id = Uuid::new_v4();

        let first = harness
            .pipeline
            .notify_arrived(arrival(document_id, "doc.pdf", &bytes))
            .await;
        assert_eq!(first.status, ProcessingStatus::Ready);

        let second = harness
            .pipeline
            .notify_arrived(arrival(document_id, "doc.pdf", &bytes))
            .await;
        assert_eq!(second.status, ProcessingStatus::Ready);
        assert_eq!(harness.extractor_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reingestion_supersedes_the_previous_chunk_set() {
        let harness = harness();
        let document_id = Uuid::new_v4();

        let old_bytes =
            "legacy alpha content about dividends and interest income reported".as_bytes().to_vec();
        harness.blobs.insert("doc.pdf", old_bytes.clone());
        let first = harness
            .pipeline
            .notify_arrived(arrival(document_id, "doc.pdf", &old_bytes))
            .await;
        assert_eq!(first.status, ProcessingStatus::Ready);

        let new_bytes =
            "revised bravo content about charitable deductions claimed this year".as_bytes().to_vec();
        harness.blobs.insert("doc.pdf", new_bytes.clone());
        let second = harness
            .pipeline
            .notify_arrived(arrival(document_id, "doc.pdf", &new_bytes))
            .await;
        assert_eq!(second.status, ProcessingStatus::Ready);

        // Old content is gone from the index; the set was replaced, not merged.
        let stale = harness
            .index
            .search_lexical("dividends", &QueryFilters::default(), 10)
            .await
            .unwrap();
        assert!(stale.is_empty());

        let fresh = harness
            .index
            .search_lexical("charitable", &QueryFilters::default(), 10)
            .await
            .unwrap();
        assert!(!fresh.is_empty());

        let record = harness.pipeline.registry().get(document_id).unwrap();
        assert_eq!(record.published_version, fresh[0].version.into());
    }

    #[tokio::test]
    async fn deleted_document_is_reported() {
        let harness = harness();
        let bytes = clean_document_text().into_bytes();
        harness.blobs.insert("doc.pdf", bytes.clone());
        let document_id = Uuid::new_v4();

        harness
            .pipeline
            .notify_arrived(arrival(document_id, "doc.pdf", &bytes))
            .await;
        harness.pipeline.notify_deleted(document_id);

        let record = harness.pipeline.registry().get(document_id).unwrap();
        assert!(record.deleted);
        assert_eq!(record.published_version, None);
    }

    #[tokio::test]
    async fn documents_ingest_concurrently_without_interference() {
        let harness = harness();
        let a_bytes = clean_document_text().into_bytes();
        let b_bytes = "other filing content about estimated payments made quarterly this year"
            .as_bytes()
            .to_vec();
        harness.blobs.insert("a.pdf", a_bytes.clone());
        harness.blobs.insert("b.pdf", b_bytes.clone());

        let (first, second) = tokio::join!(
            harness
                .pipeline
                .notify_arrived(arrival(Uuid::new_v4(), "a.pdf", &a_bytes)),
            harness
                .pipeline
                .notify_arrived(arrival(Uuid::new_v4(), "b.pdf", &b_bytes)),
        );

        assert_eq!(first.status, ProcessingStatus::Ready);
        assert_eq!(second.status, ProcessingStatus::Ready);

        let hits = harness
            .index
            .search_lexical("quarterly", &QueryFilters::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn discovery_filters_unsupported_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("b.docx"), b"x").unwrap();
        std::fs::write(dir.path().join("c.tmp"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/d.xlsx"), b"x").unwrap();

        let files = discover_case_files(dir.path());
        assert_eq!(files.len(), 3);
        assert!(files.iter().any(|(_, format)| *format == DocumentFormat::Xlsx));
    }

    #[test]
    fn digest_is_reproducible_and_prefixed() {
        let first = digest_bytes(b"abc");
        let second = digest_bytes(b"abc");
        assert_eq!(first, second);
        assert!(first.starts_with("sha256:"));
        assert_ne!(first, digest_bytes(b"abd"));
    }
}
