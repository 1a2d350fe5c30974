//! In-process document registry: the single source of truth for document
//! status, run versioning, and chunk-set visibility.
//!
//! Every ingestion attempt gets a monotonically increasing run version.
//! A run may only advance the document whose `active_run` it still owns;
//! once a newer arrival starts, the older run's transitions fail and its
//! output is discarded. Publishing at `ready` records the run version as
//! the document's published chunk-set version, which the retriever checks
//! per hit so readers never observe a superseded or half-replaced set.

use crate::models::{DocumentFormat, DocumentRecord, PageRecord, ProcessingStatus};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub document_id: Uuid,
    pub case_id: Uuid,
    pub filename: String,
    pub storage_ref: String,
    pub format: DocumentFormat,
    pub byte_size: u64,
    pub content_hash: String,
    pub tags: Vec<String>,
}

/// Handle a pipeline run uses to prove it still owns the document.
#[derive(Debug, Clone, Copy)]
pub struct RunToken {
    pub document_id: Uuid,
    pub version: u64,
}

#[derive(Debug)]
pub enum ArrivalDisposition {
    /// First sighting of this document id.
    New(RunToken),
    /// Known document with changed content (or a previous failure);
    /// re-ingestion starts and supersedes any in-flight run.
    Reingest(RunToken),
    /// Same content hash while the document is already `ready`.
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct PublishSummary {
    pub pages: Vec<PageRecord>,
    pub is_ocr: bool,
    pub embedding_model: String,
    pub embedding_dims: usize,
}

#[derive(Default)]
pub struct DocumentRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    documents: HashMap<Uuid, DocumentRecord>,
    next_run: u64,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_arrival(&self, arrival: NewDocument) -> ArrivalDisposition {
        let mut inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Utc::now();

        if let Some(existing) = inner.documents.get(&arrival.document_id) {
            if !existing.deleted
                && existing.status == ProcessingStatus::Ready
                && existing.content_hash == arrival.content_hash
            {
                return ArrivalDisposition::Duplicate;
            }
        }

        let version = inner.next_run;
        inner.next_run += 1;
        let known = inner.documents.contains_key(&arrival.document_id);

        let record = inner
            .documents
            .entry(arrival.document_id)
            .and_modify(|record| {
                record.filename = arrival.filename.clone();
                record.storage_ref = arrival.storage_ref.clone();
                record.format = arrival.format;
                record.byte_size = arrival.byte_size;
                record.content_hash = arrival.content_hash.clone();
                record.tags = arrival.tags.clone();
                record.deleted = false;
            })
            .or_insert_with(|| DocumentRecord {
                document_id: arrival.document_id,
                case_id: arrival.case_id,
                filename: arrival.filename.clone(),
                storage_ref: arrival.storage_ref.clone(),
                format: arrival.format,
                byte_size: arrival.byte_size,
                content_hash: arrival.content_hash.clone(),
                tags: arrival.tags.clone(),
                page_count: None,
                pages: Vec::new(),
                is_ocr: false,
                status: ProcessingStatus::Pending,
                failure_reason: None,
                embedding_model: None,
                embedding_dims: None,
                deleted: false,
                published_version: None,
                active_run: None,
                created_at: now,
                updated_at: now,
            });

        record.status = ProcessingStatus::Pending;
        record.failure_reason = None;
        record.active_run = Some(version);
        record.updated_at = now;

        let token = RunToken {
            document_id: arrival.document_id,
            version,
        };
        if known {
            ArrivalDisposition::Reingest(token)
        } else {
            ArrivalDisposition::New(token)
        }
    }

    /// Advance the state machine. Returns false when the run has been
    /// superseded or the document was deleted; the caller must then
    /// discard all work.
    pub fn try_transition(&self, token: RunToken, status: ProcessingStatus) -> bool {
        let mut inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        match inner.documents.get_mut(&token.document_id) {
            Some(record) if record.active_run == Some(token.version) && !record.deleted => {
                record.status = status;
                record.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Withdraw the currently published chunk set. Called when a
    /// re-ingestion run enters `embedding`, so stale content stops being
    /// served before the new set lands.
    pub fn unpublish(&self, token: RunToken) -> bool {
        let mut inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        match inner.documents.get_mut(&token.document_id) {
            Some(record) if record.active_run == Some(token.version) && !record.deleted => {
                record.published_version = None;
                record.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Atomically flip the document to `ready` and expose this run's chunk
    /// set. Last writer (newest run) wins; a superseded run gets false.
    pub fn publish(&self, token: RunToken, summary: PublishSummary) -> bool {
        let mut inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        match inner.documents.get_mut(&token.document_id) {
            Some(record) if record.active_run == Some(token.version) && !record.deleted => {
                record.status = ProcessingStatus::Ready;
                record.page_count = Some(summary.pages.len() as u32);
                record.pages = summary.pages;
                record.is_ocr = summary.is_ocr;
                record.embedding_model = Some(summary.embedding_model);
                record.embedding_dims = Some(summary.embedding_dims);
                record.published_version = Some(token.version);
                record.active_run = None;
                record.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    pub fn mark_failed(&self, token: RunToken, reason: impl Into<String>) -> bool {
        let mut inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        match inner.documents.get_mut(&token.document_id) {
            Some(record) if record.active_run == Some(token.version) => {
                record.status = ProcessingStatus::Failed;
                record.failure_reason = Some(reason.into());
                record.active_run = None;
                record.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Soft delete: the document and its chunks stop being retrievable;
    /// purging stored bytes is the storage collaborator's policy.
    pub fn mark_deleted(&self, document_id: Uuid) -> bool {
        let mut inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        match inner.documents.get_mut(&document_id) {
            Some(record) => {
                record.deleted = true;
                record.published_version = None;
                record.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, document_id: Uuid) -> Option<DocumentRecord> {
        let inner = match self.inner.read() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.documents.get(&document_id).cloned()
    }

    pub fn find_by_hash(&self, content_hash: &str) -> Option<DocumentRecord> {
        let inner = match self.inner.read() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner
            .documents
            .values()
            .find(|record| record.content_hash == content_hash && !record.deleted)
            .cloned()
    }

    pub fn documents(&self) -> Vec<DocumentRecord> {
        let inner = match self.inner.read() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.documents.values().cloned().collect()
    }
}
