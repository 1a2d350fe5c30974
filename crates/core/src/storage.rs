//! Blob storage boundary: the pipeline reads source bytes through a
//! single contract, so a NAS mount and an object store are
//! interchangeable.

use crate::error::IngestError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn read(&self, storage_ref: &str) -> Result<Vec<u8>, IngestError>;
}

/// Reads storage refs as paths relative to a mounted root.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn read(&self, storage_ref: &str) -> Result<Vec<u8>, IngestError> {
        let path = self.root.join(storage_ref);
        tokio::fs::read(&path)
            .await
            .map_err(|error| IngestError::StorageRead {
                storage_ref: storage_ref.to_string(),
                details: error.to_string(),
            })
    }
}

/// In-process blob store for tests and self-contained runs.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, storage_ref: impl Into<String>, bytes: Vec<u8>) {
        if let Ok(mut blobs) = self.blobs.write() {
            blobs.insert(storage_ref.into(), bytes);
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn read(&self, storage_ref: &str) -> Result<Vec<u8>, IngestError> {
        let blobs = self
            .blobs
            .read()
            .map_err(|_| IngestError::StorageRead {
                storage_ref: storage_ref.to_string(),
                details: "blob store lock poisoned".to_string(),
            })?;
        blobs
            .get(storage_ref)
            .cloned()
            .ok_or_else(|| IngestError::StorageRead {
                storage_ref: storage_ref.to_string(),
                details: "not found".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_store_reads_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("w2.pdf"), b"%PDF").unwrap();

        let store = FsBlobStore::new(dir.path());
        let bytes = store.read("w2.pdf").await.unwrap();
        assert_eq!(bytes, b"%PDF");
    }

    #[tokio::test]
    async fn missing_blob_is_a_storage_read_error() {
        let store = MemoryBlobStore::new();
        let error = store.read("missing").await.unwrap_err();
        assert!(matches!(error, IngestError::StorageRead { .. }));
        assert!(error.is_transient());
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryBlobStore::new();
        store.insert("a.docx", vec![1, 2, 3]);
        assert_eq!(store.read("a.docx").await.unwrap(), vec![1, 2, 3]);
    }
}
