use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::blob_store::validate_path;
use super::BlobStore;
use crate::error::StorageError;

/// In-memory BlobStore for development and tests.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    /// All stored paths in lexicographic order.
    pub async fn paths(&self) -> Vec<String> {
        self.blobs.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, data: Bytes) -> Result<(), StorageError> {
        validate_path(path)?;
        self.blobs.write().await.insert(path.to_string(), data);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Bytes, StorageError> {
        self.blobs
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("memory://{}", path)))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.blobs.write().await.remove(path);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let mut blobs = self.blobs.write().await;
        let before = blobs.len();
        blobs.retain(|path, _| !path.starts_with(prefix));
        Ok(before - blobs.len())
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.blobs.read().await.contains_key(path))
    }

    fn identifier(&self) -> &str {
        "memory://"
    }
}
