use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::debug;

use super::blob_store::validate_path;
use super::BlobStore;
use crate::error::StorageError;

/// Filesystem-backed implementation of BlobStore.
///
/// Blob paths map directly onto directories under `root`; parent
/// directories are created on write and pruned when a prefix is deleted.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    identifier: String,
}

impl LocalBlobStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let identifier = format!("file://{}", root.display());
        Self { root, identifier }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        validate_path(path)?;
        Ok(self.root.join(path))
    }
}

fn io_error(path: &Path, err: std::io::Error) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::NotFound(path.display().to_string())
    } else {
        StorageError::Io(format!("{}: {}", path.display(), err))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, path: &str, data: Bytes) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        fs::write(&full, &data)
            .await
            .map_err(|e| io_error(&full, e))
    }

    async fn get(&self, path: &str) -> Result<Bytes, StorageError> {
        let full = self.resolve(path)?;
        let data = fs::read(&full).await.map_err(|e| io_error(&full, e))?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&full, e)),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let dir = self.resolve(prefix.trim_end_matches('/'))?;
        if !prefix.ends_with('/') {
            // Only whole directories are removed by prefix
            return Err(StorageError::InvalidPath(prefix.to_string()));
        }

        let mut removed = 0;
        let mut pending = vec![dir.clone()];
        while let Some(current) = pending.pop() {
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(&current, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| io_error(&current, e))?
            {
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| io_error(&entry.path(), e))?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else {
                    removed += 1;
                }
            }
        }

        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(&dir, e)),
        }

        debug!(dir = %dir.display(), removed, "Deleted local prefix");
        Ok(removed)
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let full = self.resolve(path)?;
        fs::try_exists(&full)
            .await
            .map_err(|e| io_error(&full, e))
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
