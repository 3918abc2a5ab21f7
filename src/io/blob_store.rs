use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageError;

/// Trait for storing and retrieving whole blobs by path.
///
/// Slice and thumbnail files live behind this abstraction, so the catalog
/// and the ingestion pipeline never see where bytes physically land.
/// Paths are `/`-separated and relative (`slices/{work}/{chapter}/000.avif`).
/// Implementations must be thread-safe.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `data` at `path`, replacing any existing blob.
    async fn put(&self, path: &str, data: Bytes) -> Result<(), StorageError>;

    /// Read the full blob at `path`.
    ///
    /// Returns `StorageError::NotFound` if nothing is stored there.
    async fn get(&self, path: &str) -> Result<Bytes, StorageError>;

    /// Remove the blob at `path`. Deleting a missing blob is not an error.
    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Remove every blob whose path starts with `prefix`.
    ///
    /// Returns the number of blobs removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError>;

    /// Check whether a blob exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Human-readable identifier for logging (`s3://bucket`, `file:///srv/media`).
    fn identifier(&self) -> &str;
}

/// Reject paths that could escape a store root.
pub(crate) fn validate_path(path: &str) -> Result<(), StorageError> {
    if path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.split('/').any(|segment| segment == ".." || segment == ".")
    {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path_accepts_relative() {
        assert!(validate_path("slices/one-piece/1/000.avif").is_ok());
        assert!(validate_path("thumb.avif").is_ok());
    }

    #[test]
    fn test_validate_path_rejects_escapes() {
        assert!(validate_path("").is_err());
        assert!(validate_path("/etc/passwd").is_err());
        assert!(validate_path("slices/../../secret").is_err());
        assert!(validate_path("slices/./x").is_err());
        assert!(validate_path("slices\\x").is_err());
    }
}
