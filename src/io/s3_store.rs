use async_trait::async_trait;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

use super::blob_store::validate_path;
use super::BlobStore;
use crate::error::StorageError;

/// Maximum keys accepted by a single DeleteObjects call.
const DELETE_BATCH: usize = 1000;

/// S3-backed implementation of BlobStore.
///
/// Objects are stored under an optional key prefix inside one bucket, so a
/// single bucket can be shared with other tenants.
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    prefix: String,
    identifier: String,
}

impl S3BlobStore {
    /// Create a store writing to `bucket`, with every key under `prefix`.
    pub fn new(client: Client, bucket: impl Into<String>, prefix: Option<&str>) -> Self {
        let bucket = bucket.into();
        let prefix = prefix
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .map(|p| format!("{}/", p))
            .unwrap_or_default();
        let identifier = format!("s3://{}/{}", bucket, prefix);

        Self {
            client,
            bucket,
            prefix,
            identifier,
        }
    }

    /// Get the bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn key(&self, path: &str) -> Result<String, StorageError> {
        validate_path(path)?;
        Ok(format!("{}{}", self.prefix, path))
    }

    fn not_found(&self, key: &str) -> StorageError {
        StorageError::NotFound(format!("s3://{}/{}", self.bucket, key))
    }

    /// Check connectivity by listing at most one key.
    pub async fn probe(&self) -> Result<(), StorageError> {
        self.client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&self.prefix)
            .max_keys(1)
            .send()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;
        Ok(())
    }
}

/// Decide whether a failed S3 call means the object is missing.
///
/// Checks the modeled error code, then the raw status, then the message.
fn is_missing(code: Option<&str>, status: Option<u16>, message: &str) -> bool {
    if matches!(code, Some("NoSuchKey") | Some("NotFound")) {
        return true;
    }
    if status == Some(404) {
        return true;
    }
    message.contains("NotFound") || message.contains("NoSuchKey") || message.contains("404")
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, path: &str, data: Bytes) -> Result<(), StorageError> {
        let key = self.key(path)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Bytes, StorageError> {
        let key = self.key(path)?;
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let missing = is_missing(
                    e.as_service_error().and_then(|se| se.code()),
                    e.raw_response().map(|r| r.status().as_u16()),
                    &e.to_string(),
                );
                if missing {
                    self.not_found(&key)
                } else {
                    StorageError::S3(e.to_string())
                }
            })?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?
            .into_bytes();

        Ok(data)
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let key = self.key(path)?;
        // S3 DeleteObject succeeds on missing keys
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let full_prefix = format!("{}{}", self.prefix, prefix);
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix);

            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let result = request
                .send()
                .await
                .map_err(|e| StorageError::S3(e.to_string()))?;

            keys.extend(
                result
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(str::to_string)),
            );

            if result.is_truncated() == Some(true) {
                continuation_token = result.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        for batch in keys.chunks(DELETE_BATCH) {
            let objects = batch
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StorageError::S3(e.to_string()))?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| StorageError::S3(e.to_string()))?;

            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| StorageError::S3(e.to_string()))?;
        }

        debug!(prefix = %full_prefix, removed = keys.len(), "Deleted S3 prefix");
        Ok(keys.len())
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let key = self.key(path)?;
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false)
                    || is_missing(
                        None,
                        e.raw_response().map(|r| r.status().as_u16()),
                        &e.to_string(),
                    );
                if missing {
                    Ok(false)
                } else {
                    Err(StorageError::S3(e.to_string()))
                }
            }
        }
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// Use a custom endpoint for S3-compatible services like MinIO:
/// ```ignore
/// let client = create_s3_client(Some("http://localhost:9000"), "us-east-1").await;
/// ```
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    // S3-compatible services generally need path-style addressing
    let s3_config = if endpoint_url.is_some() {
        aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build()
    } else {
        aws_sdk_s3::config::Builder::from(&sdk_config).build()
    };

    Client::from_conf(s3_config)
}
