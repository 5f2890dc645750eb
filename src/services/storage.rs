use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::collections::HashMap;
use std::time::Duration;

pub const STORAGE_URI_SCHEME: &str = "s3://";

/// Durable storage for job inputs and outputs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` at `destination` (bucket-relative) and return its storage URI.
    async fn store(&self, data: &[u8], destination: &str, content_type: &str) -> Result<String, StorageError>;

    /// Time-limited HTTPS link that downloads the object as `filename`.
    async fn signed_download_url(
        &self,
        storage_uri: &str,
        ttl: Duration,
        filename: &str,
    ) -> Result<String, StorageError>;

    /// Canonical storage URI for a bucket-relative destination.
    fn storage_uri(&self, destination: &str) -> String;

    fn is_storage_uri(&self, value: &str) -> bool {
        value.starts_with(STORAGE_URI_SCHEME)
    }
}

/// Split `s3://bucket/path` into `(bucket, path)`.
pub fn parse_storage_uri(uri: &str) -> Result<(&str, &str), StorageError> {
    let rest = uri
        .strip_prefix(STORAGE_URI_SCHEME)
        .ok_or_else(|| StorageError::InvalidUri(uri.to_string()))?;
    match rest.split_once('/') {
        Some((bucket, path)) if !bucket.is_empty() && !path.is_empty() => Ok((bucket, path)),
        _ => Err(StorageError::InvalidUri(uri.to_string())),
    }
}

/// `Content-Disposition` value for a download named `filename`.
pub fn attachment_disposition(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .filter(|c| !matches!(c, '"' | '\\' | '\r' | '\n'))
        .collect();
    format!("attachment; filename=\"{cleaned}\"")
}

/// Client for S3-compatible object storage (AWS, R2, MinIO).
pub struct S3BlobStore {
    bucket: Box<Bucket>,
    bucket_name: String,
    timeout: Duration,
}

impl S3BlobStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self {
            bucket,
            bucket_name: bucket_name.to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn store(&self, data: &[u8], destination: &str, content_type: &str) -> Result<String, StorageError> {
        tokio::time::timeout(
            self.timeout,
            self.bucket
                .put_object_with_content_type(destination, data, content_type),
        )
        .await
        .map_err(|_| StorageError::Timeout(self.timeout))?
        .map_err(StorageError::S3)?;
        Ok(self.storage_uri(destination))
    }

    async fn signed_download_url(
        &self,
        storage_uri: &str,
        ttl: Duration,
        filename: &str,
    ) -> Result<String, StorageError> {
        let (bucket, path) = parse_storage_uri(storage_uri)?;
        if bucket != self.bucket_name {
            return Err(StorageError::InvalidUri(storage_uri.to_string()));
        }

        let mut queries = HashMap::new();
        queries.insert(
            "response-content-disposition".to_string(),
            attachment_disposition(filename),
        );
        let expiry = u32::try_from(ttl.as_secs().max(1)).unwrap_or(u32::MAX);

        tokio::time::timeout(self.timeout, self.bucket.presign_get(path, expiry, Some(queries)))
            .await
            .map_err(|_| StorageError::Timeout(self.timeout))?
            .map_err(StorageError::S3)
    }

    fn storage_uri(&self, destination: &str) -> String {
        format!("{STORAGE_URI_SCHEME}{}/{}", self.bucket_name, destination.trim_start_matches('/'))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Not a storage URI for this bucket: {0}")]
    InvalidUri(String),

    #[error("Storage call exceeded {0:?}")]
    Timeout(Duration),
}
