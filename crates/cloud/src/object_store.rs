//! S3-compatible object storage, also used for GCS through its
//! S3-interoperable XML API with HMAC keys.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use reelsmith_core::clock::Clock;
use reelsmith_core::hashing::sha256_file;
use reelsmith_core::storage::{object_key, BackendKind, ResultReference};
use reelsmith_core::types::{JobId, Timestamp};

use crate::backend::{content_type, file_name, StorageBackend, StorageError};

/// User-metadata key carrying the artifact's hex SHA-256.
pub const CHECKSUM_METADATA_KEY: &str = "sha256";

/// Backend over an S3 API endpoint.
pub struct ObjectStoreBackend {
    kind: BackendKind,
    client: Client,
    bucket: String,
    url_expiry: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("kind", &self.kind)
            .field("bucket", &self.bucket)
            .field("url_expiry", &self.url_expiry)
            .finish_non_exhaustive()
    }
}

impl ObjectStoreBackend {
    /// `kind` is `S3` or `Gcs`; the client must already point at the right
    /// endpoint (see [`crate::config::build_backend`]).
    pub fn new(
        kind: BackendKind,
        client: Client,
        bucket: impl Into<String>,
        url_expiry: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            kind,
            client,
            bucket: bucket.into(),
            url_expiry,
            clock,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Checksum recorded on an existing object, or `None` if absent.
    async fn stored_checksum(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(head) => Ok(head
                .metadata()
                .and_then(|m| m.get(CHECKSUM_METADATA_KEY))
                .cloned()),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(None),
            Err(e) => Err(StorageError::Upload {
                key: key.to_string(),
                reason: format!("head_object: {e}"),
            }),
        }
    }

    async fn upload(&self, key: &str, local_path: &Path, checksum: &str) -> Result<(), StorageError> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StorageError::Upload {
                key: key.to_string(),
                reason: format!("read {}: {e}", local_path.display()),
            })?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type(local_path))
            .metadata(CHECKSUM_METADATA_KEY, checksum)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Presigned GET URL for `key` and its expiry.
    async fn presign(&self, key: &str) -> Result<(String, Timestamp), StorageError> {
        let presign_err = |reason: String| StorageError::Presign {
            key: key.to_string(),
            reason,
        };
        let config = PresigningConfig::expires_in(self.url_expiry)
            .map_err(|e| presign_err(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| presign_err(e.to_string()))?;
        let expires_at = expiry_after(self.clock.now(), self.url_expiry);
        Ok((request.uri().to_string(), expires_at))
    }
}

/// `now + ttl`, saturating at `now` for durations chrono cannot represent.
pub(crate) fn expiry_after(now: Timestamp, ttl: Duration) -> Timestamp {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(now)
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn store(&self, job_id: JobId, local_path: &Path) -> Result<ResultReference, StorageError> {
        let (checksum, size_bytes) = sha256_file(local_path)
            .await
            .map_err(|e| StorageError::io(local_path, e))?;
        let key = object_key(&job_id, file_name(local_path)?);

        if self.stored_checksum(&key).await?.as_deref() == Some(checksum.as_str()) {
            tracing::debug!(job_id = %job_id, bucket = %self.bucket, key = %key, "Object already stored, skipping upload");
        } else {
            self.upload(&key, local_path, &checksum).await?;
            tracing::info!(
                job_id = %job_id,
                backend = %self.kind,
                bucket = %self.bucket,
                key = %key,
                size_bytes,
                "Artifact uploaded",
            );
        }

        let (location, expires_at) = self.presign(&key).await?;
        Ok(ResultReference {
            backend: self.kind,
            location,
            object_key: key,
            size_bytes,
            checksum,
            thumbnail: None,
            expires_at: Some(expires_at),
        })
    }

    async fn retrieve_url(&self, reference: &ResultReference) -> Result<String, StorageError> {
        if reference.backend != self.kind {
            return Err(StorageError::Config(format!(
                "reference from {} backend handed to {}",
                reference.backend, self.kind
            )));
        }
        if !reference.is_expired(self.clock.now()) {
            return Ok(reference.location.clone());
        }
        let (url, _) = self.presign(&reference.object_key).await?;
        Ok(url)
    }
}
