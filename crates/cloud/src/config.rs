//! Static backend selection.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Region, RequestChecksumCalculation};
use reelsmith_core::clock::{Clock, SystemClock};
use reelsmith_core::storage::BackendKind;

use crate::backend::{StorageBackend, StorageError};
use crate::local::LocalBackend;
use crate::object_store::ObjectStoreBackend;

/// Default lifetime of presigned URLs (1 hour).
pub const DEFAULT_URL_EXPIRY: Duration = Duration::from_secs(3600);

/// Longest lifetime SigV4 presigning accepts (7 days).
pub const MAX_URL_EXPIRY: Duration = Duration::from_secs(7 * 24 * 3600);

/// GCS XML API endpoint for S3-interoperable access.
pub const GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// GCS ignores the region but SigV4 needs one.
const GCS_REGION: &str = "auto";

/// Name attached to static credentials.
const CREDENTIALS_PROVIDER: &str = "reelsmith-static";

#[derive(Clone)]
pub enum StorageConfig {
    Local {
        root: PathBuf,
    },
    S3 {
        bucket: String,
        region: String,
        /// Custom endpoint for S3-compatible stores (MinIO, R2, ...).
        endpoint: Option<String>,
        /// Static keys; the default AWS credential chain is used when absent.
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        url_expiry: Duration,
    },
    Gcs {
        bucket: String,
        hmac_access_id: String,
        hmac_secret: String,
        url_expiry: Duration,
    },
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local { root } => f.debug_struct("Local").field("root", root).finish(),
            Self::S3 {
                bucket,
                region,
                endpoint,
                url_expiry,
                ..
            } => f
                .debug_struct("S3")
                .field("bucket", bucket)
                .field("region", region)
                .field("endpoint", endpoint)
                .field("url_expiry", url_expiry)
                .finish_non_exhaustive(),
            Self::Gcs {
                bucket, url_expiry, ..
            } => f
                .debug_struct("Gcs")
                .field("bucket", bucket)
                .field("url_expiry", url_expiry)
                .finish_non_exhaustive(),
        }
    }
}

impl StorageConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Local { .. } => BackendKind::Local,
            Self::S3 { .. } => BackendKind::S3,
            Self::Gcs { .. } => BackendKind::Gcs,
        }
    }
}

/// Build the configured backend with the wall clock.
pub async fn build_backend(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>, StorageError> {
    build_backend_with_clock(config, Arc::new(SystemClock)).await
}

pub async fn build_backend_with_clock(
    config: &StorageConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn StorageBackend>, StorageError> {
    let backend: Arc<dyn StorageBackend> = match config {
        StorageConfig::Local { root } => Arc::new(LocalBackend::new(root.clone())),
        StorageConfig::S3 {
            bucket,
            region,
            endpoint,
            access_key_id,
            secret_access_key,
            url_expiry,
        } => {
            if bucket.is_empty() {
                return Err(StorageError::Config("S3 bucket must be set".into()));
            }
            let mut builder = match (access_key_id, secret_access_key) {
                (Some(id), Some(secret)) => aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .region(Region::new(region.clone()))
                    .credentials_provider(Credentials::new(
                        id,
                        secret,
                        None,
                        None,
                        CREDENTIALS_PROVIDER,
                    )),
                (None, None) => {
                    let shared = aws_config::defaults(BehaviorVersion::latest())
                        .region(Region::new(region.clone()))
                        .load()
                        .await;
                    aws_sdk_s3::config::Builder::from(&shared)
                }
                _ => {
                    return Err(StorageError::Config(
                        "S3 access key id and secret must be set together".into(),
                    ))
                }
            };
            if let Some(endpoint) = endpoint {
                builder = builder.endpoint_url(endpoint).force_path_style(true);
            }
            let client = aws_sdk_s3::Client::from_conf(builder.build());
            Arc::new(ObjectStoreBackend::new(
                BackendKind::S3,
                client,
                bucket.clone(),
                *url_expiry,
                clock,
            ))
        }
        StorageConfig::Gcs {
            bucket,
            hmac_access_id,
            hmac_secret,
            url_expiry,
        } => {
            if bucket.is_empty() || hmac_access_id.is_empty() || hmac_secret.is_empty() {
                return Err(StorageError::Config(
                    "GCS bucket and HMAC credentials must be set".into(),
                ));
            }
            let conf = aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .region(Region::new(GCS_REGION))
                .endpoint_url(GCS_ENDPOINT)
                .credentials_provider(Credentials::new(
                    hmac_access_id,
                    hmac_secret,
                    None,
                    None,
                    CREDENTIALS_PROVIDER,
                ))
                // The interop API rejects the flexible-checksum headers.
                .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
                .force_path_style(true)
                .build();
            Arc::new(ObjectStoreBackend::new(
                BackendKind::Gcs,
                aws_sdk_s3::Client::from_conf(conf),
                bucket.clone(),
                *url_expiry,
                clock,
            ))
        }
    };
    tracing::info!(backend = %backend.kind(), label = backend.kind().label(), "Storage backend ready");
    Ok(backend)
}
