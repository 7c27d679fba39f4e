//! The storage backend trait and its error type.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reelsmith_core::error::RenderError;
use reelsmith_core::storage::{BackendKind, ResultReference};
use reelsmith_core::types::JobId;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stored artifact not found: {0}")]
    NotFound(String),

    #[error("upload of {key} failed: {reason}")]
    Upload { key: String, reason: String },

    #[error("could not sign URL for {key}: {reason}")]
    Presign { key: String, reason: String },

    #[error("storage misconfigured: {0}")]
    Config(String),
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<StorageError> for RenderError {
    fn from(err: StorageError) -> Self {
        RenderError::Storage(err.to_string())
    }
}

/// Durable home for rendered artifacts.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Persist `local_path` for `job_id`. Storing identical bytes twice is a
    /// no-op that returns an equivalent reference.
    async fn store(&self, job_id: JobId, local_path: &Path) -> Result<ResultReference, StorageError>;

    /// A usable location for `reference`, re-signing expired URLs.
    async fn retrieve_url(&self, reference: &ResultReference) -> Result<String, StorageError>;
}

/// MIME type sent with uploads, by file extension.
pub fn content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

/// Final path component as UTF-8, required to build an object key.
pub(crate) fn file_name(path: &Path) -> Result<&str, StorageError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StorageError::NotFound(format!("no file name in {}", path.display())))
}
