//! Storage backend kinds and the artifact reference handed back to callers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

/// Prefix of every object key written by a backend.
pub const OBJECT_KEY_PREFIX: &str = "renders";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Storage backend selected by static configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    S3,
    Gcs,
}

impl BackendKind {
    /// Parse from the `STORAGE_BACKEND` configuration value.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "s3" => Some(Self::S3),
            "gcs" => Some(Self::Gcs),
            _ => None,
        }
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Local => "Local Filesystem",
            Self::S3 => "Amazon S3 / Compatible",
            Self::Gcs => "Google Cloud Storage",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::S3 => "s3",
            Self::Gcs => "gcs",
        }
    }

    /// Whether references from this backend are expiring signed URLs.
    pub fn uses_signed_urls(self) -> bool {
        !matches!(self, Self::Local)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Result reference
// ---------------------------------------------------------------------------

/// Where a rendered artifact landed. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultReference {
    pub backend: BackendKind,
    /// Filesystem path or signed URL.
    pub location: String,
    /// Backend-relative key, used to regenerate signed URLs.
    pub object_key: String,
    pub size_bytes: u64,
    /// Hex SHA-256 of the artifact bytes.
    pub checksum: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Expiry of `location` when it is a signed URL.
    #[serde(default)]
    pub expires_at: Option<Timestamp>,
}

impl ResultReference {
    /// True when `location` is a signed URL that has expired at `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// File extension of the stored artifact, lowercased.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.object_key)
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
    }

    pub fn with_thumbnail(mut self, thumbnail: String) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }
}

/// Object key for a job's artifact: `renders/<job_id>/<file_name>`.
pub fn object_key(job_id: &JobId, file_name: &str) -> String {
    format!("{OBJECT_KEY_PREFIX}/{}/{file_name}", job_id.simple())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
