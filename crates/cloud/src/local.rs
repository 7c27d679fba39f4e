//! Local filesystem backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reelsmith_core::hashing::sha256_file;
use reelsmith_core::storage::{object_key, BackendKind, ResultReference};
use reelsmith_core::types::JobId;

use crate::backend::{file_name, StorageBackend, StorageError};

/// Stores artifacts under `root/renders/<job_id>/`.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy into a sibling temp file, then rename over the destination so a
    /// reader never sees a partial artifact.
    async fn copy_atomically(&self, src: &Path, dest: &Path) -> Result<(), StorageError> {
        let parent = dest
            .parent()
            .ok_or_else(|| StorageError::Config(format!("no parent for {}", dest.display())))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::io(parent, e))?;

        let tmp = parent.join(format!(
            ".{}.{}.tmp",
            file_name(dest)?,
            uuid::Uuid::new_v4().simple()
        ));
        if let Err(e) = tokio::fs::copy(src, &tmp).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::io(src, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, dest).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::io(dest, e));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn store(&self, job_id: JobId, local_path: &Path) -> Result<ResultReference, StorageError> {
        let (checksum, size_bytes) = sha256_file(local_path)
            .await
            .map_err(|e| StorageError::io(local_path, e))?;
        let key = object_key(&job_id, file_name(local_path)?);
        let dest = self.root.join(&key);

        let already_stored = match sha256_file(&dest).await {
            Ok((existing, _)) => existing == checksum,
            Err(_) => false,
        };
        if already_stored {
            tracing::debug!(job_id = %job_id, key = %key, "Artifact already stored, skipping copy");
        } else {
            self.copy_atomically(local_path, &dest).await?;
            tracing::info!(job_id = %job_id, key = %key, size_bytes, "Artifact stored locally");
        }

        let location = tokio::fs::canonicalize(&dest)
            .await
            .map_err(|e| StorageError::io(&dest, e))?;
        Ok(ResultReference {
            backend: BackendKind::Local,
            location: location.display().to_string(),
            object_key: key,
            size_bytes,
            checksum,
            thumbnail: None,
            expires_at: None,
        })
    }

    async fn retrieve_url(&self, reference: &ResultReference) -> Result<String, StorageError> {
        let path = self.root.join(&reference.object_key);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(reference.location.clone()),
            _ => Err(StorageError::NotFound(path.display().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    async fn artifact(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        tokio::fs::write(&path, bytes).await.expect("write artifact");
        path
    }

    #[tokio::test]
    async fn store_copies_under_job_key() {
        let src_dir = tempfile::tempdir().expect("tempdir");
        let root = tempfile::tempdir().expect("tempdir");
        let backend = LocalBackend::new(root.path());
        let job_id = JobId::new_v4();
        let src = artifact(src_dir.path(), "GraphScene.mp4", b"video bytes").await;

        let reference = backend.store(job_id, &src).await.expect("store");
        assert_eq!(reference.backend, BackendKind::Local);
        assert_eq!(reference.object_key, object_key(&job_id, "GraphScene.mp4"));
        assert_eq!(reference.size_bytes, 11);
        assert_eq!(reference.checksum.len(), 64);
        assert_eq!(reference.extension().as_deref(), Some("mp4"));
        let stored = tokio::fs::read(&reference.location).await.expect("read");
        assert_eq!(stored, b"video bytes");
        assert_eq!(
            backend.retrieve_url(&reference).await.expect("url"),
            reference.location
        );
    }

    #[tokio::test]
    async fn storing_twice_is_idempotent() {
        let src_dir = tempfile::tempdir().expect("tempdir");
        let root = tempfile::tempdir().expect("tempdir");
        let backend = LocalBackend::new(root.path());
        let job_id = JobId::new_v4();
        let src = artifact(src_dir.path(), "Scene.mp4", b"same").await;

        let first = backend.store(job_id, &src).await.expect("first");
        let second = backend.store(job_id, &src).await.expect("second");
        assert_eq!(first, second);

        // No temp files are left behind.
        let dir = Path::new(&first.location).parent().expect("parent");
        let mut entries = tokio::fs::read_dir(dir).await.expect("read_dir");
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.expect("entry") {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["Scene.mp4".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_jobs_never_share_a_destination() {
        let src_dir = tempfile::tempdir().expect("tempdir");
        let root = tempfile::tempdir().expect("tempdir");
        let backend = std::sync::Arc::new(LocalBackend::new(root.path()));

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let src = artifact(src_dir.path(), &format!("s{i}.mp4"), &[i; 64]).await;
            // Every job renders a file with the same name.
            let renamed = src_dir.path().join(format!("job{i}"));
            tokio::fs::create_dir_all(&renamed).await.expect("mkdir");
            let src_same_name = renamed.join("Scene.mp4");
            tokio::fs::rename(&src, &src_same_name).await.expect("rename");
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                backend.store(JobId::new_v4(), &src_same_name).await
            }));
        }
        let mut locations = std::collections::HashSet::new();
        for handle in handles {
            let reference = handle.await.expect("join").expect("store");
            assert!(locations.insert(reference.location));
        }
        assert_eq!(locations.len(), 8);
    }

    #[tokio::test]
    async fn missing_source_is_an_io_error() {
        let root = tempfile::tempdir().expect("tempdir");
        let backend = LocalBackend::new(root.path());
        let err = backend
            .store(JobId::new_v4(), Path::new("/nonexistent/Scene.mp4"))
            .await
            .expect_err("missing source");
        assert_matches!(err, StorageError::Io { .. });
    }

    #[tokio::test]
    async fn retrieve_url_of_deleted_artifact_is_not_found() {
        let src_dir = tempfile::tempdir().expect("tempdir");
        let root = tempfile::tempdir().expect("tempdir");
        let backend = LocalBackend::new(root.path());
        let src = artifact(src_dir.path(), "Scene.mp4", b"v").await;
        let reference = backend.store(JobId::new_v4(), &src).await.expect("store");
        tokio::fs::remove_file(&reference.location).await.expect("remove");
        let err = backend.retrieve_url(&reference).await.expect_err("gone");
        assert_matches!(err, StorageError::NotFound(_));
    }
}
