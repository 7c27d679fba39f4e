use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reelsmith_cloud::StorageBackend;
use reelsmith_core::error::RenderError;
use reelsmith_core::ffmpeg::{
    extract_frame_thumbnail, thumbnail_path, THUMBNAIL_HEIGHT, THUMBNAIL_OFFSET_SECS,
    THUMBNAIL_WIDTH,
};
use reelsmith_core::naming::scene_class_name;
use reelsmith_core::render::{RenderExecutor, RenderInvocation};
use reelsmith_core::request::QualityTier;
use reelsmith_core::script::ScriptGenerator;
use reelsmith_core::storage::ResultReference;
use reelsmith_db::RenderJob;

use crate::retention::ScriptRetention;

/// Hook into an attempt's progress.
#[async_trait]
pub trait AttemptObserver: Send + Sync {
    /// The engine produced `artifact`; called before storage so a retry after
    /// a storage failure can reuse it.
    async fn artifact_rendered(&self, artifact: &Path);
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

#[async_trait]
impl AttemptObserver for NoopObserver {
    async fn artifact_rendered(&self, _artifact: &Path) {}
}

/// Optional post-success thumbnail step.
#[derive(Debug, Clone)]
pub struct ThumbnailSettings {
    /// ffmpeg executable.
    pub program: String,
}

pub struct RenderPipeline {
    generator: Arc<ScriptGenerator>,
    executor: RenderExecutor,
    storage: Arc<dyn StorageBackend>,
    default_quality: QualityTier,
    thumbnails: Option<ThumbnailSettings>,
    script_retention: ScriptRetention,
}

impl RenderPipeline {
    pub fn new(
        generator: Arc<ScriptGenerator>,
        executor: RenderExecutor,
        storage: Arc<dyn StorageBackend>,
        default_quality: QualityTier,
    ) -> Self {
        Self {
            generator,
            executor,
            storage,
            default_quality,
            thumbnails: None,
            script_retention: ScriptRetention::default(),
        }
    }

    pub fn with_thumbnails(mut self, settings: ThumbnailSettings) -> Self {
        self.thumbnails = Some(settings);
        self
    }

    pub fn with_script_retention(mut self, retention: ScriptRetention) -> Self {
        self.script_retention = retention;
        self
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// Run one attempt for a claimed job.
    pub async fn run(
        &self,
        job: &RenderJob,
        observer: &dyn AttemptObserver,
    ) -> Result<ResultReference, RenderError> {
        let artifact = match cached_artifact(job).await {
            Some(path) => {
                tracing::info!(
                    job_id = %job.id,
                    attempt = job.attempt,
                    artifact = %path.display(),
                    "Reusing cached render",
                );
                path
            }
            None => {
                let artifact = self.render(job).await?;
                observer.artifact_rendered(&artifact).await;
                artifact
            }
        };

        let mut reference = self.storage.store(job.id, &artifact).await?;

        if let Some(settings) = &self.thumbnails {
            if let Some(location) = self.thumbnail(job, &artifact, settings).await {
                reference = reference.with_thumbnail(location);
            }
        }

        if self.script_retention == ScriptRetention::DeleteAfterUpload {
            let script = self.generator.script_path(&job.id);
            if let Err(e) = tokio::fs::remove_file(&script).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(job_id = %job.id, error = %e, "Failed to delete script");
                }
            }
        }

        Ok(reference)
    }

    /// Ensure the script exists, then run the engine once.
    async fn render(&self, job: &RenderJob) -> Result<PathBuf, RenderError> {
        let quality = job.request.quality.unwrap_or(self.default_quality);
        let script_path = self.generator.script_path(&job.id);
        let scene_name = if tokio::fs::try_exists(&script_path).await.unwrap_or(false) {
            scene_class_name(&job.request.level, job.request.scene_type)
        } else {
            // Generation is deterministic, so a swept or lost script is
            // recreated byte-for-byte.
            tracing::debug!(job_id = %job.id, "Script missing, regenerating");
            self.generator
                .generate(&job.request, &job.id, quality)
                .await
                .map_err(|e| e.into_render_error())?
                .scene_name
        };

        let output = self
            .executor
            .execute(&RenderInvocation {
                job_id: job.id,
                script_path,
                scene_name,
                quality,
            })
            .await?;
        Ok(output.artifact)
    }

    /// Extract and store a thumbnail. Failures are logged and yield `None`.
    async fn thumbnail(
        &self,
        job: &RenderJob,
        artifact: &Path,
        settings: &ThumbnailSettings,
    ) -> Option<String> {
        let thumb = thumbnail_path(artifact);
        if let Err(e) = extract_frame_thumbnail(
            &settings.program,
            artifact,
            &thumb,
            THUMBNAIL_OFFSET_SECS,
            THUMBNAIL_WIDTH,
            THUMBNAIL_HEIGHT,
        )
        .await
        {
            tracing::warn!(job_id = %job.id, error = %e, "Thumbnail extraction failed");
            return None;
        }
        match self.storage.store(job.id, &thumb).await {
            Ok(stored) => Some(stored.location),
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Thumbnail upload failed");
                None
            }
        }
    }
}

/// The job's previously rendered artifact, if it is still on disk.
async fn cached_artifact(job: &RenderJob) -> Option<PathBuf> {
    let path = job.rendered_artifact.as_ref()?;
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(path.clone()),
        _ => None,
    }
}
