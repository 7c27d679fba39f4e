mod common;

use std::path::Path;
use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use common::{lesson_job, Fixture, RecordingObserver};
use reelsmith_cloud::{StorageBackend, StorageError};
use reelsmith_core::error::RenderError;
use reelsmith_core::naming::scene_class_name;
use reelsmith_core::request::SceneType;
use reelsmith_core::storage::{object_key, BackendKind, ResultReference};
use reelsmith_core::types::JobId;
use reelsmith_pipeline::{NoopObserver, ScriptRetention, ThumbnailSettings};

/// Backend whose uploads always fail.
struct UnavailableStorage;

#[async_trait]
impl StorageBackend for UnavailableStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::S3
    }

    async fn store(&self, _job_id: JobId, _local_path: &Path) -> Result<ResultReference, StorageError> {
        Err(StorageError::Upload {
            key: "renders/x".into(),
            reason: "503 Slow Down".into(),
        })
    }

    async fn retrieve_url(&self, _reference: &ResultReference) -> Result<String, StorageError> {
        Err(StorageError::NotFound("unavailable".into()))
    }
}

#[tokio::test]
async fn run_generates_renders_and_stores() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline(fx.local_storage());
    let job = lesson_job();
    let observer = RecordingObserver::default();

    let reference = pipeline.run(&job, &observer).await.expect("run");

    let scene = scene_class_name("college", SceneType::Generic);
    assert_eq!(reference.backend, BackendKind::Local);
    assert_eq!(reference.object_key, object_key(&job.id, &format!("{scene}.mp4")));
    assert_eq!(reference.size_bytes, "video-bytes".len() as u64);
    assert!(reference.thumbnail.is_none());
    assert_eq!(fx.invocations(), 1);

    let rendered = observer.artifact.lock().expect("lock").clone().expect("observed");
    assert!(rendered.ends_with(format!("{scene}.mp4")));
    // Retained by default.
    assert!(fx.script_path(&job).exists());
}

#[tokio::test]
async fn storage_failure_is_retryable_and_keeps_the_render() {
    let fx = Fixture::new();
    let failing = fx.pipeline(Arc::new(UnavailableStorage));
    let mut job = lesson_job();
    let observer = RecordingObserver::default();

    let err = failing.run(&job, &observer).await.expect_err("upload fails");
    assert_matches!(err, RenderError::Storage(ref msg) if msg.contains("503"));
    assert!(err.is_retryable());

    // The next attempt reuses the artifact instead of rendering again.
    job.attempt = 2;
    job.rendered_artifact = observer.artifact.lock().expect("lock").clone();
    let reference = fx
        .pipeline(fx.local_storage())
        .run(&job, &NoopObserver)
        .await
        .expect("retry stores");
    assert_eq!(fx.invocations(), 1);
    assert_eq!(reference.size_bytes, "video-bytes".len() as u64);
}

#[tokio::test]
async fn vanished_cached_artifact_is_rendered_again() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline(fx.local_storage());
    let mut job = lesson_job();
    job.rendered_artifact = Some(fx.root().join("output/gone.mp4"));

    pipeline.run(&job, &NoopObserver).await.expect("run");
    assert_eq!(fx.invocations(), 1);
}

#[tokio::test]
async fn engine_failure_propagates() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline_with_engine("echo 'Tex error' >&2\nexit 1", fx.local_storage());
    let err = pipeline.run(&lesson_job(), &NoopObserver).await.expect_err("engine fails");
    assert_matches!(err, RenderError::RenderProcess { exit_code: Some(1), .. });
}

#[tokio::test]
async fn invalid_request_is_a_binding_error() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline(fx.local_storage());
    let mut job = lesson_job();
    job.request.scene_type = SceneType::Graph;
    job.request.equations.clear();

    let err = pipeline.run(&job, &NoopObserver).await.expect_err("nothing to plot");
    assert_matches!(err, RenderError::TemplateBinding { .. });
    assert!(!err.is_retryable());
    assert_eq!(fx.invocations(), 0);
}

#[tokio::test]
async fn thumbnail_failure_does_not_fail_the_attempt() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline(fx.local_storage()).with_thumbnails(ThumbnailSettings {
        program: "false".into(),
    });

    let reference = pipeline.run(&lesson_job(), &NoopObserver).await.expect("run");
    assert!(reference.thumbnail.is_none());
}

#[tokio::test]
async fn thumbnail_is_stored_beside_the_artifact() {
    let fx = Fixture::new();
    // ffmpeg stand-in: the output path is the last argument.
    let ffmpeg = fx.root().join("ffmpeg.sh");
    std::fs::write(&ffmpeg, "#!/usr/bin/env bash\nprintf 'jpeg' > \"${@: -1}\"\n").expect("write");
    let mut perms = std::fs::metadata(&ffmpeg).expect("meta").permissions();
    std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
    std::fs::set_permissions(&ffmpeg, perms).expect("chmod");

    let pipeline = fx.pipeline(fx.local_storage()).with_thumbnails(ThumbnailSettings {
        program: ffmpeg.display().to_string(),
    });
    let job = lesson_job();
    let reference = pipeline.run(&job, &NoopObserver).await.expect("run");

    let thumbnail = reference.thumbnail.expect("thumbnail stored");
    assert!(thumbnail.ends_with(".thumb.jpg"));
    assert_eq!(std::fs::read(&thumbnail).expect("read"), b"jpeg");
}

#[tokio::test]
async fn delete_after_upload_removes_the_script() {
    let fx = Fixture::new();
    let pipeline = fx
        .pipeline(fx.local_storage())
        .with_script_retention(ScriptRetention::DeleteAfterUpload);
    let job = lesson_job();

    pipeline.run(&job, &NoopObserver).await.expect("run");
    assert!(!fx.script_path(&job).exists());
}

#[tokio::test]
async fn existing_script_is_not_rewritten() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline(fx.local_storage());
    let job = lesson_job();
    let script = fx.script_path(&job);
    std::fs::create_dir_all(fx.scripts_root()).expect("mkdir");
    std::fs::write(&script, "# prepared at submit\n").expect("write");

    pipeline.run(&job, &NoopObserver).await.expect("run");
    assert_eq!(
        std::fs::read_to_string(&script).expect("read"),
        "# prepared at submit\n"
    );
}
