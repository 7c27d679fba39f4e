use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reelsmith_cloud::{LocalBackend, StorageBackend};
use reelsmith_core::render::{EngineConfig, RenderExecutor};
use reelsmith_core::request::{QualityTier, RenderRequest, SceneType};
use reelsmith_core::script::template::TemplateSet;
use reelsmith_core::script::ScriptGenerator;
use reelsmith_db::RenderJob;
use reelsmith_pipeline::{AttemptObserver, RenderPipeline};

/// Engine stub: writes `<scene>.mp4` under the media dir and appends one line
/// to `invocations.log` per run.
pub const RENDERING_ENGINE: &str = r#"echo run >> "$(dirname "$0")/invocations.log"
out="$5/videos/job/480p15"
mkdir -p "$out"
printf 'video-bytes' > "$out/$3.mp4""#;

/// Directory layout for one test.
pub struct Fixture {
    pub dir: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn scripts_root(&self) -> PathBuf {
        self.root().join("scripts")
    }

    pub fn storage_root(&self) -> PathBuf {
        self.root().join("artifacts")
    }

    pub fn generator(&self) -> Arc<ScriptGenerator> {
        Arc::new(ScriptGenerator::new(TemplateSet::builtin(), self.scripts_root()))
    }

    pub fn executor(&self, stub_body: &str) -> RenderExecutor {
        let stub = self.root().join("engine.sh");
        std::fs::write(&stub, format!("#!/usr/bin/env bash\n{stub_body}\n")).expect("write stub");
        std::fs::create_dir_all(self.scripts_root()).expect("scripts dir");
        let mut config = EngineConfig::new("bash", self.scripts_root(), self.root().join("output"));
        config.extra_args = vec![stub.display().to_string()];
        RenderExecutor::new(config)
    }

    pub fn local_storage(&self) -> Arc<dyn StorageBackend> {
        Arc::new(LocalBackend::new(self.storage_root()))
    }

    pub fn pipeline(&self, storage: Arc<dyn StorageBackend>) -> RenderPipeline {
        self.pipeline_with_engine(RENDERING_ENGINE, storage)
    }

    pub fn pipeline_with_engine(
        &self,
        stub_body: &str,
        storage: Arc<dyn StorageBackend>,
    ) -> RenderPipeline {
        RenderPipeline::new(
            self.generator(),
            self.executor(stub_body),
            storage,
            QualityTier::Low,
        )
    }

    pub fn script_path(&self, job: &RenderJob) -> PathBuf {
        self.scripts_root().join(format!("job_{}.py", job.id.simple()))
    }

    /// Number of times the engine stub ran.
    pub fn invocations(&self) -> usize {
        std::fs::read_to_string(self.root().join("invocations.log"))
            .map(|log| log.lines().count())
            .unwrap_or(0)
    }
}

pub fn lesson_job() -> RenderJob {
    let mut request = RenderRequest::new(SceneType::Generic, "Lines", "college");
    request.equations = vec!["y = 2x + 1".into()];
    let mut job = RenderJob::new(
        uuid::Uuid::new_v4(),
        request,
        0,
        1,
        3,
        chrono::Utc::now(),
    );
    job.attempt = 1;
    job
}

/// Remembers the artifact handed to `artifact_rendered`.
#[derive(Default)]
pub struct RecordingObserver {
    pub artifact: Mutex<Option<PathBuf>>,
}

#[async_trait]
impl AttemptObserver for RecordingObserver {
    async fn artifact_rendered(&self, artifact: &Path) {
        *self.artifact.lock().expect("lock") = Some(artifact.to_path_buf());
    }
}
