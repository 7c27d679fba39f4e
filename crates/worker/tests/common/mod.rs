#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reelsmith_cloud::{LocalBackend, StorageBackend, StorageError};
use reelsmith_core::render::{EngineConfig, RenderExecutor};
use reelsmith_core::request::{QualityTier, RenderRequest, SceneType};
use reelsmith_core::script::template::TemplateSet;
use reelsmith_core::script::ScriptGenerator;
use reelsmith_core::storage::{BackendKind, ResultReference};
use reelsmith_core::types::JobId;
use reelsmith_db::{InMemoryJobTable, JobSnapshot};
use reelsmith_events::EventBus;
use reelsmith_pipeline::RenderPipeline;
use reelsmith_worker::service::BackgroundSchedule;
use reelsmith_worker::{JobQueue, QueueSettings, RenderHandler, RenderService, RetryPolicy, WorkerPool};

/// Engine stub: logs the run, then writes `<scene>.mp4` into the media dir.
pub const WRITES_VIDEO: &str = r#"echo run >> "$(dirname "$0")/invocations.log"
out="$5/videos/job/480p15"
mkdir -p "$out"
printf 'video-bytes' > "$out/$3.mp4""#;

/// Like [`WRITES_VIDEO`] but takes a moment, so attempts overlap.
pub const SLOW_VIDEO: &str = r#"echo run >> "$(dirname "$0")/invocations.log"
sleep 0.2
mkdir -p "$5"
printf 'video-bytes' > "$5/$3.mp4""#;

pub const ALWAYS_FAILS: &str = r#"echo run >> "$(dirname "$0")/invocations.log"
echo 'Traceback: scene crashed' >&2
exit 1"#;

pub const HANGS: &str = r#"echo run >> "$(dirname "$0")/invocations.log"
sleep 30"#;

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub bus: Arc<EventBus>,
    pub table: Arc<InMemoryJobTable>,
    pub generator: Arc<ScriptGenerator>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let generator = Arc::new(ScriptGenerator::new(
            TemplateSet::builtin(),
            dir.path().join("scripts"),
        ));
        Self {
            dir,
            bus: Arc::new(EventBus::default()),
            table: Arc::new(InMemoryJobTable::new()),
            generator,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn scripts_root(&self) -> PathBuf {
        self.root().join("scripts")
    }

    pub fn output_root(&self) -> PathBuf {
        self.root().join("output")
    }

    pub fn queue(&self, settings: QueueSettings) -> Arc<JobQueue> {
        Arc::new(JobQueue::new(
            self.table.clone(),
            self.generator.clone(),
            self.bus.clone(),
            settings,
        ))
    }

    pub fn executor(&self, stub_body: &str, timeout: Duration) -> RenderExecutor {
        let stub = self.root().join("engine.sh");
        std::fs::write(&stub, format!("#!/usr/bin/env bash\n{stub_body}\n")).expect("write stub");
        std::fs::create_dir_all(self.scripts_root()).expect("scripts dir");
        let mut config = EngineConfig::new("bash", self.scripts_root(), self.output_root());
        config.extra_args = vec![stub.display().to_string()];
        config.timeout = timeout;
        RenderExecutor::new(config)
    }

    pub fn local_storage(&self) -> Arc<LocalBackend> {
        Arc::new(LocalBackend::new(self.root().join("artifacts")))
    }

    pub fn pipeline(&self, stub_body: &str, storage: Arc<dyn StorageBackend>) -> RenderPipeline {
        self.pipeline_with_timeout(stub_body, Duration::from_secs(10), storage)
    }

    pub fn pipeline_with_timeout(
        &self,
        stub_body: &str,
        timeout: Duration,
        storage: Arc<dyn StorageBackend>,
    ) -> RenderPipeline {
        RenderPipeline::new(
            self.generator.clone(),
            self.executor(stub_body, timeout),
            storage,
            QualityTier::Low,
        )
    }

    /// Run a pool of `pool_size` over `queue` with fast background loops.
    pub fn start(
        &self,
        queue: Arc<JobQueue>,
        handler: Arc<dyn RenderHandler>,
        pool_size: usize,
    ) -> RenderService {
        let pool = WorkerPool::new(queue.clone(), handler, pool_size)
            .with_heartbeat_interval(Duration::from_millis(50));
        RenderService::start(
            queue,
            Arc::new(pool),
            None,
            BackgroundSchedule {
                reaper_interval: Duration::from_millis(50),
                health_interval: Duration::from_millis(100),
                cleanup_interval: Duration::from_secs(3600),
            },
        )
        .with_shutdown_timeout(Duration::from_secs(5))
    }

    /// Number of times the engine stub ran.
    pub fn invocations(&self) -> usize {
        std::fs::read_to_string(self.root().join("invocations.log"))
            .map(|log| log.lines().count())
            .unwrap_or(0)
    }
}

/// Retry settings with a short fixed backoff.
pub fn settings(max_attempts: u32) -> QueueSettings {
    QueueSettings {
        retry: RetryPolicy::fixed(max_attempts, Duration::from_millis(10)),
        default_quality: QualityTier::Low,
        ..QueueSettings::default()
    }
}

pub fn graph_request() -> RenderRequest {
    let mut request = RenderRequest::new(SceneType::Graph, "Linear functions", "high_school");
    request.equations = vec!["y=2x+1".into()];
    request.quality = Some(QualityTier::Low);
    request
}

/// A graph request with nothing to plot.
pub fn unbindable_request() -> RenderRequest {
    RenderRequest::new(SceneType::Graph, "Empty plot", "high_school")
}

pub async fn wait_for_terminal(service: &RenderService, id: JobId) -> JobSnapshot {
    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            if let Some(snapshot) = service.get_job(id).await.expect("get_job") {
                if snapshot.state.is_terminal() {
                    return snapshot;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("job should reach a terminal state")
}

pub fn fake_reference(job_id: JobId) -> ResultReference {
    ResultReference {
        backend: BackendKind::Local,
        location: format!("/artifacts/renders/{job_id}/Scene.mp4"),
        object_key: format!("renders/{job_id}/Scene.mp4"),
        size_bytes: 5,
        checksum: "ab".repeat(32),
        thumbnail: None,
        expires_at: None,
    }
}

/// Local storage whose first `failures` uploads fail.
pub struct FlakyStorage {
    pub inner: Arc<LocalBackend>,
    pub failures: AtomicUsize,
}

impl FlakyStorage {
    pub fn new(inner: Arc<LocalBackend>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl StorageBackend for FlakyStorage {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    async fn store(&self, job_id: JobId, local_path: &Path) -> Result<ResultReference, StorageError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Upload {
                key: format!("renders/{job_id}"),
                reason: "connection reset".into(),
            });
        }
        self.inner.store(job_id, local_path).await
    }

    async fn retrieve_url(&self, reference: &ResultReference) -> Result<String, StorageError> {
        self.inner.retrieve_url(reference).await
    }
}
