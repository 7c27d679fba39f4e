//! The caller-facing render service.
//!
//! [`RenderService::build`] wires the generator, executor, storage backend,
//! queue, and pool from a [`WorkerConfig`]; [`RenderService::start`] runs the
//! pool and its background loops until [`RenderService::shutdown`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reelsmith_cloud::{build_backend, StorageBackend, StorageError};
use reelsmith_core::clock::SystemClock;
use reelsmith_core::reclamation::Sweeper;
use reelsmith_core::render::RenderExecutor;
use reelsmith_core::request::RenderRequest;
use reelsmith_core::script::template::TemplateSet;
use reelsmith_core::script::ScriptGenerator;
use reelsmith_core::types::JobId;
use reelsmith_db::{JobSnapshot, JobTable};
use reelsmith_events::{EventBus, PoolHealth, RenderEvent};
use reelsmith_pipeline::{RenderPipeline, ThumbnailSettings};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::background;
use crate::config::WorkerConfig;
use crate::pool::WorkerPool;
use crate::queue::{CancelOutcome, JobQueue, QueueError, RecoveryReport};

/// How long shutdown waits for in-flight renders.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to load templates from {path}: {source}")]
    Templates {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reply to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
}

/// Periods of the background loops.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundSchedule {
    pub reaper_interval: Duration,
    pub health_interval: Duration,
    pub cleanup_interval: Duration,
}

impl BackgroundSchedule {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            reaper_interval: config.heartbeat_interval,
            health_interval: config.health_interval,
            cleanup_interval: config.cleanup_interval,
        }
    }
}

/// A queue and pool wired from configuration, not yet running.
pub struct Assembly {
    pub queue: Arc<JobQueue>,
    pub pool: Arc<WorkerPool>,
    pub sweeper: Sweeper,
    pub storage: Arc<dyn StorageBackend>,
    pub recovery: RecoveryReport,
}

pub struct RenderService {
    queue: Arc<JobQueue>,
    pool: Arc<WorkerPool>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_timeout: Duration,
    storage: Option<Arc<dyn StorageBackend>>,
}

impl RenderService {
    /// Wire every component from `config` over `table` and recover persisted
    /// jobs.
    pub async fn build(
        config: &WorkerConfig,
        table: Arc<dyn JobTable>,
        bus: Arc<EventBus>,
    ) -> Result<Assembly, ServiceError> {
        let templates = match &config.template_dir {
            Some(dir) => TemplateSet::with_overrides(dir).map_err(|source| {
                ServiceError::Templates {
                    path: dir.clone(),
                    source,
                }
            })?,
            None => TemplateSet::builtin(),
        };
        let generator = Arc::new(ScriptGenerator::new(templates, config.scripts_dir.clone()));
        let storage = build_backend(&config.storage).await?;

        let mut pipeline = RenderPipeline::new(
            generator.clone(),
            RenderExecutor::new(config.engine_config()),
            storage.clone(),
            config.default_quality,
        )
        .with_script_retention(config.script_retention);
        if let Some(program) = &config.thumbnail_program {
            pipeline = pipeline.with_thumbnails(ThumbnailSettings {
                program: program.clone(),
            });
        }

        let queue = Arc::new(JobQueue::new(table, generator, bus, config.queue_settings()));
        let recovery = queue.recover().await?;
        let pool = Arc::new(
            WorkerPool::new(queue.clone(), Arc::new(pipeline), config.pool_size)
                .with_heartbeat_interval(config.heartbeat_interval),
        );
        let sweeper = Sweeper::new(
            config.scripts_dir.clone(),
            config.output_dir.clone(),
            config.cleanup_max_age,
            Arc::new(SystemClock),
        );
        Ok(Assembly {
            queue,
            pool,
            sweeper,
            storage,
            recovery,
        })
    }

    /// Spawn the dispatcher, reaper, health publisher, and (when a sweeper is
    /// given) the retention cleanup.
    pub fn start(
        queue: Arc<JobQueue>,
        pool: Arc<WorkerPool>,
        sweeper: Option<Sweeper>,
        schedule: BackgroundSchedule,
    ) -> Self {
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn({
            let pool = pool.clone();
            let cancel = cancel.clone();
            async move { pool.run(cancel).await }
        }));
        tasks.push(tokio::spawn(background::reaper::run(
            queue.clone(),
            schedule.reaper_interval,
            cancel.clone(),
        )));
        tasks.push(tokio::spawn(background::health::run(
            pool.clone(),
            schedule.health_interval,
            cancel.clone(),
        )));
        if let Some(sweeper) = sweeper {
            tasks.push(tokio::spawn(background::cleanup::run(
                queue.clone(),
                sweeper,
                schedule.cleanup_interval,
                cancel.clone(),
            )));
        }

        Self {
            queue,
            pool,
            cancel,
            tasks: Mutex::new(tasks),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            storage: None,
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Backend used to refresh result URLs in [`RenderService::get_job`].
    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Accept a request; returns as soon as the job is recorded.
    pub async fn submit_job(&self, request: RenderRequest) -> Result<SubmitResponse, QueueError> {
        let job_id = self.queue.submit(request).await?;
        Ok(SubmitResponse { job_id })
    }

    pub async fn submit_job_with_priority(
        &self,
        request: RenderRequest,
        priority: i32,
    ) -> Result<SubmitResponse, QueueError> {
        let job_id = self.queue.submit_with_priority(request, priority).await?;
        Ok(SubmitResponse { job_id })
    }

    /// Current view of a job. A stored signed URL past its expiry is
    /// replaced by a freshly signed one; the persisted reference is left as is.
    pub async fn get_job(&self, id: JobId) -> Result<Option<JobSnapshot>, QueueError> {
        let Some(mut snapshot) = self.queue.snapshot(id).await? else {
            return Ok(None);
        };
        if let (Some(storage), Some(result)) = (&self.storage, snapshot.result.as_mut()) {
            let refreshed = storage.retrieve_url(result).await;
            match refreshed {
                Ok(location) => result.location = location,
                Err(e) => {
                    tracing::warn!(job_id = %id, error = %e, "Could not refresh result URL");
                }
            }
        }
        Ok(Some(snapshot))
    }

    pub async fn cancel_job(&self, id: JobId) -> Result<CancelOutcome, QueueError> {
        self.queue.cancel(id).await
    }

    pub async fn health(&self) -> PoolHealth {
        self.pool.health().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RenderEvent> {
        self.queue.bus().subscribe()
    }

    /// Stop dispatching, stop the background loops, and wait for in-flight
    /// renders up to the shutdown timeout.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        for task in self.tasks.lock().await.drain(..) {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Background task ended abnormally");
            }
        }
        let drained = self.pool.drain(self.shutdown_timeout).await;
        tracing::info!(drained, "Render service stopped");
    }
}
