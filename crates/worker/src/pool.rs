//! Worker pool: runs claimed jobs under a fixed concurrency limit.
//!
//! The dispatcher acquires a [`Semaphore`] permit before it claims, so the
//! number of running attempts never exceeds the pool size and surplus jobs
//! wait in the queue. Each attempt runs in its own task; a supervising task
//! holds the permit, heartbeats the lease, and turns a panic into a
//! `WorkerLost` failure.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reelsmith_core::error::RenderError;
use reelsmith_core::storage::ResultReference;
use reelsmith_core::types::JobId;
use reelsmith_db::{LeaseId, RenderJob};
use reelsmith_events::PoolHealth;
use reelsmith_pipeline::{AttemptObserver, RenderPipeline};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::queue::{JobQueue, QueueError};

/// Default number of concurrent renders.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Default interval between lease heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Upper bound on how long the dispatcher sleeps without a wake-up.
const DISPATCH_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Executes one attempt of a claimed job.
#[async_trait]
pub trait RenderHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        job: &RenderJob,
        observer: &dyn AttemptObserver,
    ) -> Result<ResultReference, RenderError>;
}

#[async_trait]
impl RenderHandler for RenderPipeline {
    async fn handle(
        &self,
        job: &RenderJob,
        observer: &dyn AttemptObserver,
    ) -> Result<ResultReference, RenderError> {
        self.run(job, observer).await
    }
}

/// Caches the rendered artifact on the job record under the attempt's lease.
struct LeaseObserver {
    queue: Arc<JobQueue>,
    job: RenderJob,
    lease: LeaseId,
}

#[async_trait]
impl AttemptObserver for LeaseObserver {
    async fn artifact_rendered(&self, artifact: &Path) {
        if let Err(e) = self.queue.record_artifact(self.job.id, self.lease, artifact).await {
            tracing::warn!(job_id = %self.job.id, error = %e, "Failed to record rendered artifact");
        }
    }
}

pub struct WorkerPool {
    queue: Arc<JobQueue>,
    handler: Arc<dyn RenderHandler>,
    capacity: usize,
    slots: Arc<Semaphore>,
    heartbeat_interval: Duration,
}

impl WorkerPool {
    pub fn new(queue: Arc<JobQueue>, handler: Arc<dyn RenderHandler>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue,
            handler,
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub async fn health(&self) -> PoolHealth {
        let depth = self.queue.depth().await;
        PoolHealth {
            capacity: self.capacity,
            running: depth.running,
            queued: depth.queued,
            retrying: depth.retrying,
            at: self.queue.now(),
        }
    }

    /// Dispatch jobs until `cancel` fires. In-flight attempts keep running;
    /// see [`WorkerPool::drain`].
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(capacity = self.capacity, "Worker pool started");
        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let Some(job) = self.next_job(&cancel).await else {
                break;
            };
            self.spawn_attempt(job, permit);
        }
        tracing::info!("Worker pool shutting down");
    }

    /// Wait for a claimable job, or `None` on cancellation.
    async fn next_job(&self, cancel: &CancellationToken) -> Option<RenderJob> {
        loop {
            match self.queue.claim().await {
                Ok(Some(job)) => return Some(job),
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "Claim failed"),
            }
            let wait = match self.queue.next_retry_at().await {
                Some(due) => (due - self.queue.now())
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .min(DISPATCH_POLL_INTERVAL),
                None => DISPATCH_POLL_INTERVAL,
            };
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = self.queue.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn spawn_attempt(&self, job: RenderJob, permit: OwnedSemaphorePermit) {
        let Some(lease) = job.lease else {
            tracing::error!(job_id = %job.id, "Claimed job carries no lease");
            return;
        };
        let queue = self.queue.clone();
        let handler = self.handler.clone();
        let heartbeat_interval = self.heartbeat_interval;

        tokio::spawn(async move {
            let _permit = permit;
            let job_id = job.id;
            let mut beats =
                tokio::spawn(heartbeat(queue.clone(), job_id, lease, heartbeat_interval));

            let observer = LeaseObserver {
                queue: queue.clone(),
                job,
                lease,
            };
            let mut attempt =
                tokio::spawn(async move { handler.handle(&observer.job, &observer).await });
            let joined = tokio::select! {
                joined = &mut attempt => joined,
                _ = &mut beats => {
                    // The lease was revoked; the job already has a new owner
                    // or a final state.
                    attempt.abort();
                    tracing::warn!(job_id = %job_id, "Lease lost mid-render, attempt abandoned");
                    return;
                }
            };
            beats.abort();
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => {
                    tracing::error!(job_id = %job_id, "Render task panicked");
                    Err(RenderError::WorkerLost(format!("render task panicked: {e}")))
                }
                Err(e) => Err(RenderError::WorkerLost(format!("render task aborted: {e}"))),
            };

            let report = match outcome {
                Ok(result) => queue.complete(job_id, lease, result).await,
                Err(error) => queue.fail(job_id, lease, error).await.map(|_| ()),
            };
            match report {
                Ok(()) => {}
                Err(QueueError::StaleLease { .. }) => {
                    tracing::warn!(job_id = %job_id, "Attempt outcome discarded, lease was revoked");
                }
                Err(e) => tracing::error!(job_id = %job_id, error = %e, "Failed to record attempt outcome"),
            }
        });
    }

    /// Wait up to `timeout` for in-flight attempts to finish. Returns whether
    /// the pool went idle in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let all = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        match tokio::time::timeout(timeout, self.slots.acquire_many(all)).await {
            Ok(Ok(_permits)) => true,
            Ok(Err(_)) => true,
            Err(_) => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    "Render attempts still running at shutdown",
                );
                false
            }
        }
    }
}

/// Beat the lease until the queue stops recognizing it.
async fn heartbeat(queue: Arc<JobQueue>, job_id: JobId, lease: LeaseId, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(e) = queue.heartbeat(job_id, lease).await {
            tracing::debug!(job_id = %job_id, error = %e, "Heartbeat stopped");
            break;
        }
    }
}
