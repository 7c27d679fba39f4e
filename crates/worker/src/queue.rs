//! Render job queue.
//!
//! The [`JobTable`] holds the durable record of every job; this module adds
//! the in-process schedule on top of it: the ready set (priority, then
//! submission order), the delay set of jobs backing off after a failure, and
//! the lease table fed by worker heartbeats. Every state change is a
//! compare-and-swap on the table, so a report from a worker whose lease has
//! been revoked is rejected instead of applied.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reelsmith_core::clock::{Clock, SystemClock};
use reelsmith_core::error::RenderError;
use reelsmith_core::request::{QualityTier, RenderRequest};
use reelsmith_core::script::{ScriptError, ScriptGenerator};
use reelsmith_core::storage::ResultReference;
use reelsmith_core::types::{JobId, Timestamp};
use reelsmith_db::models::status::ACTIVE_STATES;
use reelsmith_db::{JobSnapshot, JobState, JobTable, JobTableError, LeaseId, RenderJob};
use reelsmith_events::{EventBus, RenderEvent};
use serde::Serialize;
use tokio::sync::{Mutex, Notify};

use crate::retry::RetryPolicy;

/// How long a running job may go without a heartbeat before it is reclaimed.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Table(#[from] JobTableError),

    #[error("job {0} does not exist")]
    NotFound(JobId),

    /// The reporting worker no longer owns the job.
    #[error("lease {lease} no longer owns job {job_id}")]
    StaleLease { job_id: JobId, lease: LeaseId },
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CancelOutcome {
    pub accepted: bool,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub retry: RetryPolicy,
    /// Quality used when a request does not name one.
    pub default_quality: QualityTier,
    pub ack_timeout: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            default_quality: QualityTier::Medium,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }
}

/// Jobs per scheduling state, as the queue sees them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    pub running: usize,
    pub queued: usize,
    pub retrying: usize,
}

/// What [`JobQueue::recover`] found in the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub requeued: usize,
    pub retrying: usize,
    /// Jobs left `running` by a previous process.
    pub orphaned: usize,
}

/// Higher priority first, then submission order.
type ReadyKey = (Reverse<i32>, i64, JobId);

/// Earliest eligibility first.
type DelayedKey = (Timestamp, i64, JobId);

#[derive(Debug, Clone, Copy)]
struct Lease {
    id: LeaseId,
    last_beat: Timestamp,
}

#[derive(Debug, Default)]
struct Schedule {
    ready: BTreeSet<ReadyKey>,
    delayed: BTreeSet<DelayedKey>,
    leases: HashMap<JobId, Lease>,
}

impl Schedule {
    fn release(&mut self, job_id: JobId, lease: Option<LeaseId>) {
        if self
            .leases
            .get(&job_id)
            .is_some_and(|held| Some(held.id) == lease)
        {
            self.leases.remove(&job_id);
        }
    }
}

fn ready_key(job: &RenderJob) -> ReadyKey {
    (Reverse(job.priority), job.seq, job.id)
}

/// `from + by`, saturating at `from` when chrono cannot represent the sum.
fn after(from: Timestamp, by: Duration) -> Timestamp {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|d| from.checked_add_signed(d))
        .unwrap_or(from)
}

pub struct JobQueue {
    table: Arc<dyn JobTable>,
    generator: Arc<ScriptGenerator>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    settings: QueueSettings,
    seq: AtomicI64,
    schedule: Mutex<Schedule>,
    wake: Notify,
}

impl JobQueue {
    pub fn new(
        table: Arc<dyn JobTable>,
        generator: Arc<ScriptGenerator>,
        bus: Arc<EventBus>,
        settings: QueueSettings,
    ) -> Self {
        Self {
            table,
            generator,
            bus,
            clock: Arc::new(SystemClock),
            settings,
            seq: AtomicI64::new(0),
            schedule: Mutex::new(Schedule::default()),
            wake: Notify::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // -----------------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------------

    pub async fn submit(&self, request: RenderRequest) -> Result<JobId, QueueError> {
        self.submit_with_priority(request, 0).await
    }

    /// Record the job and write its script. A request its template cannot
    /// bind is stored `failed` with no attempt consumed and never enqueued.
    pub async fn submit_with_priority(
        &self,
        request: RenderRequest,
        priority: i32,
    ) -> Result<JobId, QueueError> {
        let id = JobId::new_v4();
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.clock.now();
        let quality = request.quality.unwrap_or(self.settings.default_quality);
        let mut job = RenderJob::new(
            id,
            request,
            priority,
            seq,
            self.settings.retry.max_attempts,
            now,
        );

        match self.generator.generate(&job.request, &id, quality).await {
            Ok(script) => job.script_path = Some(script.path),
            Err(ScriptError::Binding(err)) => {
                job.state = JobState::Failed;
                job.completed_at = Some(now);
                job.error_kind = Some(err.kind());
                job.last_error = Some(err.to_string());
                self.table.put(&job).await?;
                tracing::warn!(job_id = %id, error = %err, "Job rejected at submit");
                self.bus.publish(RenderEvent::Submitted { job_id: id, at: now });
                self.bus.publish(RenderEvent::Failed {
                    job_id: id,
                    attempt: 0,
                    error_kind: err.kind(),
                    error: err.to_string(),
                });
                return Ok(id);
            }
            Err(err @ ScriptError::Write { .. }) => {
                // Regenerated by the worker before rendering.
                tracing::warn!(job_id = %id, error = %err, "Script write failed at submit");
            }
        }

        self.table.put(&job).await?;
        self.schedule.lock().await.ready.insert(ready_key(&job));
        self.wake.notify_one();
        tracing::info!(
            job_id = %id,
            priority,
            seq,
            scene_type = %job.request.scene_type,
            quality = %quality,
            "Job queued",
        );
        self.bus.publish(RenderEvent::Submitted { job_id: id, at: now });
        Ok(id)
    }

    pub async fn status(&self, id: JobId) -> Result<Option<RenderJob>, QueueError> {
        Ok(self.table.get(id).await?)
    }

    pub async fn snapshot(&self, id: JobId) -> Result<Option<JobSnapshot>, QueueError> {
        Ok(self.status(id).await?.as_ref().map(JobSnapshot::from))
    }

    /// Cancel a job that is not running yet. Running jobs are never
    /// preempted; unknown and finished jobs are refused.
    pub async fn cancel(&self, id: JobId) -> Result<CancelOutcome, QueueError> {
        let refused = CancelOutcome { accepted: false };
        let mut schedule = self.schedule.lock().await;
        let Some(job) = self.table.get(id).await? else {
            return Ok(refused);
        };
        if !matches!(job.state, JobState::Queued | JobState::Retrying) {
            tracing::debug!(job_id = %id, state = %job.state, "Cancel refused");
            return Ok(refused);
        }

        let mut next = job.clone();
        next.state = JobState::Cancelled;
        next.completed_at = Some(self.clock.now());
        next.next_attempt_at = None;
        if !self.table.compare_and_swap_state(id, job.guard(), &next).await? {
            return Ok(refused);
        }
        schedule.ready.remove(&ready_key(&job));
        schedule.delayed.retain(|&(_, _, delayed_id)| delayed_id != id);
        drop(schedule);

        tracing::info!(job_id = %id, previous = %job.state, "Job cancelled");
        self.bus.publish(RenderEvent::Cancelled { job_id: id });
        Ok(CancelOutcome { accepted: true })
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Take the next eligible job and mark it running under a fresh lease.
    pub async fn claim(&self) -> Result<Option<RenderJob>, QueueError> {
        let mut schedule = self.schedule.lock().await;
        self.promote_due(&mut schedule).await?;

        while let Some(key) = schedule.ready.pop_first() {
            let id = key.2;
            let job = match self.table.get(id).await {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(e) => {
                    schedule.ready.insert(key);
                    return Err(e.into());
                }
            };
            if job.state != JobState::Queued {
                continue;
            }

            let now = self.clock.now();
            let lease = LeaseId::new_v4();
            let mut next = job.clone();
            next.state = JobState::Running;
            next.lease = Some(lease);
            next.attempt += 1;
            next.started_at = Some(now);
            next.next_attempt_at = None;
            match self.table.compare_and_swap_state(id, job.guard(), &next).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    schedule.ready.insert(key);
                    return Err(e.into());
                }
            }
            schedule.leases.insert(
                id,
                Lease {
                    id: lease,
                    last_beat: now,
                },
            );
            drop(schedule);

            tracing::info!(
                job_id = %id,
                attempt = next.attempt,
                max_attempts = next.max_attempts,
                "Job claimed",
            );
            self.bus.publish(RenderEvent::Started {
                job_id: id,
                attempt: next.attempt,
                at: now,
            });
            return Ok(Some(next));
        }
        Ok(None)
    }

    /// Move retrying jobs whose backoff has elapsed back to the ready set.
    async fn promote_due(&self, schedule: &mut Schedule) -> Result<(), QueueError> {
        let now = self.clock.now();
        while let Some(&key) = schedule.delayed.first() {
            let (due, _, id) = key;
            if due > now {
                break;
            }
            if let Some(job) = self.table.get(id).await? {
                if job.state == JobState::Retrying {
                    let mut next = job.clone();
                    next.state = JobState::Queued;
                    next.next_attempt_at = None;
                    if self.table.compare_and_swap_state(id, job.guard(), &next).await? {
                        schedule.ready.insert(ready_key(&next));
                        tracing::debug!(job_id = %id, attempt = next.attempt, "Backoff elapsed, job requeued");
                    }
                }
            }
            schedule.delayed.remove(&key);
        }
        Ok(())
    }

    /// When the earliest backing-off job becomes eligible.
    pub async fn next_retry_at(&self) -> Option<Timestamp> {
        self.schedule
            .lock()
            .await
            .delayed
            .first()
            .map(|&(due, _, _)| due)
    }

    /// Resolves after the next submission or requeue.
    pub(crate) async fn notified(&self) {
        self.wake.notified().await;
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // -----------------------------------------------------------------------
    // Reports from the lease holder
    // -----------------------------------------------------------------------

    /// The job, provided `lease` still owns it.
    async fn owned(&self, id: JobId, lease: LeaseId) -> Result<RenderJob, QueueError> {
        let job = self.table.get(id).await?.ok_or(QueueError::NotFound(id))?;
        if job.state != JobState::Running || job.lease != Some(lease) {
            return Err(QueueError::StaleLease { job_id: id, lease });
        }
        Ok(job)
    }

    pub async fn complete(
        &self,
        id: JobId,
        lease: LeaseId,
        result: ResultReference,
    ) -> Result<(), QueueError> {
        let job = self.owned(id, lease).await?;
        let mut next = job.clone();
        next.state = JobState::Succeeded;
        next.result = Some(result.clone());
        next.completed_at = Some(self.clock.now());
        next.lease = None;
        next.last_error = None;
        next.error_kind = None;
        if !self.table.compare_and_swap_state(id, job.guard(), &next).await? {
            return Err(QueueError::StaleLease { job_id: id, lease });
        }
        self.schedule.lock().await.release(id, Some(lease));

        tracing::info!(
            job_id = %id,
            attempt = job.attempt,
            backend = %result.backend,
            object_key = %result.object_key,
            size_bytes = result.size_bytes,
            "Job succeeded",
        );
        self.bus.publish(RenderEvent::Succeeded {
            job_id: id,
            attempt: job.attempt,
            result,
        });
        Ok(())
    }

    /// Settle a failed attempt: back off and retry, or dead-letter. Returns
    /// the job's new state.
    pub async fn fail(
        &self,
        id: JobId,
        lease: LeaseId,
        error: RenderError,
    ) -> Result<JobState, QueueError> {
        let job = self.owned(id, lease).await?;
        self.settle_failure(job, error).await
    }

    async fn settle_failure(&self, job: RenderJob, error: RenderError) -> Result<JobState, QueueError> {
        let now = self.clock.now();
        let policy = self.settings.retry;
        let retry = error.is_retryable() && policy.allows_retry(job.attempt);

        let mut next = job.clone();
        next.lease = None;
        next.last_error = Some(error.to_string());
        next.error_kind = Some(error.kind());
        if retry {
            next.state = JobState::Retrying;
            next.next_attempt_at = Some(after(now, policy.delay(job.attempt)));
        } else {
            next.state = JobState::Failed;
            next.completed_at = Some(now);
        }
        if !self.table.compare_and_swap_state(job.id, job.guard(), &next).await? {
            return Err(QueueError::StaleLease {
                job_id: job.id,
                lease: job.lease.unwrap_or_default(),
            });
        }

        {
            let mut schedule = self.schedule.lock().await;
            schedule.release(job.id, job.lease);
            if let Some(due) = next.next_attempt_at {
                schedule.delayed.insert((due, job.seq, job.id));
            }
        }

        match next.next_attempt_at {
            Some(next_attempt_at) => {
                self.wake.notify_one();
                tracing::warn!(
                    job_id = %job.id,
                    attempt = job.attempt,
                    max_attempts = job.max_attempts,
                    error = %error,
                    next_attempt_at = %next_attempt_at,
                    "Attempt failed, retry scheduled",
                );
                self.bus.publish(RenderEvent::Retrying {
                    job_id: job.id,
                    attempt: job.attempt,
                    error: error.to_string(),
                    next_attempt_at,
                });
            }
            None => {
                tracing::error!(
                    job_id = %job.id,
                    attempt = job.attempt,
                    error_kind = error.kind().as_str(),
                    error = %error,
                    "Job failed",
                );
                self.bus.publish(RenderEvent::Failed {
                    job_id: job.id,
                    attempt: job.attempt,
                    error_kind: error.kind(),
                    error: error.to_string(),
                });
            }
        }
        Ok(next.state)
    }

    /// Remember the rendered file so a retry after a storage failure can
    /// skip the engine.
    pub async fn record_artifact(
        &self,
        id: JobId,
        lease: LeaseId,
        artifact: &Path,
    ) -> Result<(), QueueError> {
        let job = self.owned(id, lease).await?;
        let mut next = job.clone();
        next.rendered_artifact = Some(artifact.to_path_buf());
        if !self.table.compare_and_swap_state(id, job.guard(), &next).await? {
            return Err(QueueError::StaleLease { job_id: id, lease });
        }
        Ok(())
    }

    pub async fn heartbeat(&self, id: JobId, lease: LeaseId) -> Result<(), QueueError> {
        let now = self.clock.now();
        match self.schedule.lock().await.leases.get_mut(&id) {
            Some(held) if held.id == lease => {
                held.last_beat = now;
                Ok(())
            }
            _ => Err(QueueError::StaleLease { job_id: id, lease }),
        }
    }

    /// Reclaim running jobs whose holder stopped heartbeating. Returns how
    /// many were reclaimed.
    pub async fn reap_expired(&self) -> Result<usize, QueueError> {
        let now = self.clock.now();
        let Ok(timeout) = chrono::Duration::from_std(self.settings.ack_timeout) else {
            return Ok(0);
        };
        let expired: Vec<(JobId, Lease)> = self
            .schedule
            .lock()
            .await
            .leases
            .iter()
            .filter(|(_, held)| now - held.last_beat > timeout)
            .map(|(&id, &held)| (id, held))
            .collect();

        let mut reaped = 0;
        for (id, held) in expired {
            let silent_ms = (now - held.last_beat).num_milliseconds();
            let error = RenderError::WorkerLost(format!("no heartbeat for {silent_ms}ms"));
            match self.fail(id, held.id, error).await {
                Ok(_) => reaped += 1,
                Err(QueueError::StaleLease { .. } | QueueError::NotFound(_)) => {
                    self.schedule.lock().await.release(id, Some(held.id));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(reaped)
    }

    // -----------------------------------------------------------------------
    // Startup and introspection
    // -----------------------------------------------------------------------

    /// Rebuild the schedule from the table after a restart. Jobs left
    /// running by the previous process count as lost workers.
    pub async fn recover(&self) -> Result<RecoveryReport, QueueError> {
        let max_seq = self.table.max_seq().await?;
        self.seq.fetch_max(max_seq, Ordering::SeqCst);

        let mut report = RecoveryReport::default();
        for job in self.table.list_by_states(&ACTIVE_STATES).await? {
            match job.state {
                JobState::Queued => {
                    self.schedule.lock().await.ready.insert(ready_key(&job));
                    report.requeued += 1;
                }
                JobState::Retrying => {
                    let due = job.next_attempt_at.unwrap_or_else(|| self.clock.now());
                    self.schedule.lock().await.delayed.insert((due, job.seq, job.id));
                    report.retrying += 1;
                }
                JobState::Running => {
                    let error =
                        RenderError::WorkerLost("worker exited while the job was running".into());
                    self.settle_failure(job, error).await?;
                    report.orphaned += 1;
                }
                _ => {}
            }
        }
        if report != RecoveryReport::default() {
            self.wake.notify_one();
        }
        tracing::info!(
            requeued = report.requeued,
            retrying = report.retrying,
            orphaned = report.orphaned,
            "Job queue recovered",
        );
        Ok(report)
    }

    /// Ids of jobs whose files must survive a retention sweep.
    pub async fn active_job_ids(&self) -> Result<HashSet<JobId>, QueueError> {
        Ok(self
            .table
            .list_by_states(&ACTIVE_STATES)
            .await?
            .into_iter()
            .map(|job| job.id)
            .collect())
    }

    pub async fn depth(&self) -> QueueDepth {
        let schedule = self.schedule.lock().await;
        QueueDepth {
            running: schedule.leases.len(),
            queued: schedule.ready.len(),
            retrying: schedule.delayed.len(),
        }
    }
}
