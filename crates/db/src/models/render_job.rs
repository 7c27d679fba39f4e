//! Render job record and its externally visible snapshot.

use std::path::PathBuf;

use reelsmith_core::error::ErrorKind;
use reelsmith_core::request::RenderRequest;
use reelsmith_core::storage::ResultReference;
use reelsmith_core::types::{JobId, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::JobState;

/// Ownership token minted when a worker claims a job.
pub type LeaseId = Uuid;

/// A render job as persisted in the job table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderJob {
    pub id: JobId,
    pub request: RenderRequest,
    pub state: JobState,
    pub priority: i32,
    /// Monotonic submission order; ties within a priority go to the lower seq.
    pub seq: i64,
    /// Attempts started so far.
    pub attempt: u32,
    pub max_attempts: u32,
    pub submitted_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    /// Earliest time a `retrying` job becomes eligible again.
    pub next_attempt_at: Option<Timestamp>,
    pub lease: Option<LeaseId>,
    pub script_path: Option<PathBuf>,
    /// Locally cached render output, reused when only storage failed.
    pub rendered_artifact: Option<PathBuf>,
    pub last_error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub result: Option<ResultReference>,
}

impl RenderJob {
    /// A fresh `queued` job with no attempts.
    pub fn new(
        id: JobId,
        request: RenderRequest,
        priority: i32,
        seq: i64,
        max_attempts: u32,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            request,
            state: JobState::Queued,
            priority,
            seq,
            attempt: 0,
            max_attempts,
            submitted_at: now,
            started_at: None,
            completed_at: None,
            next_attempt_at: None,
            lease: None,
            script_path: None,
            rendered_artifact: None,
            last_error: None,
            error_kind: None,
            result: None,
        }
    }

    /// The state/lease pair a compare-and-swap must match to replace this
    /// record.
    pub fn guard(&self) -> StateGuard {
        StateGuard {
            state: self.state,
            lease: self.lease,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Expected current state and lease of a job for a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateGuard {
    pub state: JobState,
    pub lease: Option<LeaseId>,
}

impl StateGuard {
    pub fn matches(&self, job: &RenderJob) -> bool {
        job.state == self.state && job.lease == self.lease
    }
}

/// External view of a job returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub state: JobState,
    pub attempt: u32,
    pub max_attempts: u32,
    pub result: Option<ResultReference>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub submitted_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub next_attempt_at: Option<Timestamp>,
}

impl From<&RenderJob> for JobSnapshot {
    fn from(job: &RenderJob) -> Self {
        Self {
            job_id: job.id,
            state: job.state,
            attempt: job.attempt,
            max_attempts: job.max_attempts,
            result: job.result.clone(),
            error: job.last_error.clone(),
            error_kind: job.error_kind,
            submitted_at: job.submitted_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            next_attempt_at: job.next_attempt_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use reelsmith_core::request::SceneType;

    use super::*;

    #[test]
    fn new_job_is_queued_without_attempts() {
        let job = RenderJob::new(
            JobId::new_v4(),
            RenderRequest::new(SceneType::Generic, "Intro", "college"),
            0,
            1,
            3,
            Utc::now(),
        );
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.attempt, 0);
        assert!(job.lease.is_none());
        assert!(job.guard().matches(&job));
    }

    #[test]
    fn guard_checks_lease() {
        let mut job = RenderJob::new(
            JobId::new_v4(),
            RenderRequest::new(SceneType::Generic, "Intro", "college"),
            0,
            1,
            3,
            Utc::now(),
        );
        let guard = StateGuard {
            state: JobState::Running,
            lease: Some(Uuid::new_v4()),
        };
        job.state = JobState::Running;
        job.lease = Some(Uuid::new_v4());
        assert!(!guard.matches(&job));
        job.lease = guard.lease;
        assert!(guard.matches(&job));
    }

    #[test]
    fn snapshot_copies_outcome_fields() {
        let mut job = RenderJob::new(
            JobId::new_v4(),
            RenderRequest::new(SceneType::Generic, "Intro", "college"),
            0,
            1,
            3,
            Utc::now(),
        );
        job.state = JobState::Failed;
        job.attempt = 3;
        job.last_error = Some("RenderProcessError: boom".into());
        job.error_kind = Some(ErrorKind::RenderProcess);
        let snap = JobSnapshot::from(&job);
        assert_eq!(snap.job_id, job.id);
        assert_eq!(snap.attempt, 3);
        assert_eq!(snap.error.as_deref(), Some("RenderProcessError: boom"));
    }
}
