//! The job table abstraction.
//!
//! Every state transition goes through [`JobTable::compare_and_swap_state`]:
//! a write lands only if the stored job is still in the expected state under
//! the expected lease. That single discipline keeps two workers from ever
//! owning the same job and lets stale reports be rejected.

use async_trait::async_trait;
use reelsmith_core::types::JobId;

use crate::models::render_job::{RenderJob, StateGuard};
use crate::models::status::JobState;

#[derive(Debug, thiserror::Error)]
pub enum JobTableError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A stored row could not be mapped back to a job.
    #[error("corrupt job row {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("job {0} does not exist")]
    NotFound(JobId),

    #[error("job id mismatch: guarded {expected}, record {actual}")]
    IdMismatch { expected: JobId, actual: JobId },
}

#[async_trait]
pub trait JobTable: Send + Sync {
    async fn get(&self, id: JobId) -> Result<Option<RenderJob>, JobTableError>;

    /// Insert or overwrite unconditionally. Used for creation.
    async fn put(&self, job: &RenderJob) -> Result<(), JobTableError>;

    /// Replace the stored job with `next` iff its state and lease match
    /// `expected`. Returns whether the write happened.
    async fn compare_and_swap_state(
        &self,
        id: JobId,
        expected: StateGuard,
        next: &RenderJob,
    ) -> Result<bool, JobTableError>;

    /// Jobs in any of `states`, ascending by `seq`.
    async fn list_by_states(&self, states: &[JobState]) -> Result<Vec<RenderJob>, JobTableError>;

    /// Highest `seq` stored, or 0 for an empty table.
    async fn max_seq(&self) -> Result<i64, JobTableError>;
}

/// Reject a CAS whose replacement record names a different job.
pub(crate) fn check_id(id: JobId, next: &RenderJob) -> Result<(), JobTableError> {
    if next.id != id {
        return Err(JobTableError::IdMismatch {
            expected: id,
            actual: next.id,
        });
    }
    Ok(())
}
