//! In-process job table for tests and single-node deployments without
//! persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use reelsmith_core::types::JobId;
use tokio::sync::RwLock;

use crate::models::render_job::{RenderJob, StateGuard};
use crate::models::status::JobState;
use crate::table::{check_id, JobTable, JobTableError};

#[derive(Debug, Default)]
pub struct InMemoryJobTable {
    jobs: RwLock<HashMap<JobId, RenderJob>>,
}

impl InMemoryJobTable {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobTable for InMemoryJobTable {
    async fn get(&self, id: JobId) -> Result<Option<RenderJob>, JobTableError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn put(&self, job: &RenderJob) -> Result<(), JobTableError> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn compare_and_swap_state(
        &self,
        id: JobId,
        expected: StateGuard,
        next: &RenderJob,
    ) -> Result<bool, JobTableError> {
        check_id(id, next)?;
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(current) if expected.matches(current) => {
                *current = next.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_by_states(&self, states: &[JobState]) -> Result<Vec<RenderJob>, JobTableError> {
        let mut jobs: Vec<RenderJob> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| states.contains(&job.state))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.seq);
        Ok(jobs)
    }

    async fn max_seq(&self) -> Result<i64, JobTableError> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .map(|job| job.seq)
            .max()
            .unwrap_or(0))
    }
}
