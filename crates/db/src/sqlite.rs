//! SQLite-backed job table (`render_jobs`).

use std::path::PathBuf;

use async_trait::async_trait;
use reelsmith_core::error::ErrorKind;
use reelsmith_core::types::{JobId, Timestamp};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::render_job::{RenderJob, StateGuard};
use crate::models::status::JobState;
use crate::table::{check_id, JobTable, JobTableError};
use crate::DbPool;

/// Column list for `render_jobs` queries.
const COLUMNS: &str = "\
    id, seq, priority, state, attempt, max_attempts, request, \
    submitted_at, started_at, completed_at, next_attempt_at, \
    lease, script_path, rendered_artifact, last_error, error_kind, result";

/// Raw `render_jobs` row.
#[derive(Debug, FromRow)]
struct RenderJobRow {
    id: String,
    seq: i64,
    priority: i64,
    state: String,
    attempt: i64,
    max_attempts: i64,
    request: String,
    submitted_at: Timestamp,
    started_at: Option<Timestamp>,
    completed_at: Option<Timestamp>,
    next_attempt_at: Option<Timestamp>,
    lease: Option<String>,
    script_path: Option<String>,
    rendered_artifact: Option<String>,
    last_error: Option<String>,
    error_kind: Option<String>,
    result: Option<String>,
}

impl TryFrom<RenderJobRow> for RenderJob {
    type Error = JobTableError;

    fn try_from(row: RenderJobRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| JobTableError::Corrupt {
            id: row.id.clone(),
            reason,
        };
        let id = Uuid::parse_str(&row.id).map_err(|e| corrupt(format!("id: {e}")))?;
        let state = JobState::from_name(&row.state)
            .ok_or_else(|| corrupt(format!("unknown state '{}'", row.state)))?;
        let lease = row
            .lease
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()
            .map_err(|e| corrupt(format!("lease: {e}")))?;
        let error_kind = match row.error_kind.as_deref() {
            Some(name) => Some(
                ErrorKind::from_name(name)
                    .ok_or_else(|| corrupt(format!("unknown error kind '{name}'")))?,
            ),
            None => None,
        };
        let result = row.result.as_deref().map(serde_json::from_str).transpose()?;

        Ok(RenderJob {
            id,
            request: serde_json::from_str(&row.request)?,
            state,
            priority: i32::try_from(row.priority).map_err(|e| corrupt(format!("priority: {e}")))?,
            seq: row.seq,
            attempt: u32::try_from(row.attempt).map_err(|e| corrupt(format!("attempt: {e}")))?,
            max_attempts: u32::try_from(row.max_attempts)
                .map_err(|e| corrupt(format!("max_attempts: {e}")))?,
            submitted_at: row.submitted_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            next_attempt_at: row.next_attempt_at,
            lease,
            script_path: row.script_path.map(PathBuf::from),
            rendered_artifact: row.rendered_artifact.map(PathBuf::from),
            last_error: row.last_error,
            error_kind,
            result,
        })
    }
}

/// Serialized column values of a job, in [`COLUMNS`] order minus `id`.
struct Encoded {
    request: String,
    result: Option<String>,
    lease: Option<String>,
    script_path: Option<String>,
    rendered_artifact: Option<String>,
}

impl Encoded {
    fn new(job: &RenderJob) -> Result<Self, JobTableError> {
        Ok(Self {
            request: serde_json::to_string(&job.request)?,
            result: job.result.as_ref().map(serde_json::to_string).transpose()?,
            lease: job.lease.map(|l| l.to_string()),
            script_path: job.script_path.as_ref().map(|p| p.display().to_string()),
            rendered_artifact: job
                .rendered_artifact
                .as_ref()
                .map(|p| p.display().to_string()),
        })
    }
}

/// Job table stored in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteJobTable {
    pool: DbPool,
}

impl SqliteJobTable {
    /// Wrap a pool whose schema is already migrated.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl JobTable for SqliteJobTable {
    async fn get(&self, id: JobId) -> Result<Option<RenderJob>, JobTableError> {
        let query = format!("SELECT {COLUMNS} FROM render_jobs WHERE id = ?");
        let row = sqlx::query_as::<_, RenderJobRow>(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(RenderJob::try_from).transpose()
    }

    async fn put(&self, job: &RenderJob) -> Result<(), JobTableError> {
        let enc = Encoded::new(job)?;
        let query = format!(
            "INSERT OR REPLACE INTO render_jobs ({COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&query)
            .bind(job.id.to_string())
            .bind(job.seq)
            .bind(i64::from(job.priority))
            .bind(job.state.as_str())
            .bind(i64::from(job.attempt))
            .bind(i64::from(job.max_attempts))
            .bind(&enc.request)
            .bind(job.submitted_at)
            .bind(job.started_at)
            .bind(job.completed_at)
            .bind(job.next_attempt_at)
            .bind(&enc.lease)
            .bind(&enc.script_path)
            .bind(&enc.rendered_artifact)
            .bind(&job.last_error)
            .bind(job.error_kind.map(ErrorKind::as_str))
            .bind(&enc.result)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn compare_and_swap_state(
        &self,
        id: JobId,
        expected: StateGuard,
        next: &RenderJob,
    ) -> Result<bool, JobTableError> {
        check_id(id, next)?;
        let enc = Encoded::new(next)?;
        let done = sqlx::query(
            "UPDATE render_jobs \
             SET seq = ?, priority = ?, state = ?, attempt = ?, max_attempts = ?, request = ?, \
                 submitted_at = ?, started_at = ?, completed_at = ?, next_attempt_at = ?, \
                 lease = ?, script_path = ?, rendered_artifact = ?, last_error = ?, \
                 error_kind = ?, result = ? \
             WHERE id = ? AND state = ? AND lease IS ?",
        )
        .bind(next.seq)
        .bind(i64::from(next.priority))
        .bind(next.state.as_str())
        .bind(i64::from(next.attempt))
        .bind(i64::from(next.max_attempts))
        .bind(&enc.request)
        .bind(next.submitted_at)
        .bind(next.started_at)
        .bind(next.completed_at)
        .bind(next.next_attempt_at)
        .bind(&enc.lease)
        .bind(&enc.script_path)
        .bind(&enc.rendered_artifact)
        .bind(&next.last_error)
        .bind(next.error_kind.map(ErrorKind::as_str))
        .bind(&enc.result)
        .bind(id.to_string())
        .bind(expected.state.as_str())
        .bind(expected.lease.map(|l| l.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn list_by_states(&self, states: &[JobState]) -> Result<Vec<RenderJob>, JobTableError> {
        if states.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; states.len()].join(", ");
        let query = format!(
            "SELECT {COLUMNS} FROM render_jobs WHERE state IN ({placeholders}) ORDER BY seq ASC"
        );
        let mut q = sqlx::query_as::<_, RenderJobRow>(&query);
        for state in states {
            q = q.bind(state.as_str());
        }
        q.fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(RenderJob::try_from)
            .collect()
    }

    async fn max_seq(&self) -> Result<i64, JobTableError> {
        let (max,): (Option<i64>,) = sqlx::query_as("SELECT MAX(seq) FROM render_jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(max.unwrap_or(0))
    }
}
