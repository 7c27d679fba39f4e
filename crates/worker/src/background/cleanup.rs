//! Periodic retention sweep over the scripts and output directories.
//!
//! The set of active jobs is fetched from the queue right before each sweep
//! so files of jobs that are queued, backing off, or running are never
//! removed.

use std::sync::Arc;
use std::time::Duration;

use reelsmith_core::reclamation::{format_bytes, SweepReport, Sweeper};
use tokio_util::sync::CancellationToken;

use crate::queue::JobQueue;

/// How often the sweep runs by default.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600); // 1 hour

/// Run the cleanup loop until `cancel` is triggered. The first sweep runs
/// immediately.
pub async fn run(
    queue: Arc<JobQueue>,
    sweeper: Sweeper,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(interval_secs = interval.as_secs(), "Retention cleanup started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Retention cleanup stopping");
                break;
            }
            _ = ticker.tick() => {
                sweep_once(&queue, &sweeper).await;
            }
        }
    }
}

/// One sweep protected by the current active-job set. `None` when the sweep
/// could not run.
pub async fn sweep_once(queue: &JobQueue, sweeper: &Sweeper) -> Option<SweepReport> {
    let protected = match queue.active_job_ids().await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::error!(error = %e, "Retention cleanup: could not load active jobs, skipping");
            return None;
        }
    };
    match sweeper.sweep(&protected).await {
        Ok(report) => {
            tracing::debug!(
                protected = protected.len(),
                reclaimed = %format_bytes(report.bytes_reclaimed),
                "Retention cleanup: sweep finished",
            );
            Some(report)
        }
        Err(e) => {
            tracing::error!(error = %e, "Retention cleanup: sweep failed");
            None
        }
    }
}
