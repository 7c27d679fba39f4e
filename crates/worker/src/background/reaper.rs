//! Lease reaper: reclaims running jobs whose heartbeat stopped.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::queue::JobQueue;

/// Run the reaper every `interval` until `cancel` is triggered.
pub async fn run(queue: Arc<JobQueue>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(
        interval_ms = interval.as_millis() as u64,
        ack_timeout_secs = queue.settings().ack_timeout.as_secs(),
        "Lease reaper started",
    );

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Lease reaper shutting down");
                break;
            }
            _ = ticker.tick() => match queue.reap_expired().await {
                Ok(0) => {}
                Ok(reaped) => tracing::warn!(reaped, "Reclaimed jobs with expired leases"),
                Err(e) => tracing::error!(error = %e, "Reaper cycle failed"),
            },
        }
    }
}
