//! Periodic pool health snapshots on the event bus.

use std::sync::Arc;
use std::time::Duration;

use reelsmith_events::RenderEvent;
use tokio_util::sync::CancellationToken;

use crate::pool::WorkerPool;

/// Default interval between health snapshots.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

pub async fn run(pool: Arc<WorkerPool>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = interval.as_secs(), "Health publisher started");

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Health publisher shutting down");
                break;
            }
            _ = ticker.tick() => {
                let health = pool.health().await;
                pool.queue().bus().publish(RenderEvent::Health(health));
            }
        }
    }
}
