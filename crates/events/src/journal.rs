//! Event journal: writes every bus event to the structured log.
//!
//! [`EventJournal`] subscribes to the [`EventBus`](crate::bus::EventBus)
//! broadcast channel and logs each [`RenderEvent`] with its job id and a
//! JSON payload. It runs as a long-lived background task and exits when the
//! bus is dropped.

use tokio::sync::broadcast;

use crate::bus::RenderEvent;

/// Background service that journals render events.
pub struct EventJournal;

impl EventJournal {
    /// Run the journal loop. Returns the number of events written once the
    /// channel closes.
    pub async fn run(mut receiver: broadcast::Receiver<RenderEvent>) -> u64 {
        let mut written = 0u64;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    Self::write(&event);
                    written += 1;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event journal lagged, some events were not logged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!(written, "Event bus closed, journal shutting down");
                    break;
                }
            }
        }
        written
    }

    fn write(event: &RenderEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        match event {
            // Health snapshots are periodic; keep them out of info-level logs.
            RenderEvent::Health(_) => {
                tracing::debug!(event = event.name(), payload = %payload, "Render event");
            }
            _ => {
                tracing::info!(
                    event = event.name(),
                    job_id = ?event.job_id(),
                    payload = %payload,
                    "Render event",
                );
            }
        }
    }
}
