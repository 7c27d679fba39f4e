//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the queue (which
//! publishes every state transition), the health publisher, and any number
//! of subscribers.

use reelsmith_core::error::ErrorKind;
use reelsmith_core::storage::ResultReference;
use reelsmith_core::types::{JobId, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// RenderEvent
// ---------------------------------------------------------------------------

/// Worker pool occupancy at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolHealth {
    /// Maximum concurrent renders.
    pub capacity: usize,
    pub running: usize,
    /// Jobs eligible to run now.
    pub queued: usize,
    /// Jobs waiting out a retry backoff.
    pub retrying: usize,
    pub at: Timestamp,
}

impl PoolHealth {
    /// Free worker slots.
    pub fn idle(&self) -> usize {
        self.capacity.saturating_sub(self.running)
    }
}

/// Something that happened to a render job or the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RenderEvent {
    Submitted {
        job_id: JobId,
        at: Timestamp,
    },
    Started {
        job_id: JobId,
        attempt: u32,
        at: Timestamp,
    },
    Retrying {
        job_id: JobId,
        attempt: u32,
        error: String,
        next_attempt_at: Timestamp,
    },
    Succeeded {
        job_id: JobId,
        attempt: u32,
        result: ResultReference,
    },
    Failed {
        job_id: JobId,
        attempt: u32,
        error_kind: ErrorKind,
        error: String,
    },
    Cancelled {
        job_id: JobId,
    },
    Health(PoolHealth),
}

impl RenderEvent {
    /// Dot-separated event name, e.g. `"job.succeeded"`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submitted { .. } => "job.submitted",
            Self::Started { .. } => "job.started",
            Self::Retrying { .. } => "job.retrying",
            Self::Succeeded { .. } => "job.succeeded",
            Self::Failed { .. } => "job.failed",
            Self::Cancelled { .. } => "job.cancelled",
            Self::Health(_) => "pool.health",
        }
    }

    /// The job the event concerns, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::Submitted { job_id, .. }
            | Self::Started { job_id, .. }
            | Self::Retrying { job_id, .. }
            | Self::Succeeded { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::Cancelled { job_id } => Some(*job_id),
            Self::Health(_) => None,
        }
    }

    /// Whether this event ends the job's life.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use reelsmith_events::bus::{EventBus, RenderEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(RenderEvent::Cancelled { job_id: uuid::Uuid::nil() });
/// ```
pub struct EventBus {
    sender: broadcast::Sender<RenderEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: RenderEvent) {
        // A send error only means there are no receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<RenderEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let job_id = JobId::new_v4();

        bus.publish(RenderEvent::Started {
            job_id,
            attempt: 1,
            at: Utc::now(),
        });

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.name(), "job.started");
        assert_eq!(received.job_id(), Some(job_id));
        assert!(!received.is_terminal());
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let job_id = JobId::new_v4();
        bus.publish(RenderEvent::Cancelled { job_id });

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");
        assert_eq!(e1, e2);
        assert!(e1.is_terminal());
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(RenderEvent::Cancelled {
            job_id: JobId::new_v4(),
        });
    }

    #[test]
    fn events_serialize_with_tag() {
        let health = PoolHealth {
            capacity: 4,
            running: 1,
            queued: 2,
            retrying: 0,
            at: Utc::now(),
        };
        assert_eq!(health.idle(), 3);
        let json = serde_json::to_value(RenderEvent::Health(health)).expect("serialize");
        assert_eq!(json["event"], "health");
        assert_eq!(json["capacity"], 4);
        assert_eq!(RenderEvent::Health(health).job_id(), None);
    }
}
