//! Render job queue, worker pool, and the long-running worker service.

pub mod background;
pub mod config;
pub mod pool;
pub mod protocol;
pub mod queue;
pub mod retry;
pub mod service;

pub use config::{ConfigError, WorkerConfig};
pub use pool::{RenderHandler, WorkerPool};
pub use queue::{CancelOutcome, JobQueue, QueueError, QueueSettings};
pub use retry::{Backoff, RetryPolicy};
pub use service::{RenderService, SubmitResponse};
