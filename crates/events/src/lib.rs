//! Render pipeline event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`RenderEvent`]: job lifecycle transitions and pool health snapshots.
//! - [`EventJournal`]: background task that writes every event to the log.

pub mod bus;
pub mod journal;

pub use bus::{EventBus, PoolHealth, RenderEvent};
pub use journal::EventJournal;
