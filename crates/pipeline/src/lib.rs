//! One render attempt, end to end.
//!
//! [`RenderPipeline::run`] takes a claimed job through script → render →
//! store → thumbnail → script retention. It never retries; the queue decides
//! what a failure means.

pub mod pipeline;
pub mod retention;

pub use pipeline::{AttemptObserver, NoopObserver, RenderPipeline, ThumbnailSettings};
pub use retention::ScriptRetention;
