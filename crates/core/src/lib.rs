//! Render-job domain logic.
//!
//! Everything in this crate is free of database and network access: request
//! types, the error taxonomy, script generation, render subprocess
//! supervision, and the retention sweep over the scripts/output directories.

pub mod clock;
pub mod error;
pub mod ffmpeg;
pub mod hashing;
pub mod naming;
pub mod reclamation;
pub mod render;
pub mod request;
pub mod script;
pub mod storage;
pub mod types;

pub use error::{ErrorKind, RenderError};
pub use request::{RenderRequest, SceneType};
pub use storage::{BackendKind, ResultReference};
