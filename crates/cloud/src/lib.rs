//! Artifact storage backends.
//!
//! A [`StorageBackend`] persists a rendered file under
//! `renders/<job_id>/<file name>` and hands back a [`ResultReference`]. The
//! backend is chosen once from static configuration via [`build_backend`].
//!
//! [`ResultReference`]: reelsmith_core::storage::ResultReference

pub mod backend;
pub mod config;
pub mod local;
pub mod object_store;

pub use backend::{StorageBackend, StorageError};
pub use config::{build_backend, StorageConfig, DEFAULT_URL_EXPIRY, MAX_URL_EXPIRY};
pub use local::LocalBackend;
pub use object_store::ObjectStoreBackend;
