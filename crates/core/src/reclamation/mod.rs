//! Retention sweep over the scripts and output directories.
//!
//! Pure filesystem logic; the caller supplies the set of job ids that are
//! still active (queued, retrying or running) and the sweeper never touches
//! anything attributed to them. Time comes from an injected [`Clock`] so the
//! age policy is testable without sleeping.

pub mod types;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::naming::{job_id_from_output_dir, job_id_from_script_name};
use crate::types::JobId;

pub use types::{format_bytes, SweepReport};

/// Domain errors for the reclamation subsystem.
#[derive(Debug, thiserror::Error)]
pub enum ReclamationError {
    #[error("Cannot read sweep root {path}: {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Removes stale per-job files from the scripts and output roots.
pub struct Sweeper {
    scripts_root: PathBuf,
    output_root: PathBuf,
    max_age: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("scripts_root", &self.scripts_root)
            .field("output_root", &self.output_root)
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

/// A file or directory found while walking a root.
struct Entry {
    path: PathBuf,
    modified: Option<DateTime<Utc>>,
    len: u64,
}

impl Sweeper {
    pub fn new(
        scripts_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        max_age: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scripts_root: scripts_root.into(),
            output_root: output_root.into(),
            max_age,
            clock,
        }
    }

    /// One pass over both roots. Missing roots are treated as empty.
    pub async fn sweep(&self, protected: &HashSet<JobId>) -> Result<SweepReport, ReclamationError> {
        let mut report = SweepReport::default();
        self.sweep_scripts(protected, &mut report).await?;
        self.sweep_outputs(protected, &mut report).await?;
        tracing::info!(
            files_removed = report.files_removed,
            reclaimed = %format_bytes(report.bytes_reclaimed),
            skipped_protected = report.skipped_protected,
            failures = report.failures,
            "Retention sweep finished",
        );
        Ok(report)
    }

    /// Scripts are attributed by file name (`job_<uuid>.py`).
    async fn sweep_scripts(
        &self,
        protected: &HashSet<JobId>,
        report: &mut SweepReport,
    ) -> Result<(), ReclamationError> {
        let Some((files, _dirs)) = walk(&self.scripts_root, report).await? else {
            return Ok(());
        };
        for file in files {
            let job = file
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(job_id_from_script_name);
            self.consider_file(&file, job, protected, report).await;
        }
        Ok(())
    }

    /// Outputs are attributed by their first path component (`<uuid>/…`).
    async fn sweep_outputs(
        &self,
        protected: &HashSet<JobId>,
        report: &mut SweepReport,
    ) -> Result<(), ReclamationError> {
        let Some((files, mut dirs)) = walk(&self.output_root, report).await? else {
            return Ok(());
        };
        for file in &files {
            let job = self.output_owner(&file.path);
            self.consider_file(file, job, protected, report).await;
        }

        // Deepest first so parents see their children already gone.
        dirs.sort_by_key(|d| std::cmp::Reverse(d.path.components().count()));
        for dir in dirs {
            let job = self.output_owner(&dir.path);
            if job.is_some_and(|id| protected.contains(&id)) || !self.is_stale(&dir) {
                continue;
            }
            if !is_empty_dir(&dir.path).await {
                continue;
            }
            match tokio::fs::remove_dir(&dir.path).await {
                Ok(()) => {
                    tracing::debug!(path = %dir.path.display(), "Removed empty output directory");
                }
                Err(e) => {
                    tracing::warn!(path = %dir.path.display(), error = %e, "Failed to remove directory");
                    report.failures += 1;
                }
            }
        }
        Ok(())
    }

    fn output_owner(&self, path: &Path) -> Option<JobId> {
        let relative = path.strip_prefix(&self.output_root).ok()?;
        let first = relative.components().next()?;
        job_id_from_output_dir(first.as_os_str().to_str()?)
    }

    fn is_stale(&self, entry: &Entry) -> bool {
        let Some(modified) = entry.modified else {
            return false;
        };
        let Ok(max_age) = chrono::Duration::from_std(self.max_age) else {
            return false;
        };
        self.clock.now() - modified > max_age
    }

    async fn consider_file(
        &self,
        file: &Entry,
        job: Option<JobId>,
        protected: &HashSet<JobId>,
        report: &mut SweepReport,
    ) {
        if !self.is_stale(file) {
            return;
        }
        if let Some(id) = job.filter(|id| protected.contains(id)) {
            tracing::debug!(job_id = %id, path = %file.path.display(), "Skipping file of active job");
            report.skipped_protected += 1;
            return;
        }
        match tokio::fs::remove_file(&file.path).await {
            Ok(()) => {
                report.files_removed += 1;
                report.bytes_reclaimed += file.len;
            }
            Err(e) => {
                tracing::warn!(path = %file.path.display(), error = %e, "Failed to remove stale file");
                report.failures += 1;
            }
        }
    }
}

/// All files and directories (excluding `root`) under `root`. `None` when
/// `root` does not exist. Unreadable subdirectories count as failures.
async fn walk(
    root: &Path,
    report: &mut SweepReport,
) -> Result<Option<(Vec<Entry>, Vec<Entry>)>, ReclamationError> {
    match tokio::fs::metadata(root).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ReclamationError::RootUnreadable {
                path: root.to_path_buf(),
                source,
            })
        }
    }

    let mut files = Vec::new();
    let mut dirs = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(source) if current.as_path() == root => {
                return Err(ReclamationError::RootUnreadable {
                    path: root.to_path_buf(),
                    source,
                })
            }
            Err(e) => {
                tracing::warn!(path = %current.display(), error = %e, "Failed to read directory");
                report.failures += 1;
                continue;
            }
        };
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(path = %current.display(), error = %e, "Failed to list directory");
                    report.failures += 1;
                    break;
                }
            };
            let path = entry.path();
            // symlink_metadata: links are swept as files, never followed.
            let meta = match tokio::fs::symlink_metadata(&path).await {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to stat entry");
                    report.failures += 1;
                    continue;
                }
            };
            let item = Entry {
                path: path.clone(),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
                len: meta.len(),
            };
            if meta.is_dir() {
                pending.push(path);
                dirs.push(item);
            } else {
                files.push(item);
            }
        }
    }
    Ok(Some((files, dirs)))
}

async fn is_empty_dir(path: &Path) -> bool {
    match tokio::fs::read_dir(path).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
