//! Report types for the retention sweep.

use serde::Serialize;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub files_removed: u64,
    pub bytes_reclaimed: u64,
    /// Stale files left in place because their job is still active.
    pub skipped_protected: u64,
    /// Files or directories that could not be removed.
    pub failures: u64,
}

impl SweepReport {
    pub fn merge(&mut self, other: SweepReport) {
        self.files_removed += other.files_removed;
        self.bytes_reclaimed += other.bytes_reclaimed;
        self.skipped_protected += other.skipped_protected;
        self.failures += other.failures;
    }
}

/// Human-readable byte formatting.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    const TB: f64 = GB * 1024.0;

    let b = bytes as f64;
    if b >= TB {
        format!("{:.2} TB", b / TB)
    } else if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.2} MB", b / MB)
    } else if b >= KB {
        format!("{:.2} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}
