//! Locating the rendered video in a job's media directory.

use std::path::{Path, PathBuf};

/// Video extensions the engine may produce.
pub const ARTIFACT_EXTENSIONS: [&str; 2] = ["mp4", "mov"];

/// First file (in sorted path order) under `dir` whose name contains
/// `scene_name` and whose extension is a video extension.
///
/// Partial segments the engine writes into per-scene subdirectories have
/// hashed names and never match.
pub async fn find_artifact(dir: &Path, scene_name: &str) -> Option<PathBuf> {
    let mut matches = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&current).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() && is_artifact(&path, scene_name) {
                matches.push(path);
            }
        }
    }
    matches.sort();
    matches.into_iter().next()
}

fn is_artifact(path: &Path, scene_name: &str) -> bool {
    let name_matches = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.contains(scene_name));
    let ext_matches = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| ARTIFACT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
    name_matches && ext_matches
}
