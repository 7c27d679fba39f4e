//! FFmpeg thumbnail extraction for rendered videos.

use std::path::{Path, PathBuf};

/// Default program name; overridable for hosts with ffmpeg outside `PATH`.
pub const FFMPEG_BIN: &str = "ffmpeg";

/// Offset into the video at which the thumbnail frame is grabbed.
pub const THUMBNAIL_OFFSET_SECS: f64 = 1.0;

/// Thumbnail size in pixels.
pub const THUMBNAIL_WIDTH: i32 = 480;
pub const THUMBNAIL_HEIGHT: i32 = 270;

/// Error type for FFmpeg operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("video file not found: {0}")]
    VideoNotFound(String),
}

/// Thumbnail path beside `video_path`: `<stem>.thumb.jpg`.
pub fn thumbnail_path(video_path: &Path) -> PathBuf {
    let stem = video_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    video_path.with_file_name(format!("{stem}.thumb.jpg"))
}

/// Extract a single frame as a JPEG thumbnail at the given timestamp.
pub async fn extract_frame_thumbnail(
    program: &str,
    video_path: &Path,
    output_path: &Path,
    timestamp_secs: f64,
    width: i32,
    height: i32,
) -> Result<(), FfmpegError> {
    if !video_path.exists() {
        return Err(FfmpegError::VideoNotFound(
            video_path.to_string_lossy().to_string(),
        ));
    }

    let output = tokio::process::Command::new(program)
        .args(["-y", "-ss", &format!("{timestamp_secs:.3}"), "-i"])
        .arg(video_path)
        .args([
            "-vframes",
            "1",
            "-s",
            &format!("{width}x{height}"),
            "-q:v",
            "2",
        ])
        .arg(output_path)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumbnail_sits_beside_video() {
        assert_eq!(
            thumbnail_path(Path::new("/out/abc/GraphScene.mp4")),
            PathBuf::from("/out/abc/GraphScene.thumb.jpg")
        );
    }

    #[tokio::test]
    async fn missing_video_is_reported() {
        let err = extract_frame_thumbnail(
            FFMPEG_BIN,
            Path::new("/nonexistent/video.mp4"),
            Path::new("/tmp/thumb.jpg"),
            THUMBNAIL_OFFSET_SECS,
            THUMBNAIL_WIDTH,
            THUMBNAIL_HEIGHT,
        )
        .await
        .expect_err("missing video");
        assert!(matches!(err, FfmpegError::VideoNotFound(_)));
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let dir = tempfile::tempdir().expect("tempdir");
        let video = dir.path().join("v.mp4");
        std::fs::write(&video, b"not a video").expect("write");
        // `false` ignores its arguments and exits 1.
        let err = extract_frame_thumbnail(
            "false",
            &video,
            &thumbnail_path(&video),
            0.0,
            THUMBNAIL_WIDTH,
            THUMBNAIL_HEIGHT,
        )
        .await
        .expect_err("false exits non-zero");
        assert!(matches!(err, FfmpegError::ExecutionFailed { exit_code: Some(1), .. }));
    }
}
