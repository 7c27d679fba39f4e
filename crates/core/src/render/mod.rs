//! Render executor: one supervised invocation of the external engine.
//!
//! The engine runs in its own process group under a wall-clock deadline and
//! an optional address-space ceiling. On timeout the whole group is killed,
//! the child is reaped, and the job's media directory is removed so no
//! partial artifact survives. Retries are the queue's business; an executor
//! call is exactly one attempt.

mod artifact;
pub mod process;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::error::RenderError;
use crate::naming::output_dir_name;
use crate::request::QualityTier;
use crate::types::JobId;

pub use artifact::{find_artifact, ARTIFACT_EXTENSIONS};

/// Default wall-clock budget for one render (10 minutes).
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(600);

/// Flag telling the engine where to write media.
const MEDIA_DIR_FLAG: &str = "--media_dir";

/// Static engine configuration shared by every invocation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine executable, resolved through `PATH` when not absolute.
    pub program: String,
    /// Arguments inserted before the quality flag.
    pub extra_args: Vec<String>,
    /// Working directory of the engine; scripts live here.
    pub scripts_root: PathBuf,
    /// Parent of the per-job media directories.
    pub output_root: PathBuf,
    pub timeout: Duration,
    /// `RLIMIT_AS` for the engine process, when set.
    pub max_memory_bytes: Option<u64>,
}

impl EngineConfig {
    pub fn new(
        program: impl Into<String>,
        scripts_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
            scripts_root: scripts_root.into(),
            output_root: output_root.into(),
            timeout: DEFAULT_RENDER_TIMEOUT,
            max_memory_bytes: None,
        }
    }
}

/// What to render.
#[derive(Debug, Clone)]
pub struct RenderInvocation {
    pub job_id: JobId,
    pub script_path: PathBuf,
    pub scene_name: String,
    pub quality: QualityTier,
}

/// A successful render.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    /// The rendered video file.
    pub artifact: PathBuf,
    /// The job's media directory (parent of everything the engine wrote).
    pub media_dir: PathBuf,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RenderExecutor {
    config: EngineConfig,
}

impl RenderExecutor {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Media directory owned by `job_id`.
    pub fn media_dir(&self, job_id: &JobId) -> PathBuf {
        self.config.output_root.join(output_dir_name(job_id))
    }

    /// Argument vector after the program name.
    fn args(&self, invocation: &RenderInvocation, media_dir: &Path) -> Vec<String> {
        let mut args = self.config.extra_args.clone();
        args.push(invocation.quality.engine_flag().to_string());
        args.push(invocation.script_path.display().to_string());
        args.push(invocation.scene_name.clone());
        args.push(MEDIA_DIR_FLAG.to_string());
        args.push(media_dir.display().to_string());
        args
    }

    /// Run the engine once and locate the rendered artifact.
    pub async fn execute(&self, invocation: &RenderInvocation) -> Result<RenderOutput, RenderError> {
        let job_id = invocation.job_id;
        let media_dir = self.media_dir(&job_id);
        reset_dir(&media_dir).await.map_err(|e| RenderError::RenderProcess {
            exit_code: None,
            stderr: format!("could not prepare media dir {}: {e}", media_dir.display()),
        })?;

        let args = self.args(invocation, &media_dir);
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&args)
            .current_dir(&self.config.scripts_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        process::isolate(&mut cmd, self.config.max_memory_bytes);

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| RenderError::RenderProcess {
            exit_code: None,
            stderr: format!("failed to spawn {}: {e}", self.config.program),
        })?;
        let pid = child.id();
        let _group = process::GroupGuard::new(pid);
        tracing::info!(
            job_id = %job_id,
            pid = ?pid,
            program = %self.config.program,
            scene_name = %invocation.scene_name,
            quality = %invocation.quality,
            "Render engine started",
        );

        let stdout_task = tokio::spawn(process::read_stream(child.stdout.take()));
        let stderr_task = tokio::spawn(process::read_stream(child.stderr.take()));

        let status = match tokio::time::timeout(self.config.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                if let Some(pid) = pid {
                    process::kill_group(pid);
                }
                stdout_task.abort();
                stderr_task.abort();
                return Err(RenderError::RenderProcess {
                    exit_code: None,
                    stderr: format!("failed to wait for engine: {e}"),
                });
            }
            Err(_elapsed) => {
                if let Some(pid) = pid {
                    process::kill_group(pid);
                }
                // Reap; the group is already dead so this returns promptly.
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                if let Err(e) = remove_dir(&media_dir).await {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to remove partial media");
                }
                tracing::warn!(
                    job_id = %job_id,
                    timeout_secs = self.config.timeout.as_secs(),
                    "Render timed out, process group killed",
                );
                return Err(RenderError::RenderTimeout {
                    timeout_secs: self.config.timeout.as_secs(),
                });
            }
        };

        // Stray descendants would otherwise hold the output pipes open.
        if let Some(pid) = pid {
            process::kill_group(pid);
        }
        let duration_ms = start.elapsed().as_millis() as u64;
        let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();

        if !status.success() {
            tracing::warn!(
                job_id = %job_id,
                exit_code = ?status.code(),
                duration_ms,
                "Render engine failed",
            );
            return Err(RenderError::RenderProcess {
                exit_code: status.code(),
                stderr: process::tail(&stderr, process::STDERR_TAIL_BYTES).to_string(),
            });
        }

        let artifact = find_artifact(&media_dir, &invocation.scene_name)
            .await
            .ok_or_else(|| RenderError::ArtifactNotFound {
                scene_name: invocation.scene_name.clone(),
                dir: media_dir.display().to_string(),
            })?;
        tracing::info!(
            job_id = %job_id,
            artifact = %artifact.display(),
            duration_ms,
            "Render engine finished",
        );
        Ok(RenderOutput {
            artifact,
            media_dir,
            stdout,
            stderr,
            duration_ms,
        })
    }
}

/// Remove `dir` and everything under it; a missing dir is fine.
pub async fn remove_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Start each attempt from an empty media directory.
async fn reset_dir(dir: &Path) -> std::io::Result<()> {
    remove_dir(dir).await?;
    tokio::fs::create_dir_all(dir).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
