//! Child-process plumbing for the render engine: process-group setup, memory
//! ceiling, group kill, and bounded output capture.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Maximum stdout or stderr size captured per stream (10 MiB).
///
/// Output past this limit is drained and discarded so the child never blocks
/// on a full pipe.
pub const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Bytes of stderr kept in a `RenderProcess` error message.
pub const STDERR_TAIL_BYTES: usize = 4 * 1024;

/// Place the child in its own process group and apply the address-space
/// ceiling, if any.
#[cfg(unix)]
pub fn isolate(cmd: &mut Command, max_memory_bytes: Option<u64>) {
    cmd.process_group(0);
    if let Some(limit) = max_memory_bytes {
        // SAFETY: the closure runs between fork and exec and only calls the
        // async-signal-safe `setrlimit`.
        unsafe {
            cmd.pre_exec(move || {
                let rlim = libc::rlimit {
                    rlim_cur: limit as libc::rlim_t,
                    rlim_max: limit as libc::rlim_t,
                };
                if libc::setrlimit(libc::RLIMIT_AS, &rlim) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }
}

#[cfg(not(unix))]
pub fn isolate(_cmd: &mut Command, _max_memory_bytes: Option<u64>) {}

/// SIGKILL every process in the group led by `pid`.
#[cfg(unix)]
pub fn kill_group(pid: u32) {
    // SAFETY: plain syscall; a missing group yields ESRCH, which is ignored.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!(pid, error = %err, "Failed to kill render process group");
        }
    }
}

#[cfg(not(unix))]
pub fn kill_group(_pid: u32) {}

/// Kills the engine's process group when dropped, including when the
/// attempt future is cancelled mid-render.
pub struct GroupGuard(Option<u32>);

impl GroupGuard {
    pub fn new(pid: Option<u32>) -> Self {
        Self(pid)
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pid) = self.0 {
            kill_group(pid);
        }
    }
}

/// Read a stream to the end, keeping at most [`MAX_OUTPUT_BYTES`].
pub async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
        let _ = tokio::io::copy(&mut h, &mut tokio::io::sink()).await;
    }
    buf
}

/// Last `max` bytes of `text`, cut on a char boundary.
pub fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
