//! Child process runner shared by direct dispatch and the sandbox gateway.
//!
//! The child gets a null stdin, piped stdout/stderr, and its own process
//! group so a timeout can take down everything it spawned.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// What to spawn.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Overlaid on the inherited environment.
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
}

/// What came back. Streams are decoded lossily as UTF-8.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
    /// Failures while draining a stream. What was read before the failure
    /// is kept.
    pub read_errors: Vec<String>,
}

async fn read_all<R: AsyncRead + Unpin>(
    name: &str,
    reader: Option<R>,
) -> (Vec<u8>, Option<String>) {
    let mut buf = Vec::new();
    let Some(mut r) = reader else {
        return (buf, None);
    };
    match r.read_to_end(&mut buf).await {
        Ok(_) => (buf, None),
        Err(e) => {
            tracing::debug!(stream = name, error = %e, "stream read failed");
            (buf, Some(format!("{name} read failed: {e}")))
        }
    }
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        // SAFETY: signalling a process group we created has no memory effects.
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

/// Spawn and wait, bounded by `spec.timeout`. `Err` only when the process
/// could not be started.
pub async fn run(spec: &ProcessSpec) -> io::Result<ProcessOutput> {
    let start = Instant::now();

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(ref dir) = spec.cwd {
        cmd.current_dir(dir);
    }
    cmd.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    #[cfg(unix)]
    {
        // SAFETY: setpgid is async-signal-safe and only changes the process group.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setpgid(0, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    let mut child = cmd.spawn()?;
    let pid = child.id();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let collected = tokio::time::timeout(spec.timeout, async {
        let (out, err) = tokio::join!(read_all("stdout", stdout), read_all("stderr", stderr));
        let status = child.wait().await;
        (out, err, status)
    })
    .await;

    match collected {
        Ok(((out, out_err), (err, err_err), status)) => {
            let status = status?;
            Ok(ProcessOutput {
                exit_code: status.code(),
                stdout: String::from_utf8_lossy(&out).into_owned(),
                stderr: String::from_utf8_lossy(&err).into_owned(),
                duration: start.elapsed(),
                timed_out: false,
                read_errors: out_err.into_iter().chain(err_err).collect(),
            })
        }
        Err(_) => {
            kill_group(pid);
            let _ = child.kill().await;
            tracing::debug!(program = %spec.program, ?pid, "process group killed after timeout");
            Ok(ProcessOutput {
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                duration: start.elapsed(),
                timed_out: true,
                read_errors: Vec::new(),
            })
        }
    }
}
