//! Worker process spawner.
//!
//! Launches the configured executable/script pair with all three stdio
//! streams piped and `kill_on_drop(true)`. After a short grace delay the
//! process is checked for liveness; a worker that has already exited is
//! reported as a startup failure together with whatever it wrote to stderr.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{error, info, info_span, Instrument};

use crate::config::WorkerConfig;
use crate::{AppError, Result};

/// Upper bound on how long a dead worker's stderr is read for diagnostics.
const STDERR_CAPTURE_TIMEOUT: Duration = Duration::from_millis(500);

/// A freshly launched worker that passed the liveness check.
#[derive(Debug)]
pub struct SpawnedWorker {
    /// Child process handle, kept alive so `kill_on_drop` works.
    pub child: Child,
    /// Worker stdin for requests.
    pub stdin: ChildStdin,
    /// Worker stdout carrying protocol records.
    pub stdout: ChildStdout,
    /// Worker stderr carrying diagnostics.
    pub stderr: ChildStderr,
    /// OS process id, if still known.
    pub pid: Option<u32>,
}

/// Build the command line for the worker.
#[must_use]
pub fn build_command(config: &WorkerConfig) -> Command {
    let mut cmd = Command::new(&config.program);
    if let Some(ref script) = config.script {
        cmd.arg(script);
    }
    cmd.args(&config.args);

    if let Some(dir) = config.resolved_working_dir() {
        cmd.current_dir(dir);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Launch the worker and wait out the startup grace delay.
///
/// # Errors
///
/// - `AppError::Startup("failed to spawn worker: …")` — OS spawn failure.
/// - `AppError::Startup("worker exited immediately …")` — the process died
///   during the grace delay; the message includes captured stderr.
pub async fn spawn_worker(config: &WorkerConfig) -> Result<SpawnedWorker> {
    let span = info_span!("spawn_worker", program = %config.program);
    launch(config).instrument(span).await
}

async fn launch(config: &WorkerConfig) -> Result<SpawnedWorker> {
    let mut child = build_command(config)
        .spawn()
        .map_err(|err| AppError::Startup(format!("failed to spawn worker: {err}")))?;

    let pid = child.id();
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Startup("failed to capture worker stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Startup("failed to capture worker stdout".into()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Startup("failed to capture worker stderr".into()))?;

    tokio::time::sleep(config.startup_grace()).await;

    match child.try_wait() {
        Ok(None) => {
            info!(pid = pid.unwrap_or(0), "worker process started");
            Ok(SpawnedWorker {
                child,
                stdin,
                stdout,
                stderr,
                pid,
            })
        }
        Ok(Some(status)) => {
            let diagnostics = capture_stderr(&mut stderr).await;
            error!(%status, stderr = %diagnostics, "worker exited immediately after launch");
            Err(AppError::Startup(format!(
                "worker exited immediately ({status}): {diagnostics}"
            )))
        }
        Err(err) => Err(AppError::Startup(format!(
            "failed to poll worker status: {err}"
        ))),
    }
}

/// Read whatever a dead worker left on stderr, bounded in time.
async fn capture_stderr(stderr: &mut ChildStderr) -> String {
    let mut buf = String::new();
    // A timeout keeps whatever was read so far.
    if let Ok(Err(err)) =
        tokio::time::timeout(STDERR_CAPTURE_TIMEOUT, stderr.read_to_string(&mut buf)).await
    {
        return format!("<stderr unreadable: {err}>");
    }
    let trimmed = buf.trim();
    if trimmed.is_empty() {
        "<no stderr output>".to_owned()
    } else {
        trimmed.to_owned()
    }
}
