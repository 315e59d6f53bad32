//! Worker process supervision: start, stop, restart, send.
//!
//! One supervisory lock serializes every lifecycle operation, so a `send`
//! can never interleave with a `restart` and no two starts overlap. Each
//! successful start opens a new generation and launches the loops bound to
//! it: the stdout pump, the stderr pump, and the message router. A stop
//! always ends with a bounded wait for those loops; stragglers are aborted.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::WorkerConfig;
use crate::models::wire::WorkerRequest;
use crate::router::MessageRouter;
use crate::worker::pump::{spawn_stderr_pump, spawn_stdout_pump};
use crate::worker::queue::{DrainReport, GenerationCounter, InboundQueue};
use crate::worker::spawner::spawn_worker;
use crate::{AppError, Result};

/// Lifecycle state of the supervised worker.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// No worker process.
    Stopped,
    /// Launch in progress.
    Starting,
    /// Worker alive and loops running.
    Running,
    /// Stop in progress.
    Stopping,
    /// Last start attempt failed; no worker process.
    Failed,
}

impl Display for WorkerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// The live process of one generation.
#[derive(Debug)]
struct WorkerProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    pid: Option<u32>,
    generation: u64,
}

/// Loops bound to one generation.
#[derive(Debug)]
struct GenerationLoops {
    generation: u64,
    stdout: JoinHandle<()>,
    stderr: JoinHandle<()>,
    router: JoinHandle<()>,
}

#[derive(Debug)]
struct SupervisorInner {
    process: Option<WorkerProcess>,
    loops: Option<GenerationLoops>,
    state: WorkerState,
}

/// Owns the worker process handle and its I/O streams.
pub struct WorkerSupervisor {
    config: WorkerConfig,
    inner: Mutex<SupervisorInner>,
    generation: GenerationCounter,
    queue: Arc<InboundQueue>,
    router: Arc<MessageRouter>,
}

impl WorkerSupervisor {
    /// Create a supervisor with no worker running yet.
    ///
    /// `generation` and `queue` must be the same instances the router reads.
    #[must_use]
    pub fn new(
        config: WorkerConfig,
        generation: GenerationCounter,
        queue: Arc<InboundQueue>,
        router: Arc<MessageRouter>,
    ) -> Self {
        Self {
            config,
            inner: Mutex::new(SupervisorInner {
                process: None,
                loops: None,
                state: WorkerState::Stopped,
            }),
            generation,
            queue,
            router,
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> WorkerState {
        self.inner.lock().await.state
    }

    /// Current generation (`0` before the first start).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.current()
    }

    /// OS process id of the running worker.
    pub async fn pid(&self) -> Option<u32> {
        self.inner.lock().await.process.as_ref().and_then(|p| p.pid)
    }

    /// Whether a worker process is currently alive.
    pub async fn is_alive(&self) -> bool {
        let mut inner = self.inner.lock().await;
        is_alive(&mut inner)
    }

    /// Launch the worker if it is not already running.
    ///
    /// Returns the generation the running worker belongs to.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Startup` if the process cannot be spawned or exits
    /// during the grace delay; the process handle is left unset.
    pub async fn start(&self) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        self.start_locked(&mut inner).await
    }

    /// Stop the worker: close stdin, request termination, kill after the
    /// configured timeout, then wait (bounded) for this generation's loops.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await;
    }

    /// Stop followed by start, which opens a new generation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Startup` if the fresh worker fails to start.
    pub async fn restart(&self) -> Result<u64> {
        let span = info_span!("restart_worker", from_generation = self.generation.current());
        async {
            let mut inner = self.inner.lock().await;
            self.stop_locked(&mut inner).await;
            self.start_locked(&mut inner).await
        }
        .instrument(span)
        .await
    }

    /// Serialize `request` and write it to the worker under the
    /// supervisory lock.
    ///
    /// If no worker is alive, exactly one start is attempted first. A failed
    /// write stops the worker and is returned as a transport failure.
    ///
    /// # Errors
    ///
    /// - `AppError::Startup` — the one-shot restart failed.
    /// - `AppError::Transport` — the write failed or stdin is closed.
    /// - `AppError::Protocol` — the request could not be serialized.
    pub async fn send(&self, request: &WorkerRequest) -> Result<()> {
        let bytes = request.to_line()?;
        let mut inner = self.inner.lock().await;

        if !is_alive(&mut inner) {
            warn!(
                session = request.session(),
                "worker not running, attempting one restart before sending"
            );
            self.start_locked(&mut inner).await?;
        }

        let write_result = match inner.process.as_mut().and_then(|p| p.stdin.as_mut()) {
            Some(stdin) => write_line(stdin, &bytes).await,
            None => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "worker stdin is closed",
            )),
        };

        if let Err(err) = write_result {
            warn!(session = request.session(), %err, "write to worker failed, stopping worker");
            self.stop_locked(&mut inner).await;
            return Err(AppError::Transport(format!(
                "failed to send message to worker: {err}"
            )));
        }

        debug!(
            session = request.session(),
            bytes = bytes.len(),
            "request written to worker"
        );
        Ok(())
    }

    async fn start_locked(&self, inner: &mut SupervisorInner) -> Result<u64> {
        if is_alive(inner) {
            let generation = inner.process.as_ref().map_or(0, |p| p.generation);
            debug!(generation, "worker already running");
            return Ok(generation);
        }

        // A worker that died on its own still has loops and a handle to reap.
        if inner.process.is_some() || inner.loops.is_some() {
            self.stop_locked(inner).await;
        }

        inner.state = WorkerState::Starting;
        let spawned = match spawn_worker(&self.config).await {
            Ok(spawned) => spawned,
            Err(err) => {
                inner.state = WorkerState::Failed;
                return Err(err);
            }
        };

        let generation = self.generation.advance();
        let drained = self.queue.drain().await;
        if drained != DrainReport::default() {
            info!(
                generation,
                drained = drained.lines,
                failures = drained.failures,
                sentinels = drained.sentinels,
                "discarded messages left over from previous generation"
            );
        }

        let stdout = spawn_stdout_pump(generation, Some(spawned.stdout), self.queue.sender());
        let stderr = spawn_stderr_pump(generation, Some(spawned.stderr));
        let router = tokio::spawn(Arc::clone(&self.router).run(generation));

        inner.process = Some(WorkerProcess {
            child: spawned.child,
            stdin: Some(spawned.stdin),
            pid: spawned.pid,
            generation,
        });
        inner.loops = Some(GenerationLoops {
            generation,
            stdout,
            stderr,
            router,
        });
        inner.state = WorkerState::Running;

        info!(generation, pid = spawned.pid.unwrap_or(0), "worker running");
        Ok(generation)
    }

    async fn stop_locked(&self, inner: &mut SupervisorInner) {
        if let Some(mut process) = inner.process.take() {
            inner.state = WorkerState::Stopping;
            info!(generation = process.generation, "stopping worker");

            // Closing stdin asks the worker to wind down on its own.
            drop(process.stdin.take());
            terminate(&mut process.child, process.pid, self.config.stop_timeout()).await;
        }

        if let Some(loops) = inner.loops.take() {
            join_loops(loops, self.config.loop_join_timeout()).await;
        }

        inner.state = WorkerState::Stopped;
    }
}

/// A worker counts as alive only while its process runs and its stdout
/// pump is still reading; a worker whose output is gone is restarted by
/// the next `send`.
fn is_alive(inner: &mut SupervisorInner) -> bool {
    let reading = inner
        .loops
        .as_ref()
        .is_some_and(|loops| !loops.stdout.is_finished());
    match inner.process.as_mut() {
        Some(process) => reading && matches!(process.child.try_wait(), Ok(None)),
        None => false,
    }
}

async fn write_line(stdin: &mut ChildStdin, bytes: &[u8]) -> std::io::Result<()> {
    stdin.write_all(bytes).await?;
    stdin.flush().await
}

/// Request termination, wait up to `timeout`, then kill.
async fn terminate(child: &mut Child, pid: Option<u32>, timeout: Duration) {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(%status, "worker already exited");
            return;
        }
        Ok(None) => {}
        Err(err) => warn!(%err, "failed to poll worker before stopping"),
    }

    request_termination(child, pid);

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => info!(%status, "worker exited"),
        Ok(Err(err)) => warn!(%err, "error waiting for worker exit"),
        Err(_) => {
            warn!(?timeout, "worker did not terminate gracefully, killing");
            if let Err(err) = child.kill().await {
                warn!(%err, "failed to kill worker");
            }
        }
    }
}

#[cfg(unix)]
fn request_termination(child: &mut Child, pid: Option<u32>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw) = pid.and_then(|p| i32::try_from(p).ok()) else {
        let _ = child.start_kill();
        return;
    };
    if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        debug!(%err, "SIGTERM delivery failed");
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child, _pid: Option<u32>) {
    if let Err(err) = child.start_kill() {
        debug!(%err, "terminate request failed");
    }
}

/// Wait for the loops of one generation, aborting any that overrun.
async fn join_loops(loops: GenerationLoops, timeout: Duration) {
    let GenerationLoops {
        generation,
        stdout,
        stderr,
        router,
    } = loops;

    for (name, handle) in [("stdout pump", stdout), ("stderr pump", stderr), ("router", router)] {
        join_bounded(generation, name, handle, timeout).await;
    }
}

async fn join_bounded(generation: u64, name: &str, mut handle: JoinHandle<()>, timeout: Duration) {
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(())) => debug!(generation, task = name, "loop finished"),
        Ok(Err(err)) => warn!(generation, task = name, %err, "loop ended abnormally"),
        Err(_) => {
            warn!(generation, task = name, "loop did not finish in time, aborting");
            handle.abort();
        }
    }
}
