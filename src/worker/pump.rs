//! Output pumps: one reader loop per worker output stream.
//!
//! The stdout pump frames lines with [`LineCodec`] and pushes each non-empty
//! line onto the inbound queue tagged with its generation. End-of-stream
//! pushes a sentinel and ends the loop; a read error is queued as
//! [`PendingMessage::ReadFailed`] ahead of the sentinel. The stderr pump only
//! logs; nothing it reads ever reaches the message pipeline.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::worker::codec::LineCodec;
use crate::worker::queue::{PendingMessage, QueueSender};
use crate::AppError;

/// Spawn the stdout pump for one generation.
#[must_use]
pub fn spawn_stdout_pump<R>(generation: u64, stdout: Option<R>, tx: QueueSender) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(run_stdout_pump(generation, stdout, tx))
}

/// Spawn the stderr pump for one generation.
#[must_use]
pub fn spawn_stderr_pump<R>(generation: u64, stderr: Option<R>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(run_stderr_pump(generation, stderr))
}

/// Stdout reader loop.
///
/// `stdout` is the handle captured when the loop starts; if it is already
/// gone the sentinel is pushed immediately so the router never blocks on a
/// generation that will produce nothing.
pub async fn run_stdout_pump<R>(generation: u64, stdout: Option<R>, tx: QueueSender)
where
    R: AsyncRead + Unpin + Send,
{
    let Some(stdout) = stdout else {
        warn!(generation, "worker stdout not available, signalling end of output");
        let _ = tx.send(PendingMessage::Sentinel { generation });
        return;
    };

    let mut framed = FramedRead::new(stdout, LineCodec::new());
    let mut forwarded: u64 = 0;

    loop {
        match framed.next().await {
            None => {
                debug!(generation, forwarded, "worker stdout reached EOF");
                break;
            }
            Some(Err(AppError::Protocol(msg))) => {
                warn!(
                    generation,
                    error = msg.as_str(),
                    "worker stdout framing error, skipping line"
                );
            }
            Some(Err(err)) => {
                warn!(generation, error = %err, "worker stdout read failed");
                let _ = tx.send(PendingMessage::ReadFailed {
                    generation,
                    error: err.to_string(),
                });
                break;
            }
            Some(Ok(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                forwarded += 1;
                let item = PendingMessage::Line {
                    generation,
                    line: line.to_owned(),
                };
                if tx.send(item).is_err() {
                    debug!(generation, "inbound queue closed, stopping stdout pump");
                    return;
                }
            }
        }
    }

    let _ = tx.send(PendingMessage::Sentinel { generation });
}

/// Stderr reader loop; forwards every line to the operational log.
pub async fn run_stderr_pump<R>(generation: u64, stderr: Option<R>)
where
    R: AsyncRead + Unpin + Send,
{
    let Some(stderr) = stderr else {
        debug!(generation, "worker stderr not available");
        return;
    };

    let mut framed = FramedRead::new(stderr, LineCodec::new());
    while let Some(item) = framed.next().await {
        match item {
            Ok(line) => {
                let line = line.trim_end();
                if !line.is_empty() {
                    info!(target: "worker_stderr", generation, "{line}");
                }
            }
            Err(AppError::Protocol(msg)) => {
                warn!(generation, error = msg.as_str(), "worker stderr framing error");
            }
            Err(err) => {
                debug!(generation, error = %err, "worker stderr read failed");
                break;
            }
        }
    }
    debug!(generation, "worker stderr reached EOF");
}
