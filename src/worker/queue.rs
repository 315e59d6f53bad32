//! Inbound message queue between the output pump and the message router.
//!
//! Every item is tagged with the worker generation it was read under. The
//! queue outlives individual worker processes; after a restart, whatever the
//! old generation left behind is drained before new loops start.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tracing::debug;

/// A raw stdout line or end-of-stream marker, tagged with its generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingMessage {
    /// One non-empty line read from worker stdout.
    Line {
        /// Generation the line was read under.
        generation: u64,
        /// Line content without the trailing newline.
        line: String,
    },
    /// Reading worker stdout failed; always followed by a sentinel.
    ReadFailed {
        /// Generation whose stream failed.
        generation: u64,
        /// Read error text.
        error: String,
    },
    /// Worker stdout reached end-of-stream or failed.
    Sentinel {
        /// Generation whose stream ended.
        generation: u64,
    },
}

impl PendingMessage {
    /// Generation tag of the item.
    #[must_use]
    pub fn generation(&self) -> u64 {
        match self {
            Self::Line { generation, .. }
            | Self::ReadFailed { generation, .. }
            | Self::Sentinel { generation } => *generation,
        }
    }
}

/// Monotonic worker-lifetime counter shared by the supervisor and router.
///
/// Generation `0` means no worker has ever been started.
#[derive(Debug, Clone, Default)]
pub struct GenerationCounter(Arc<AtomicU64>);

impl GenerationCounter {
    /// Create a counter at generation `0`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Move to the next generation and return it.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Sending half handed to output pumps.
pub type QueueSender = mpsc::UnboundedSender<PendingMessage>;

/// Unbounded FIFO with a single consumer at a time.
///
/// The receiver sits behind an async mutex: a router holds the guard for
/// its whole lifetime, and [`InboundQueue::drain`] can only run once the
/// previous router has let go of it.
#[derive(Debug)]
pub struct InboundQueue {
    tx: QueueSender,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<PendingMessage>>>,
}

/// Counts reported by [`InboundQueue::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Stale lines discarded.
    pub lines: usize,
    /// Stale read-failure reports discarded.
    pub failures: usize,
    /// Stale sentinels discarded.
    pub sentinels: usize,
}

impl InboundQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// A sender for a new pump.
    #[must_use]
    pub fn sender(&self) -> QueueSender {
        self.tx.clone()
    }

    /// Push an item directly (used by pumps through their sender and by tests).
    pub fn push(&self, item: PendingMessage) {
        // The receiver lives as long as the queue itself.
        let _ = self.tx.send(item);
    }

    /// Take exclusive consumer access, waiting for any previous consumer.
    pub async fn consumer(&self) -> OwnedMutexGuard<mpsc::UnboundedReceiver<PendingMessage>> {
        Arc::clone(&self.rx).lock_owned().await
    }

    /// Discard every item currently queued.
    ///
    /// Must only be called while no pump of the upcoming generation is
    /// running, so everything found here belongs to an older generation.
    pub async fn drain(&self) -> DrainReport {
        let mut rx = self.rx.lock().await;
        let mut report = DrainReport::default();
        while let Ok(item) = rx.try_recv() {
            match item {
                PendingMessage::Line { generation, .. } => {
                    debug!(generation, "discarding stale worker line");
                    report.lines += 1;
                }
                PendingMessage::ReadFailed { generation, error } => {
                    debug!(generation, error, "discarding stale read failure");
                    report.failures += 1;
                }
                PendingMessage::Sentinel { .. } => report.sentinels += 1,
            }
        }
        report
    }
}

impl Default for InboundQueue {
    fn default() -> Self {
        Self::new()
    }
}
