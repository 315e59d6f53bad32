//! Worker process layer: framing, spawning, output pumps, the inbound
//! queue, and the supervisor that ties them together.

pub mod codec;
pub mod pump;
pub mod queue;
pub mod spawner;
pub mod supervisor;

pub use queue::{GenerationCounter, InboundQueue, PendingMessage};
pub use supervisor::{WorkerState, WorkerSupervisor};
