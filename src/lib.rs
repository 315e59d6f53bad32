#![forbid(unsafe_code)]

//! `agent-conductor`: supervises one AI worker process on behalf of an
//! editor and serializes chat interactions across sessions.

pub mod config;
pub mod context;
pub mod errors;
pub mod filter;
pub mod frontend;
pub mod gate;
pub mod models;
pub mod orchestrator;
pub mod router;
pub mod sessions;
pub mod worker;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use orchestrator::Orchestrator;
