//! Error types shared across the orchestrator.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all orchestrator failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure, including a missing or
    /// malformed model identifier at submit time.
    Config(String),
    /// Worker process exited immediately after launch or could not be spawned.
    Startup(String),
    /// Broken pipe or closed stream while talking to the worker.
    Transport(String),
    /// Malformed structured data on the worker's output stream.
    Protocol(String),
    /// Structured error reported by the worker itself.
    Worker(String),
    /// Front end declined to preempt the running interaction.
    ConfirmationDenied(String),
    /// Session identifier does not name a usable directory.
    Session(String),
    /// Front-end RPC failure (closed transport, unanswered confirmation).
    Frontend(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Startup(msg) => write!(f, "startup: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Worker(msg) => write!(f, "worker: {msg}"),
            Self::ConfirmationDenied(msg) => write!(f, "confirmation denied: {msg}"),
            Self::Session(msg) => write!(f, "session: {msg}"),
            Self::Frontend(msg) => write!(f, "frontend: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("malformed json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
