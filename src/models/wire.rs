//! Worker wire protocol: newline-delimited JSON records in both directions.
//!
//! # Orchestrator → worker
//!
//! | `type`                | Payload                                 |
//! |-----------------------|-----------------------------------------|
//! | `interaction_request` | `data`: [`InteractionRequest`]          |
//! | `ping`                | `session`                               |
//!
//! # Worker → orchestrator
//!
//! | `type`     | Maps to                       |
//! |------------|-------------------------------|
//! | `stream`   | [`WorkerMessage::Stream`]     |
//! | `finished` | [`WorkerMessage::Finished`]   |
//! | `error`    | [`WorkerMessage::Error`]      |
//! | `pong`     | [`WorkerMessage::Pong`]       |
//! | *(other)*  | Skipped; logged at `DEBUG`    |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::models::session::HistoryEntry;
use crate::{AppError, Result};

/// Default stream role when the worker omits one.
pub const ROLE_LLM: &str = "llm";

/// Stream role marking the start of a structured tool call.
pub const ROLE_TOOL_START: &str = "tool_json";

/// Stream role carrying raw tool-call arguments; never filtered.
pub const ROLE_TOOL_ARGS: &str = "tool_json_args";

// ── Outbound ─────────────────────────────────────────────────────────────────

/// Resolved model settings sent with every interaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelSettings {
    /// Model identifier in `provider/model` form.
    pub model: String,
    /// API key, if one is configured.
    pub api_key: Option<String>,
    /// API base URL override.
    pub base_url: Option<String>,
    /// Verbosity flag of the session.
    pub verbose: bool,
}

/// Everything the worker needs to run one interaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionRequest {
    /// Session identifier.
    pub session_path: String,
    /// Content of the most recent history entry.
    pub prompt: String,
    /// Full history snapshot.
    pub history: Vec<HistoryEntry>,
    /// Model configuration.
    pub config: ModelSettings,
    /// Chat-file snapshot.
    pub chat_files: Vec<String>,
    /// Generated context string.
    pub context: String,
}

/// A request written to the worker's stdin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Start one interaction.
    InteractionRequest {
        /// Request payload.
        data: InteractionRequest,
    },
    /// Liveness check; answered with `pong`.
    Ping {
        /// Session the ping is issued for.
        session: String,
    },
}

impl WorkerRequest {
    /// Session the request is scoped to, used for error notifications.
    #[must_use]
    pub fn session(&self) -> &str {
        match self {
            Self::InteractionRequest { data } => &data.session_path,
            Self::Ping { session } => session,
        }
    }

    /// Serialize as one NDJSON line, newline included.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if serialization fails.
    pub fn to_line(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec(self)
            .map_err(|e| AppError::Protocol(format!("failed to serialise request: {e}")))?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

// ── Inbound ──────────────────────────────────────────────────────────────────

/// Terminal status of an interaction as reported by `finished`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishStatus {
    /// Normal completion.
    Success,
    /// Completed after hitting the worker's turn limit.
    MaxTurnsReached,
    /// Ended with an error.
    Error,
    /// Ended because the worker was asked to stop.
    Cancelled,
    /// Any status this orchestrator does not know.
    #[serde(other)]
    Unknown,
}

impl FinishStatus {
    /// Read a status from a raw record field; anything that is not a known
    /// status string maps to [`FinishStatus::Unknown`].
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(_) => serde_json::from_value(value).unwrap_or(Self::Unknown),
            _ => Self::Unknown,
        }
    }

    /// Whether a `final_history` payload should replace stored history.
    #[must_use]
    pub fn persists_history(self) -> bool {
        matches!(self, Self::Success | Self::MaxTurnsReached)
    }
}

/// A decoded record from the worker's stdout.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Incremental output chunk.
    Stream {
        /// Session the chunk belongs to.
        session: String,
        /// Role tag of the chunk.
        role: String,
        /// Chunk text.
        content: String,
    },
    /// End of an interaction.
    Finished {
        /// Session the interaction belonged to.
        session: String,
        /// Terminal status.
        status: FinishStatus,
        /// Human-readable summary.
        message: String,
        /// Complete history after the interaction, if supplied.
        #[serde(skip_serializing_if = "Option::is_none")]
        final_history: Option<Vec<Value>>,
    },
    /// Worker-reported application error.
    Error {
        /// Session the error belongs to.
        session: String,
        /// Error text.
        message: String,
    },
    /// Liveness acknowledgment.
    Pong {
        /// Session the ping was issued for.
        session: String,
    },
}

impl WorkerMessage {
    /// Session the message is scoped to.
    #[must_use]
    pub fn session(&self) -> &str {
        match self {
            Self::Stream { session, .. }
            | Self::Finished { session, .. }
            | Self::Error { session, .. }
            | Self::Pong { session } => session,
        }
    }

    /// Serialize as one NDJSON line without the trailing newline.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Top-level envelope shared by every inbound record.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    session: Option<String>,
    #[serde(flatten)]
    fields: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct StreamFields {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<Value>,
}

// `finished` and `error` always end an interaction, so every field is taken
// as a raw value and coerced rather than rejected.
#[derive(Debug, Deserialize)]
struct FinishedFields {
    #[serde(default)]
    status: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    final_history: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorFields {
    #[serde(default)]
    message: Option<Value>,
}

/// Parse one line from the worker's stdout.
///
/// # Return value
///
/// - `Ok(Some(message))` — a recognized record.
/// - `Ok(None)` — blank line or unknown `type` (logged at `DEBUG`).
/// - `Err(AppError::Protocol(..))` — not JSON, no `type`, no `session`, or a
///   known type whose fields have the wrong shape.
///
/// # Errors
///
/// See above; protocol errors are never fatal to the caller.
pub fn parse_worker_line(line: &str) -> Result<Option<WorkerMessage>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let envelope: Envelope = serde_json::from_str(line)?;

    let Some(session) = envelope.session.filter(|s| !s.is_empty()) else {
        return Err(AppError::Protocol(format!(
            "missing required field: `session` in {} record",
            envelope.kind
        )));
    };
    let fields = Value::Object(envelope.fields);

    let message = match envelope.kind.as_str() {
        "stream" => {
            let f: StreamFields = serde_json::from_value(fields)
                .map_err(|e| AppError::Protocol(format!("invalid stream record: {e}")))?;
            WorkerMessage::Stream {
                session,
                role: f.role.unwrap_or_else(|| ROLE_LLM.to_owned()),
                content: f.content.map(value_to_text).unwrap_or_default(),
            }
        }
        "finished" => {
            let f: FinishedFields = serde_json::from_value(fields)
                .map_err(|e| AppError::Protocol(format!("invalid finished record: {e}")))?;
            let final_history = match f.final_history {
                Some(Value::Array(items)) => Some(items),
                Some(Value::Null) | None => None,
                Some(other) => {
                    debug!(session, kind = %other, "final_history is not a list, ignoring");
                    None
                }
            };
            WorkerMessage::Finished {
                session,
                status: f.status.map_or(FinishStatus::Unknown, FinishStatus::from_value),
                message: f.message.map(value_to_text).unwrap_or_default(),
                final_history,
            }
        }
        "error" => {
            let f: ErrorFields = serde_json::from_value(fields)
                .map_err(|e| AppError::Protocol(format!("invalid error record: {e}")))?;
            WorkerMessage::Error {
                session,
                message: f
                    .message
                    .map(value_to_text)
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "Unknown error from worker".to_owned()),
            }
        }
        "pong" => WorkerMessage::Pong { session },
        other => {
            debug!(kind = other, session, "skipping unknown worker record type");
            return Ok(None);
        }
    };

    Ok(Some(message))
}

/// Render a JSON value as display text; strings are taken verbatim.
#[must_use]
pub fn value_to_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
