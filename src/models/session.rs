//! Session model: conversation history, chat-file selection, and the
//! context cache flag.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role tag of user-authored history entries.
pub const ROLE_USER: &str = "user";

/// Role tag of model-authored history entries.
pub const ROLE_ASSISTANT: &str = "assistant";

/// One chat message as exchanged with the worker.
///
/// Fields other than `role` and `content` (tool calls, names, …) are kept
/// verbatim in `extra` so the worker gets back exactly what it produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Author role (`user`, `assistant`, `system`, `tool`, …); empty when
    /// the worker recorded an entry without one.
    #[serde(default)]
    pub role: String,
    /// Message text.
    #[serde(default)]
    pub content: String,
    /// Any additional fields carried by the message.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    /// Build a plain message with no extra fields.
    #[must_use]
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            extra: Map::new(),
        }
    }

    /// Shorthand for a user-authored message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ROLE_USER, content)
    }

    /// Shorthand for an assistant-authored message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ROLE_ASSISTANT, content)
    }

    /// Whether the message was authored by the user.
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.role == ROLE_USER
    }
}

/// A timestamped history entry.
///
/// Serialized as a `[timestamp, message]` pair, which is the shape the
/// worker and the front end both expect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(into = "(f64, ChatMessage)", from = "(f64, ChatMessage)")]
pub struct HistoryEntry {
    /// Seconds since the Unix epoch, with sub-second precision.
    pub timestamp: f64,
    /// The recorded message.
    pub message: ChatMessage,
}

impl HistoryEntry {
    /// Stamp `message` with the current time.
    #[must_use]
    pub fn now(message: ChatMessage) -> Self {
        Self {
            timestamp: unix_seconds(),
            message,
        }
    }
}

impl From<HistoryEntry> for (f64, ChatMessage) {
    fn from(entry: HistoryEntry) -> Self {
        (entry.timestamp, entry.message)
    }
}

impl From<(f64, ChatMessage)> for HistoryEntry {
    fn from((timestamp, message): (f64, ChatMessage)) -> Self {
        Self { timestamp, message }
    }
}

#[allow(clippy::cast_precision_loss)]
fn unix_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Rendered context string together with the fingerprint of the files it
/// was generated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedContext {
    /// Hash over chat-file paths, sizes and modification times.
    pub fingerprint: u64,
    /// Rendered context string.
    pub rendered: String,
}

/// One editor working context (a project directory).
///
/// Owned by the session registry and never destroyed while the
/// orchestrator runs.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    root: PathBuf,
    history: Vec<HistoryEntry>,
    chat_files: Vec<String>,
    cache_valid: bool,
    cache: Option<CachedContext>,
    verbose: bool,
}

impl Session {
    /// Create an empty session rooted at `root`.
    #[must_use]
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>, verbose: bool) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
            history: Vec::new(),
            chat_files: Vec::new(),
            cache_valid: false,
            cache: None,
            verbose,
        }
    }

    /// Session identifier (the path as given by the front end).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Directory the session is rooted at.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Verbosity flag forwarded to the worker.
    #[must_use]
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Ordered history snapshot.
    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Append one message stamped with the current time.
    pub fn append_message(&mut self, message: ChatMessage) {
        self.history.push(HistoryEntry::now(message));
    }

    /// Replace the history wholesale, stamping every message with the
    /// current time.
    pub fn set_history(&mut self, messages: Vec<ChatMessage>) {
        self.history = messages.into_iter().map(HistoryEntry::now).collect();
    }

    /// Drop all history.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Remove the trailing entry if and only if it is user-authored.
    ///
    /// Returns `true` when an entry was removed.
    pub fn rollback_user_turn(&mut self) -> bool {
        match self.history.last() {
            Some(entry) if entry.message.is_user() => {
                self.history.pop();
                true
            }
            _ => false,
        }
    }

    /// Content of the most recent history entry.
    #[must_use]
    pub fn last_content(&self) -> Option<&str> {
        self.history.last().map(|e| e.message.content.as_str())
    }

    /// Chat files, relative to the session root, in insertion order.
    #[must_use]
    pub fn chat_files(&self) -> &[String] {
        &self.chat_files
    }

    /// Add a chat file. Returns `false` if it was already selected.
    pub fn add_chat_file(&mut self, relative: impl Into<String>) -> bool {
        let relative = relative.into();
        if self.chat_files.contains(&relative) {
            return false;
        }
        self.chat_files.push(relative);
        self.invalidate_cache();
        true
    }

    /// Remove a chat file. Returns `false` if it was not selected.
    pub fn remove_chat_file(&mut self, relative: &str) -> bool {
        let before = self.chat_files.len();
        self.chat_files.retain(|f| f != relative);
        if self.chat_files.len() == before {
            return false;
        }
        self.invalidate_cache();
        true
    }

    /// Whether the cached context may be reused.
    #[must_use]
    pub fn is_cache_valid(&self) -> bool {
        self.cache_valid
    }

    /// Force the next context generation to start from scratch.
    pub fn invalidate_cache(&mut self) {
        self.cache_valid = false;
        self.cache = None;
    }

    /// Cached context, if still valid and generated from `fingerprint`.
    #[must_use]
    pub fn cached_context(&self, fingerprint: u64) -> Option<&str> {
        if !self.cache_valid {
            return None;
        }
        self.cache
            .as_ref()
            .filter(|c| c.fingerprint == fingerprint)
            .map(|c| c.rendered.as_str())
    }

    /// Store a freshly rendered context and mark the cache valid.
    pub fn store_context(&mut self, fingerprint: u64, rendered: String) {
        self.cache = Some(CachedContext {
            fingerprint,
            rendered,
        });
        self.cache_valid = true;
    }
}
