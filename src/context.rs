//! Context generation for worker requests.
//!
//! The [`ContextProvider`] trait is the seam toward whatever prepares the
//! project content a worker sees. [`WorkspaceContext`] is the default: it
//! expands `@path` mentions in fresh prompts into chat files and renders
//! every chat file as a fenced block, reusing the session's cache while
//! none of the files changed.

use std::collections::hash_map::DefaultHasher;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path};
use std::sync::OnceLock;
use std::time::UNIX_EPOCH;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::models::session::Session;
use crate::{AppError, Result};

/// Default per-file rendering cap: 256 KiB.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 256 * 1024;

/// Produces the context string attached to each worker request.
pub trait ContextProvider: Send + Sync {
    /// Generate context for `session`.
    ///
    /// `prompt` is `Some` only for fresh prompts; implementations may use it
    /// to expand file mentions, which mutates the session's chat files.
    ///
    /// # Errors
    ///
    /// Implementations return `AppError::Io` or `AppError::Session` when the
    /// session's files cannot be read.
    fn generate(&self, session: &mut Session, prompt: Option<&str>) -> Result<String>;
}

/// Renders chat files from the session directory.
#[derive(Debug, Clone)]
pub struct WorkspaceContext {
    max_file_bytes: u64,
}

impl Default for WorkspaceContext {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

impl WorkspaceContext {
    /// Create a provider with a custom per-file size cap.
    #[must_use]
    pub fn with_max_file_bytes(max_file_bytes: u64) -> Self {
        Self { max_file_bytes }
    }

    fn expand_mentions(session: &mut Session, prompt: &str) {
        for mention in extract_mentions(prompt) {
            match resolve_chat_path(session.root(), &mention) {
                Ok(relative) => {
                    if session.add_chat_file(relative.clone()) {
                        info!(session = session.id(), file = relative, "added mentioned file");
                    }
                }
                Err(err) => debug!(session = session.id(), mention, %err, "ignoring mention"),
            }
        }
    }

    fn fingerprint(session: &Session) -> u64 {
        let mut hasher = DefaultHasher::new();
        for relative in session.chat_files() {
            relative.hash(&mut hasher);
            match std::fs::metadata(session.root().join(relative)) {
                Ok(meta) => {
                    meta.len().hash(&mut hasher);
                    let modified = meta
                        .modified()
                        .ok()
                        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                        .map(|d| d.as_nanos());
                    modified.hash(&mut hasher);
                }
                Err(_) => "missing".hash(&mut hasher),
            }
        }
        hasher.finish()
    }

    fn render(&self, session: &Session) -> String {
        let mut out = String::new();
        for relative in session.chat_files() {
            let path = session.root().join(relative);
            let body = match std::fs::metadata(&path) {
                Ok(meta) if meta.len() > self.max_file_bytes => {
                    format!("<file too large: {} bytes>", meta.len())
                }
                Ok(_) => match std::fs::read(&path) {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    Err(err) => {
                        warn!(
                            session = session.id(),
                            file = relative,
                            %err,
                            "chat file unreadable"
                        );
                        format!("<unreadable: {err}>")
                    }
                },
                Err(err) => {
                    warn!(session = session.id(), file = relative, %err, "chat file missing");
                    "<missing>".to_owned()
                }
            };

            let _ = writeln!(out, "## File: {relative}");
            let _ = writeln!(out, "```");
            out.push_str(&body);
            if !body.ends_with('\n') {
                out.push('\n');
            }
            let _ = writeln!(out, "```");
            out.push('\n');
        }
        out
    }
}

impl ContextProvider for WorkspaceContext {
    fn generate(&self, session: &mut Session, prompt: Option<&str>) -> Result<String> {
        if !session.root().is_dir() {
            return Err(AppError::Session(format!(
                "session directory no longer exists: {}",
                session.root().display()
            )));
        }

        if let Some(prompt) = prompt {
            Self::expand_mentions(session, prompt);
        }

        let fingerprint = Self::fingerprint(session);
        if let Some(cached) = session.cached_context(fingerprint) {
            debug!(session = session.id(), "reusing cached context");
            return Ok(cached.to_owned());
        }

        let rendered = self.render(session);
        session.store_context(fingerprint, rendered.clone());
        Ok(rendered)
    }
}

// Literal pattern; compilation cannot fail.
#[allow(clippy::unwrap_used)]
fn mention_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?:^|\s)@([^\s@]+)").unwrap())
}

/// Extract `@path` mentions from a prompt, trimming trailing punctuation.
#[must_use]
pub fn extract_mentions(prompt: &str) -> Vec<String> {
    mention_pattern()
        .captures_iter(prompt)
        .filter_map(|caps| caps.get(1))
        .map(|m| {
            m.as_str()
                .trim_end_matches(|c: char| {
                    matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | ')' | '"' | '\'')
                })
                .to_owned()
        })
        .filter(|m| !m.is_empty())
        .collect()
}

/// Resolve `input` to a regular file inside `root`, returned relative to
/// `root` with `/` separators.
///
/// # Errors
///
/// - `AppError::NotFound` — the path does not exist or is not a file.
/// - `AppError::Session` — the path resolves outside the session directory.
pub fn resolve_chat_path(root: &Path, input: &str) -> Result<String> {
    let candidate = Path::new(input);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let canonical = joined
        .canonicalize()
        .map_err(|_| AppError::NotFound(format!("file not found: {input}")))?;
    if !canonical.is_file() {
        return Err(AppError::NotFound(format!("not a regular file: {input}")));
    }

    let root = root
        .canonicalize()
        .map_err(|err| AppError::Session(format!("invalid session directory: {err}")))?;
    let relative = canonical
        .strip_prefix(&root)
        .map_err(|_| AppError::Session(format!("file is outside the session directory: {input}")))?;

    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Ok(parts.join("/"))
}
