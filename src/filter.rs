//! Content filter applied to worker output before it reaches the editor.
//!
//! Workers echo back blocks of injected context wrapped in tags such as
//! `<context>…</context>`; those blocks are noise on screen and are removed.

use regex::Regex;

use crate::{AppError, Result};

/// Pure text transformation applied to stream chunks and history content.
pub trait ContentFilter: Send + Sync {
    /// Return `text` with filtered regions removed.
    fn filter(&self, text: &str) -> String;
}

/// Removes `<tag>…</tag>` blocks for a fixed set of tags.
#[derive(Debug, Clone)]
pub struct TagFilter {
    patterns: Vec<Regex>,
}

impl TagFilter {
    /// Compile a filter for `tags`. An empty list yields a no-op filter.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a tag produces an invalid pattern.
    pub fn new(tags: &[String]) -> Result<Self> {
        let patterns = tags
            .iter()
            .filter(|t| !t.trim().is_empty())
            .map(|tag| {
                let tag = regex::escape(tag.trim());
                Regex::new(&format!("(?s)<{tag}>.*?</{tag}>"))
                    .map_err(|err| AppError::Config(format!("invalid filter tag '{tag}': {err}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// A filter that passes text through untouched.
    #[must_use]
    pub fn passthrough() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }
}

impl ContentFilter for TagFilter {
    fn filter(&self, text: &str) -> String {
        let mut out = text.to_owned();
        for pattern in &self.patterns {
            if pattern.is_match(&out) {
                out = pattern.replace_all(&out, "").into_owned();
            }
        }
        out
    }
}
