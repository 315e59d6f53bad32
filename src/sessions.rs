//! Session registry: sessions keyed by the path the front end uses.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::models::session::Session;
use crate::{AppError, Result};

/// Shared handle to one session.
pub type SessionHandle = Arc<Mutex<Session>>;

/// All sessions seen since startup. Sessions are never removed.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    default_verbose: bool,
}

impl SessionRegistry {
    /// Create an empty registry; new sessions start with `default_verbose`.
    #[must_use]
    pub fn new(default_verbose: bool) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            default_verbose,
        }
    }

    /// Look up a session, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if `id` is not an existing directory.
    pub async fn get_or_create(&self, id: &str) -> Result<SessionHandle> {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(id) {
            return Ok(Arc::clone(existing));
        }

        let root = Path::new(id);
        if !root.is_dir() {
            return Err(AppError::Session(format!(
                "invalid session path (not a directory): {id}"
            )));
        }

        info!(session = id, "creating session");
        let handle = Arc::new(Mutex::new(Session::new(id, root, self.default_verbose)));
        sessions.insert(id.to_owned(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Look up an existing session.
    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.lock().await.get(id).cloned()
    }
}
