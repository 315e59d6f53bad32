//! Orchestrator: owns the session registry, the interaction gate, and the
//! worker supervisor, and exposes every inbound front-end operation.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::context::{resolve_chat_path, ContextProvider, WorkspaceContext};
use crate::filter::{ContentFilter, TagFilter};
use crate::frontend::Frontend;
use crate::gate::{ActiveInteraction, GateState, InteractionGate, SubmitOutcome, SubmitRequest};
use crate::models::session::HistoryEntry;
use crate::models::wire::WorkerRequest;
use crate::router::MessageRouter;
use crate::sessions::{SessionHandle, SessionRegistry};
use crate::worker::queue::{GenerationCounter, InboundQueue};
use crate::worker::supervisor::{WorkerState, WorkerSupervisor};
use crate::Result;

/// The process-wide coordinator handed to every request handler.
pub struct Orchestrator {
    config: GlobalConfig,
    sessions: Arc<SessionRegistry>,
    active: Arc<ActiveInteraction>,
    supervisor: Arc<WorkerSupervisor>,
    gate: InteractionGate,
    frontend: Arc<dyn Frontend>,
}

impl Orchestrator {
    /// Build an orchestrator with the default context provider and filter.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a configured filter tag is invalid.
    pub fn new(config: GlobalConfig, frontend: Arc<dyn Frontend>) -> Result<Self> {
        let filter = Arc::new(TagFilter::new(&config.session.filter_tags)?);
        Ok(Self::with_collaborators(
            config,
            frontend,
            Arc::new(WorkspaceContext::default()),
            filter,
        ))
    }

    /// Build an orchestrator around explicit collaborators.
    #[must_use]
    pub fn with_collaborators(
        config: GlobalConfig,
        frontend: Arc<dyn Frontend>,
        context: Arc<dyn ContextProvider>,
        filter: Arc<dyn ContentFilter>,
    ) -> Self {
        let sessions = Arc::new(SessionRegistry::new(config.session.verbose));
        let active = Arc::new(ActiveInteraction::new());
        let queue = Arc::new(InboundQueue::new());
        let generation = GenerationCounter::new();

        let router = Arc::new(MessageRouter::new(
            Arc::clone(&queue),
            generation.clone(),
            Arc::clone(&sessions),
            Arc::clone(&active),
            Arc::clone(&frontend),
            Arc::clone(&filter),
        ));
        let supervisor = Arc::new(WorkerSupervisor::new(
            config.worker.clone(),
            generation,
            queue,
            router,
        ));
        let gate = InteractionGate::new(
            Arc::clone(&active),
            Arc::clone(&sessions),
            Arc::clone(&supervisor),
            Arc::clone(&frontend),
            context,
            filter,
            config.model.clone(),
        );

        Self {
            config,
            sessions,
            active,
            supervisor,
            gate,
            frontend,
        }
    }

    /// Launch the worker.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Startup` if the worker dies during the grace delay.
    pub async fn start(&self) -> Result<u64> {
        let span = info_span!("orchestrator_start", program = %self.config.worker.program);
        self.supervisor.start().instrument(span).await
    }

    /// Stop the worker and forget any in-flight interaction.
    pub async fn shutdown(&self) {
        info!("orchestrator shutting down");
        self.supervisor.stop().await;
        if let Some(session) = self.active.clear().await {
            warn!(session, "interaction abandoned at shutdown");
        }
    }

    /// History of `session` as `(timestamp, message)` pairs.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the session path is not a directory.
    pub async fn get_history(&self, session: &str) -> Result<Vec<HistoryEntry>> {
        let handle = self.session(session).await?;
        let history = handle.lock().await.history().to_vec();
        Ok(history)
    }

    /// Add a file to the session's chat files.
    ///
    /// Returns `false` if the file is already selected, does not exist, or
    /// lies outside the session directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the session path is not a directory.
    pub async fn add_file(&self, session: &str, path: &str) -> Result<bool> {
        let handle = self.session(session).await?;
        let mut guard = handle.lock().await;

        let relative = match resolve_chat_path(guard.root(), path) {
            Ok(relative) => relative,
            Err(err) => {
                self.frontend
                    .user_message(&format!("Cannot add {path}: {err}"));
                return Ok(false);
            }
        };

        let added = guard.add_chat_file(relative.clone());
        let message = if added {
            format!("Added {relative} to chat files for {session}.")
        } else {
            format!("{relative} is already in chat files for {session}.")
        };
        self.frontend.user_message(&message);
        Ok(added)
    }

    /// Remove a file from the session's chat files.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the session path is not a directory.
    pub async fn remove_file(&self, session: &str, path: &str) -> Result<bool> {
        let handle = self.session(session).await?;
        let mut guard = handle.lock().await;

        // Removed files may no longer exist on disk.
        let relative = resolve_chat_path(guard.root(), path)
            .unwrap_or_else(|_| strip_root(guard.root(), path));

        let removed = guard.remove_chat_file(&relative);
        let message = if removed {
            format!("Removed {relative} from chat files for {session}.")
        } else {
            format!("{relative} is not in chat files for {session}.")
        };
        self.frontend.user_message(&message);
        Ok(removed)
    }

    /// Chat files of `session`, relative to its directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the session path is not a directory.
    pub async fn list_chat_files(&self, session: &str) -> Result<Vec<String>> {
        let handle = self.session(session).await?;
        let files = handle.lock().await.chat_files().to_vec();
        Ok(files)
    }

    /// Submit a prompt or history override. See [`InteractionGate::submit`].
    ///
    /// # Errors
    ///
    /// Propagates gate errors; all of them have already been reported to
    /// the front end.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitOutcome> {
        self.gate.submit(request).await
    }

    /// Cancel the interaction running for `session`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Startup` if the worker fails to restart.
    pub async fn cancel(&self, session: &str) -> Result<bool> {
        self.gate.cancel(session).await
    }

    /// Clear the history of `session`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the session path is not a directory.
    pub async fn clear_history(&self, session: &str) -> Result<bool> {
        self.gate.clear_history(session).await
    }

    /// Send a liveness check; the `pong` only shows up in the log.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Startup` or `AppError::Transport` if the worker
    /// cannot be reached.
    pub async fn ping(&self, session: &str) -> Result<()> {
        let request = WorkerRequest::Ping {
            session: session.to_owned(),
        };
        if let Err(err) = self.supervisor.send(&request).await {
            self.frontend
                .user_message(&format!("Worker ping failed: {err}"));
            return Err(err);
        }
        Ok(())
    }

    /// Current gate state.
    pub async fn gate_state(&self) -> GateState {
        self.gate.state().await
    }

    /// Current worker lifecycle state.
    pub async fn worker_state(&self) -> WorkerState {
        self.supervisor.state().await
    }

    /// The worker supervisor.
    #[must_use]
    pub fn supervisor(&self) -> &Arc<WorkerSupervisor> {
        &self.supervisor
    }

    async fn session(&self, session: &str) -> Result<SessionHandle> {
        match self.sessions.get_or_create(session).await {
            Ok(handle) => Ok(handle),
            Err(err) => {
                self.frontend.user_message(&err.to_string());
                Err(err)
            }
        }
    }
}

fn strip_root(root: &Path, path: &str) -> String {
    let candidate = Path::new(path);
    candidate
        .strip_prefix(root)
        .unwrap_or(candidate)
        .to_string_lossy()
        .trim_start_matches("./")
        .to_owned()
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("worker", &self.config.worker.program)
            .finish_non_exhaustive()
    }
}

