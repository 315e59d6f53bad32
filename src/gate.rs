//! Interaction gate: the `Idle` / `Busy(session)` state machine.
//!
//! Every submit, cancel and clear goes through one control lock, so the
//! check-then-act sequences below never interleave. The active interaction
//! itself lives in [`ActiveInteraction`], which the router also clears when
//! a `finished` or `error` record arrives.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};

use crate::config::{validate_model_name, ModelConfig};
use crate::context::ContextProvider;
use crate::filter::ContentFilter;
use crate::frontend::{Frontend, ROLE_INFO, ROLE_WARNING};
use crate::models::session::{ChatMessage, ROLE_USER};
use crate::models::wire::{InteractionRequest, ModelSettings, WorkerRequest};
use crate::router::report_session_error;
use crate::sessions::SessionRegistry;
use crate::worker::supervisor::WorkerSupervisor;
use crate::{AppError, Result};

/// Text flushed to a session when its interaction is cancelled.
pub const CANCELLED_MARKER: &str = "\n[Interaction cancelled by user.]\n";

/// Text flushed to a session when its history is replaced by the user.
pub const HISTORY_REVISED_MARKER: &str = "\n[History revised by user]\n";

/// The one in-flight interaction, if any.
#[derive(Debug, Default)]
pub struct ActiveInteraction(Mutex<Option<String>>);

impl ActiveInteraction {
    /// Create an empty (idle) binding.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Session of the in-flight interaction.
    pub async fn current(&self) -> Option<String> {
        self.0.lock().await.clone()
    }

    /// Bind the in-flight interaction to `session`.
    pub async fn set(&self, session: &str) {
        *self.0.lock().await = Some(session.to_owned());
    }

    /// Clear unconditionally, returning the previous session.
    pub async fn clear(&self) -> Option<String> {
        self.0.lock().await.take()
    }

    /// Clear only if the binding names `session`.
    pub async fn clear_if(&self, session: &str) -> bool {
        let mut guard = self.0.lock().await;
        if guard.as_deref() == Some(session) {
            *guard = None;
            true
        } else {
            false
        }
    }
}

/// Observable gate state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "session", rename_all = "snake_case")]
pub enum GateState {
    /// No interaction in flight.
    Idle,
    /// An interaction is running for the named session.
    Busy(String),
}

/// Parameters of one submission.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct SubmitRequest {
    /// Session identifier (a directory path).
    pub session: String,
    /// Fresh prompt; ignored when `history_override` is set.
    pub prompt: String,
    /// Full replacement history; bypasses mention expansion. An empty list
    /// counts as no override.
    pub history_override: Option<Vec<ChatMessage>>,
    /// Model identifier overriding the configured default.
    pub model: Option<String>,
}

impl SubmitRequest {
    /// A fresh prompt for `session`.
    #[must_use]
    pub fn prompt(session: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// A history override for `session`.
    #[must_use]
    pub fn revise(session: impl Into<String>, history: Vec<ChatMessage>) -> Self {
        Self {
            session: session.into(),
            history_override: Some(history),
            ..Self::default()
        }
    }

    /// Use `model` instead of the configured default.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// What happened to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// The request was written to the worker.
    Dispatched,
    /// The request was dropped (preemption declined or nothing to send).
    Ignored,
}

/// Serializes submissions and cancellations.
pub struct InteractionGate {
    control: Mutex<()>,
    active: Arc<ActiveInteraction>,
    sessions: Arc<SessionRegistry>,
    supervisor: Arc<WorkerSupervisor>,
    frontend: Arc<dyn Frontend>,
    context: Arc<dyn ContextProvider>,
    filter: Arc<dyn ContentFilter>,
    model: ModelConfig,
}

impl InteractionGate {
    /// Wire the gate to its collaborators.
    #[must_use]
    pub fn new(
        active: Arc<ActiveInteraction>,
        sessions: Arc<SessionRegistry>,
        supervisor: Arc<WorkerSupervisor>,
        frontend: Arc<dyn Frontend>,
        context: Arc<dyn ContextProvider>,
        filter: Arc<dyn ContentFilter>,
        model: ModelConfig,
    ) -> Self {
        Self {
            control: Mutex::new(()),
            active,
            sessions,
            supervisor,
            frontend,
            context,
            filter,
            model,
        }
    }

    /// Current gate state.
    pub async fn state(&self) -> GateState {
        match self.active.current().await {
            Some(session) => GateState::Busy(session),
            None => GateState::Idle,
        }
    }

    /// Submit a prompt or a history override.
    ///
    /// While busy, the front end is asked whether to preempt the running
    /// interaction; declining drops the request.
    ///
    /// # Errors
    ///
    /// - `AppError::Config` — missing or malformed model identifier.
    /// - `AppError::Session` — the session path is not a directory.
    /// - `AppError::Startup` / `AppError::Transport` — the worker could not
    ///   be reached, or preemption failed to restart it.
    pub async fn submit(&self, mut request: SubmitRequest) -> Result<SubmitOutcome> {
        // An empty override means "no override".
        request.history_override = request.history_override.filter(|h| !h.is_empty());
        let span = info_span!("submit", session = %request.session);
        async {
            let _control = self.control.lock().await;

            if let Some(running) = self.active.current().await {
                match self.confirm_preemption(&running, &request).await {
                    Ok(()) => {}
                    Err(AppError::ConfirmationDenied(reason)) => {
                        info!(running, reason, "preemption declined");
                        return Ok(SubmitOutcome::Ignored);
                    }
                    Err(err) => return Err(err),
                }

                if let Err(err) = self.cancel_active(&running).await {
                    self.frontend.user_message(&format!(
                        "Failed to cancel interaction for {running}; new request aborted: {err}"
                    ));
                    return Err(err);
                }
            }

            self.dispatch(request).await
        }
        .instrument(span)
        .await
    }

    /// Cancel the interaction running for `session`.
    ///
    /// Returns `false` if `session` holds no active interaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Startup` if the worker fails to restart; the gate
    /// is idle afterwards regardless.
    pub async fn cancel(&self, session: &str) -> Result<bool> {
        let span = info_span!("cancel", session);
        async {
            let _control = self.control.lock().await;
            let cancelled = self.cancel_active(session).await?;
            if !cancelled {
                self.frontend.user_message(&format!(
                    "No active interaction found for session {session} to cancel."
                ));
            }
            Ok(cancelled)
        }
        .instrument(span)
        .await
    }

    /// Clear a session's history. Refused while that session is busy.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the session path is not a directory.
    pub async fn clear_history(&self, session: &str) -> Result<bool> {
        let _control = self.control.lock().await;

        if self.active.current().await.as_deref() == Some(session) {
            self.frontend.user_message(&format!(
                "Cannot clear history while an interaction is running for {session}."
            ));
            return Ok(false);
        }

        let handle = self.sessions.get_or_create(session).await?;
        {
            let mut guard = handle.lock().await;
            guard.clear_history();
            guard.invalidate_cache();
        }
        self.frontend.clear_buffer(session);
        self.frontend
            .user_message(&format!("Cleared history for {session}."));
        info!(session, "history cleared");
        Ok(true)
    }

    async fn confirm_preemption(&self, running: &str, request: &SubmitRequest) -> Result<()> {
        let (action, dropped) = if request.history_override.is_some() {
            ("re-run with the revised history", "Revised history")
        } else {
            ("re-run with your new prompt", "New prompt")
        };

        let question = format!(
            "The worker is currently running for '{running}', do you want to stop it and {action}?"
        );
        let accepted = match self.frontend.ask_yes_no(&question).await {
            Ok(answer) => answer,
            Err(err) => {
                warn!(%err, "confirmation request failed, treating as declined");
                false
            }
        };

        if accepted {
            Ok(())
        } else {
            self.frontend
                .user_message(&format!("Worker busy with {running}. {dropped} ignored."));
            Err(AppError::ConfirmationDenied(format!(
                "interaction for {running} kept running"
            )))
        }
    }

    /// Restart the worker if `session` is active, then roll back its
    /// optimistic user turn and report the cancellation.
    async fn cancel_active(&self, session: &str) -> Result<bool> {
        if self.active.current().await.as_deref() != Some(session) {
            return Ok(false);
        }

        info!(session, "cancelling interaction by restarting worker");
        let restarted = self.supervisor.restart().await;

        if let Some(handle) = self.sessions.get(session).await {
            let mut guard = handle.lock().await;
            if !guard.rollback_user_turn() {
                warn!(session, "last history entry is not a user turn, history left untouched");
            }
            guard.invalidate_cache();
        }
        self.active.clear_if(session).await;
        self.frontend
            .flush_chunk(session, CANCELLED_MARKER, ROLE_WARNING);
        self.frontend.agent_finished(session);

        match restarted {
            Ok(generation) => {
                info!(session, generation, "interaction cancelled");
                Ok(true)
            }
            Err(err) => {
                warn!(session, %err, "worker restart failed during cancellation");
                self.frontend
                    .user_message(&format!("Worker failed to restart: {err}"));
                Err(err)
            }
        }
    }

    fn resolve_model(&self, requested: Option<&str>) -> Result<ModelSettings> {
        let name = requested
            .or(self.model.name.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                AppError::Config(
                    "no model configured, expected 'provider/model_name'".to_owned(),
                )
            })?;
        validate_model_name(name)?;

        Ok(ModelSettings {
            model: name.to_owned(),
            api_key: self.model.api_key.clone(),
            base_url: self.model.base_url.clone(),
            verbose: false,
        })
    }

    async fn dispatch(&self, request: SubmitRequest) -> Result<SubmitOutcome> {
        let SubmitRequest {
            session: session_id,
            prompt,
            history_override,
            model,
        } = request;

        let mut settings = match self.resolve_model(model.as_deref()) {
            Ok(settings) => settings,
            Err(err) => {
                warn!(session = session_id, %err, "submission rejected");
                self.frontend
                    .user_message(&format!("Configuration error: {err}"));
                return Err(err);
            }
        };

        if history_override.is_none() && prompt.trim().is_empty() {
            self.frontend.user_message("Empty prompt ignored.");
            return Ok(SubmitOutcome::Ignored);
        }

        let handle = match self.sessions.get_or_create(&session_id).await {
            Ok(handle) => handle,
            Err(err) => {
                self.frontend.user_message(&err.to_string());
                return Err(err);
            }
        };

        let envelope = {
            let mut session = handle.lock().await;
            let mention_source = match history_override {
                Some(history) => {
                    let history = history
                        .into_iter()
                        .map(|mut m| {
                            m.content = self.filter.filter(&m.content);
                            m
                        })
                        .collect();
                    session.set_history(history);
                    session.invalidate_cache();
                    self.frontend
                        .flush_chunk(&session_id, HISTORY_REVISED_MARKER, ROLE_INFO);
                    None
                }
                None => {
                    session.append_message(ChatMessage::user(prompt.clone()));
                    self.frontend.flush_chunk(
                        &session_id,
                        &format!("\n\nUser:\n{prompt}\n"),
                        ROLE_USER,
                    );
                    Some(prompt.as_str())
                }
            };

            let context = match self.context.generate(&mut session, mention_source) {
                Ok(context) => context,
                Err(err) => {
                    warn!(
                        session = session_id,
                        %err,
                        "context generation failed, sending empty context"
                    );
                    self.frontend.user_message(&format!(
                        "Failed to generate context for {session_id}: {err}"
                    ));
                    String::new()
                }
            };

            settings.verbose = session.verbose();
            InteractionRequest {
                session_path: session_id.clone(),
                prompt: session.last_content().unwrap_or_default().to_owned(),
                history: session.history().to_vec(),
                config: settings,
                chat_files: session.chat_files().to_vec(),
                context,
            }
        };

        self.active.set(&session_id).await;
        let request = WorkerRequest::InteractionRequest { data: envelope };
        if let Err(err) = self.supervisor.send(&request).await {
            warn!(session = session_id, %err, "dispatch failed");
            report_session_error(
                self.frontend.as_ref(),
                &self.active,
                &session_id,
                &format!("[Error sending request to worker: {err}]"),
            )
            .await;
            return Err(err);
        }

        info!(session = session_id, "interaction dispatched");
        Ok(SubmitOutcome::Dispatched)
    }
}
