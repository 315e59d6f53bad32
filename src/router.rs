//! Message router: the single consumer of the inbound queue.
//!
//! One router task runs per worker generation. It dispatches records in
//! arrival order, discards anything tagged with an older generation, and
//! exits on the sentinel of its own generation (or a newer one).

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::filter::ContentFilter;
use crate::frontend::{Frontend, ROLE_ERROR};
use crate::gate::ActiveInteraction;
use crate::models::session::ChatMessage;
use crate::models::wire::{
    parse_worker_line, value_to_text, FinishStatus, WorkerMessage, ROLE_TOOL_ARGS, ROLE_TOOL_START,
};
use crate::sessions::SessionRegistry;
use crate::worker::queue::{GenerationCounter, InboundQueue, PendingMessage};

/// Dispatches worker records to sessions and the front end.
pub struct MessageRouter {
    queue: Arc<InboundQueue>,
    generation: GenerationCounter,
    sessions: Arc<SessionRegistry>,
    active: Arc<ActiveInteraction>,
    frontend: Arc<dyn Frontend>,
    filter: Arc<dyn ContentFilter>,
}

impl MessageRouter {
    /// Create a router over the shared queue and generation counter.
    #[must_use]
    pub fn new(
        queue: Arc<InboundQueue>,
        generation: GenerationCounter,
        sessions: Arc<SessionRegistry>,
        active: Arc<ActiveInteraction>,
        frontend: Arc<dyn Frontend>,
        filter: Arc<dyn ContentFilter>,
    ) -> Self {
        Self {
            queue,
            generation,
            sessions,
            active,
            frontend,
            filter,
        }
    }

    /// Consume the queue on behalf of `generation` until its sentinel.
    pub async fn run(self: Arc<Self>, generation: u64) {
        let span = info_span!("message_router", generation);
        self.consume(generation).instrument(span).await;
    }

    async fn consume(&self, generation: u64) {
        let mut rx = self.queue.consumer().await;
        info!("router started");

        while let Some(item) = rx.recv().await {
            let current = self.generation.current();
            match item {
                PendingMessage::Sentinel { generation: tag } => {
                    if tag >= generation {
                        debug!(tag, "end of worker output");
                        break;
                    }
                    debug!(tag, "discarding stale sentinel");
                }
                PendingMessage::Line { generation: tag, .. }
                | PendingMessage::ReadFailed { generation: tag, .. }
                    if tag < current || tag < generation =>
                {
                    debug!(tag, current, "discarding stale worker output");
                }
                PendingMessage::Line { line, .. } => self.handle_line(&line).await,
                PendingMessage::ReadFailed { error, .. } => self.on_read_failed(&error).await,
            }
        }

        info!("router stopped");
    }

    /// Parse and dispatch one raw line. Malformed lines are logged and
    /// skipped.
    pub async fn handle_line(&self, line: &str) {
        match parse_worker_line(line) {
            Ok(Some(message)) => self.dispatch(message).await,
            Ok(None) => {}
            Err(err) => warn!(%err, "skipping malformed worker line"),
        }
    }

    /// Dispatch one decoded record.
    pub async fn dispatch(&self, message: WorkerMessage) {
        match message {
            WorkerMessage::Stream {
                session,
                role,
                content,
            } => self.on_stream(&session, &role, &content),
            WorkerMessage::Finished {
                session,
                status,
                message,
                final_history,
            } => {
                self.on_finished(&session, status, &message, final_history)
                    .await;
            }
            WorkerMessage::Error { session, message } => {
                warn!(session, message, "worker reported an error");
                report_session_error(
                    self.frontend.as_ref(),
                    &self.active,
                    &session,
                    &format!("[Worker Error: {message}]"),
                )
                .await;
            }
            WorkerMessage::Pong { session } => debug!(session, "pong"),
        }
    }

    fn on_stream(&self, session: &str, role: &str, content: &str) {
        let text = if role == ROLE_TOOL_ARGS {
            content.to_owned()
        } else {
            self.filter.filter(content)
        };

        if !text.is_empty() || role == ROLE_TOOL_START {
            self.frontend.flush_chunk(session, &text, role);
        }
    }

    async fn on_finished(
        &self,
        session: &str,
        status: FinishStatus,
        message: &str,
        final_history: Option<Vec<Value>>,
    ) {
        info!(session, ?status, message, "interaction finished");

        if status.persists_history() {
            match final_history {
                Some(items) => self.persist_history(session, items).await,
                None => {
                    warn!(session, ?status, "finished without final history, keeping history");
                }
            }
        }

        if self.active.clear_if(session).await {
            debug!(session, "interaction cleared");
        }
        self.frontend.agent_finished(session);
    }

    async fn persist_history(&self, session: &str, items: Vec<Value>) {
        let messages = self.filter_history(session, items);
        match self.sessions.get_or_create(session).await {
            Ok(handle) => {
                let count = messages.len();
                handle.lock().await.set_history(messages);
                debug!(session, count, "history replaced");
            }
            Err(err) => warn!(session, %err, "cannot store final history"),
        }
    }

    /// Filter message content. Entries that are not objects are kept as
    /// role-less text messages.
    fn filter_history(&self, session: &str, items: Vec<Value>) -> Vec<ChatMessage> {
        items
            .into_iter()
            .filter_map(|item| {
                if !item.is_object() {
                    debug!(session, "keeping non-object history entry as text");
                    return Some(ChatMessage::new("", value_to_text(item)));
                }
                match serde_json::from_value::<ChatMessage>(normalize_entry(item)) {
                    Ok(mut message) => {
                        message.content = self.filter.filter(&message.content);
                        Some(message)
                    }
                    Err(err) => {
                        warn!(session, %err, "skipping malformed history entry");
                        None
                    }
                }
            })
            .collect()
    }

    /// Worker output ended on a read error: the interaction in flight will
    /// never finish, so end it here.
    async fn on_read_failed(&self, error: &str) {
        warn!(error, "worker output lost");
        if let Some(session) = self.active.current().await {
            report_session_error(
                self.frontend.as_ref(),
                &self.active,
                &session,
                &format!("[Worker output lost: {error}]"),
            )
            .await;
        }
    }
}

/// Stringify non-string `role` and `content` so every message carries text.
fn normalize_entry(mut item: Value) -> Value {
    if let Some(obj) = item.as_object_mut() {
        for key in ["role", "content"] {
            if let Some(field) = obj.get_mut(key).filter(|f| !f.is_string()) {
                let text = value_to_text(field.take());
                *field = Value::String(text);
            }
        }
    }
    item
}

/// Surface a session-scoped failure to the front end.
///
/// Flushes `text` as an error chunk and, if the failing session held the
/// active interaction, clears it and signals `agent_finished`. Shared by
/// worker-reported errors and transport failures.
pub async fn report_session_error(
    frontend: &dyn Frontend,
    active: &ActiveInteraction,
    session: &str,
    text: &str,
) {
    frontend.flush_chunk(session, text, ROLE_ERROR);
    if active.clear_if(session).await {
        frontend.agent_finished(session);
    }
}
