//! Line-delimited JSON transport to the editor over stdin/stdout.
//!
//! ## Protocol
//!
//! Requests from the editor (one JSON object per line):
//! ```json
//! {"id": 1, "method": "submit", "params": {"session": "/proj", "prompt": "hi"}}
//! {"id": 2, "method": "cancel", "params": {"session": "/proj"}}
//! ```
//!
//! Responses:
//! ```json
//! {"id": 1, "result": null}
//! {"id": 2, "error": "session: invalid session path (not a directory): /x"}
//! ```
//!
//! Notifications carry `method` and `params` without an `id`. Confirmations
//! are requests in the other direction: the orchestrator sends
//! `{"id": "ask-<uuid>", "method": "ask_yes_no", "params": {"prompt": …}}`
//! and the editor answers `{"id": "ask-<uuid>", "result": true}`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::frontend::{Frontend, Notification};
use crate::gate::SubmitRequest;
use crate::orchestrator::Orchestrator;
use crate::worker::codec::LineCodec;
use crate::{AppError, Result};

/// Editor-side [`Frontend`] speaking line-delimited JSON.
#[derive(Debug)]
pub struct StdioFrontend {
    out: mpsc::UnboundedSender<Value>,
    pending: Mutex<HashMap<String, oneshot::Sender<bool>>>,
}

impl StdioFrontend {
    /// Create the frontend and the receiving end for [`run_writer`].
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Value>) {
        let (out, rx) = mpsc::unbounded_channel();
        let frontend = Arc::new(Self {
            out,
            pending: Mutex::new(HashMap::new()),
        });
        (frontend, rx)
    }

    fn send(&self, value: Value) {
        if self.out.send(value).is_err() {
            debug!("frontend writer closed, dropping outbound message");
        }
    }

    fn notify(&self, notification: &Notification) {
        match serde_json::to_value(notification) {
            Ok(value) => self.send(value),
            Err(err) => warn!(%err, "failed to serialise notification"),
        }
    }

    /// Deliver the editor's answer to a pending confirmation.
    ///
    /// Returns `false` if no confirmation with `id` is waiting.
    pub async fn resolve_reply(&self, id: &str, answer: bool) -> bool {
        match self.pending.lock().await.remove(id) {
            Some(tx) => tx.send(answer).is_ok(),
            None => false,
        }
    }

    /// Fail every pending confirmation; used when the editor disconnects.
    pub async fn close_pending(&self) {
        let mut pending = self.pending.lock().await;
        if !pending.is_empty() {
            warn!(count = pending.len(), "dropping unanswered confirmations");
        }
        pending.clear();
    }
}

impl Frontend for StdioFrontend {
    fn flush_chunk(&self, session: &str, content: &str, role: &str) {
        self.notify(&Notification::FlushChunk {
            session: session.to_owned(),
            content: content.to_owned(),
            role: role.to_owned(),
        });
    }

    fn agent_finished(&self, session: &str) {
        self.notify(&Notification::AgentFinished {
            session: session.to_owned(),
        });
    }

    fn clear_buffer(&self, session: &str) {
        self.notify(&Notification::ClearBuffer {
            session: session.to_owned(),
        });
    }

    fn user_message(&self, message: &str) {
        self.notify(&Notification::UserMessage {
            message: message.to_owned(),
        });
    }

    fn ask_yes_no<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            let id = format!("ask-{}", Uuid::new_v4());
            let (tx, rx) = oneshot::channel();
            self.pending.lock().await.insert(id.clone(), tx);

            self.send(json!({
                "id": id,
                "method": "ask_yes_no",
                "params": { "prompt": prompt },
            }));

            rx.await.map_err(|_| {
                AppError::Frontend(format!("confirmation {id} was never answered"))
            })
        })
    }
}

/// Writer task: serialise outbound values as NDJSON lines.
///
/// Exits when `cancel` fires or every sender is dropped.
///
/// # Errors
///
/// Returns `AppError::Frontend` if a write fails.
pub async fn run_writer<W>(
    writer: W,
    mut rx: mpsc::UnboundedReceiver<Value>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = writer;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("frontend writer: cancellation received, stopping");
                break;
            }

            msg = rx.recv() => {
                let Some(value) = msg else {
                    debug!("frontend writer: channel closed, stopping");
                    break;
                };

                let mut bytes = serde_json::to_vec(&value)?;
                bytes.push(b'\n');

                writer.write_all(&bytes).await.map_err(|e| {
                    warn!(error = %e, "frontend writer: write failed");
                    AppError::Frontend(format!("write failed: {e}"))
                })?;
                writer.flush().await.map_err(|e| {
                    AppError::Frontend(format!("flush failed: {e}"))
                })?;
            }
        }
    }

    Ok(())
}

/// One inbound request from the editor.
#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct SessionParams {
    session: String,
}

#[derive(Debug, Deserialize)]
struct FileParams {
    session: String,
    path: String,
}

/// Reader loop: dispatch editor requests until EOF or cancellation.
///
/// Each request runs on its own task so a pending confirmation never stalls
/// the reader. Confirmation replies are routed back to the waiting
/// [`Frontend::ask_yes_no`] call.
pub async fn serve<R>(
    orchestrator: Arc<Orchestrator>,
    frontend: Arc<StdioFrontend>,
    input: R,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let span = info_span!("frontend_reader");
    async move {
        let mut framed = FramedRead::new(input, LineCodec::new());

        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => {
                    info!("frontend reader cancelled");
                    break;
                }
                next = framed.next() => next,
            };

            match next {
                None => {
                    info!("frontend closed its input");
                    break;
                }
                Some(Err(AppError::Protocol(msg))) => {
                    warn!(error = msg.as_str(), "skipping oversized frontend line");
                }
                Some(Err(err)) => {
                    warn!(%err, "frontend read failed");
                    break;
                }
                Some(Ok(line)) => {
                    handle_line(&orchestrator, &frontend, line.trim()).await;
                }
            }
        }

        frontend.close_pending().await;
    }
    .instrument(span)
    .await;
}

async fn handle_line(orchestrator: &Arc<Orchestrator>, frontend: &Arc<StdioFrontend>, line: &str) {
    if line.is_empty() {
        return;
    }

    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => {
            warn!(%err, "invalid json from frontend");
            frontend.send(json!({ "id": Value::Null, "error": format!("invalid json: {err}") }));
            return;
        }
    };

    // A reply to one of our confirmations.
    if value.get("method").is_none() {
        if let Some(id) = value.get("id").and_then(Value::as_str) {
            let answer = value.get("result").and_then(Value::as_bool).unwrap_or(false);
            if !frontend.resolve_reply(id, answer).await {
                debug!(id, "reply for unknown confirmation");
            }
        }
        return;
    }

    let request: RpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(err) => {
            frontend.send(json!({ "id": Value::Null, "error": format!("invalid request: {err}") }));
            return;
        }
    };

    let orchestrator = Arc::clone(orchestrator);
    let frontend = Arc::clone(frontend);
    let span = info_span!("frontend_request", method = %request.method);
    tokio::spawn(
        async move {
            let id = request.id.clone();
            let response = match dispatch(&orchestrator, request).await {
                Ok(result) => json!({ "id": id, "result": result }),
                Err(err) => json!({ "id": id, "error": err.to_string() }),
            };
            frontend.send(response);
        }
        .instrument(span),
    );
}

/// Route one request to the orchestrator.
async fn dispatch(orchestrator: &Orchestrator, request: RpcRequest) -> Result<Value> {
    let RpcRequest { method, params, .. } = request;
    match method.as_str() {
        "get_history" => {
            let p: SessionParams = serde_json::from_value(params)?;
            Ok(serde_json::to_value(orchestrator.get_history(&p.session).await?)?)
        }
        "add_file" => {
            let p: FileParams = serde_json::from_value(params)?;
            Ok(json!(orchestrator.add_file(&p.session, &p.path).await?))
        }
        "remove_file" => {
            let p: FileParams = serde_json::from_value(params)?;
            Ok(json!(orchestrator.remove_file(&p.session, &p.path).await?))
        }
        "list_chat_files" => {
            let p: SessionParams = serde_json::from_value(params)?;
            Ok(json!(orchestrator.list_chat_files(&p.session).await?))
        }
        "submit" => {
            let p: SubmitRequest = serde_json::from_value(params)?;
            orchestrator.submit(p).await?;
            Ok(Value::Null)
        }
        "cancel" => {
            let p: SessionParams = serde_json::from_value(params)?;
            Ok(json!(orchestrator.cancel(&p.session).await?))
        }
        "clear_history" => {
            let p: SessionParams = serde_json::from_value(params)?;
            Ok(json!(orchestrator.clear_history(&p.session).await?))
        }
        "ping" => {
            let p: SessionParams = serde_json::from_value(params)?;
            orchestrator.ping(&p.session).await?;
            Ok(Value::Null)
        }
        other => Err(AppError::NotFound(format!("unknown method: {other}"))),
    }
}
