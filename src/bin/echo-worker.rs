#![forbid(unsafe_code)]

//! `echo-worker`: reference worker speaking the orchestrator wire protocol.
//!
//! Echoes each prompt back as a stream chunk and a `finished` record. A few
//! bracketed markers in the prompt trigger other behaviors so the
//! orchestrator's failure paths can be exercised end to end:
//!
//! | Marker          | Behavior                                          |
//! |-----------------|---------------------------------------------------|
//! | `[hang]`        | stream one chunk, then never finish               |
//! | `[error]`       | emit an `error` record                            |
//! | `[crash]`       | exit with status 3 mid-interaction                |
//! | `[garbage]`     | emit malformed lines before the normal reply      |
//! | `[no-history]`  | finish successfully without `final_history`       |
//! | `[tool]`        | emit a tool-call start and its raw arguments      |
//! | `[context]`     | wrap part of the reply in `<context>` tags        |

use std::time::Duration;

use clap::Parser;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_conductor::models::wire::{
    FinishStatus, InteractionRequest, WorkerMessage, WorkerRequest, ROLE_LLM, ROLE_TOOL_ARGS,
    ROLE_TOOL_START,
};
use agent_conductor::worker::codec::LineCodec;
use agent_conductor::{AppError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "echo-worker",
    about = "Reference worker that echoes prompts",
    version,
    long_about = None
)]
struct Cli {
    /// Keep running when asked to terminate (exercises kill escalation).
    #[arg(long)]
    ignore_term: bool,

    /// Exit with this status right after launch (exercises startup failure).
    #[arg(long)]
    exit_immediately: Option<i32>,

    /// Delay before each emitted record, in milliseconds.
    #[arg(long, default_value_t = 0)]
    chunk_delay_ms: u64,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init()
        .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?;

    if let Some(code) = args.exit_immediately {
        error!(code, "echo-worker refusing to start");
        std::process::exit(code);
    }

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    if args.ignore_term {
        ignore_sigterm()?;
    }

    let mut out = Emitter {
        stdout: tokio::io::stdout(),
        delay: Duration::from_millis(args.chunk_delay_ms),
    };
    let mut input = FramedRead::new(tokio::io::stdin(), LineCodec::new());
    info!("echo-worker ready");

    while let Some(line) = input.next().await {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(%err, "unreadable request line");
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(WorkerRequest::Ping { session }) => {
                out.emit(&WorkerMessage::Pong { session }).await?;
            }
            Ok(WorkerRequest::InteractionRequest { data }) => {
                handle_interaction(&mut out, data).await?;
            }
            Err(err) => warn!(%err, "ignoring malformed request"),
        }
    }

    info!("stdin closed, echo-worker exiting");
    Ok(())
}

#[cfg(unix)]
fn ignore_sigterm() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        while sigterm.recv().await.is_some() {
            warn!("SIGTERM received, ignoring");
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn ignore_sigterm() -> Result<()> {
    Ok(())
}

struct Emitter {
    stdout: Stdout,
    delay: Duration,
}

impl Emitter {
    async fn emit(&mut self, message: &WorkerMessage) -> Result<()> {
        let line = message.to_json()?;
        self.raw(&line).await
    }

    async fn raw(&mut self, line: &str) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.stdout.write_all(line.as_bytes()).await?;
        self.stdout.write_all(b"\n").await?;
        self.stdout.flush().await?;
        Ok(())
    }

    async fn stream(&mut self, session: &str, role: &str, content: &str) -> Result<()> {
        self.emit(&WorkerMessage::Stream {
            session: session.to_owned(),
            role: role.to_owned(),
            content: content.to_owned(),
        })
        .await
    }
}

async fn handle_interaction(out: &mut Emitter, request: InteractionRequest) -> Result<()> {
    let session = request.session_path.clone();
    let prompt = request.prompt.clone();
    debug!(session, prompt, history = request.history.len(), "interaction received");

    if prompt.contains("[crash]") {
        out.stream(&session, ROLE_LLM, "about to crash").await?;
        error!("simulated crash");
        std::process::exit(3);
    }

    if prompt.contains("[error]") {
        return out
            .emit(&WorkerMessage::Error {
                session,
                message: "simulated failure".to_owned(),
            })
            .await;
    }

    if prompt.contains("[hang]") {
        out.stream(&session, ROLE_LLM, "Working...").await?;
        std::future::pending::<()>().await;
    }

    if prompt.contains("[garbage]") {
        out.raw("this is not json").await?;
        out.raw(r#"{"type":"stream","role":"llm","content":"no session"}"#)
            .await?;
        out.raw(r#"{"type":"telemetry","session":"x"}"#).await?;
    }

    if prompt.contains("[tool]") {
        out.stream(&session, ROLE_TOOL_START, "").await?;
        out.stream(&session, ROLE_TOOL_ARGS, r#"{"path":"<context>README.md</context>"}"#)
            .await?;
    }

    let reply = if prompt.contains("[context]") {
        format!("<context>hidden</context>Echo: {prompt}")
    } else {
        format!("Echo: {prompt}")
    };
    out.stream(&session, ROLE_LLM, &reply).await?;

    let final_history = if prompt.contains("[no-history]") {
        None
    } else {
        let mut history: Vec<Value> = request
            .history
            .iter()
            .map(|entry| serde_json::to_value(&entry.message))
            .collect::<std::result::Result<_, _>>()?;
        history.push(serde_json::json!({ "role": "assistant", "content": reply }));
        Some(history)
    };

    out.emit(&WorkerMessage::Finished {
        session,
        status: FinishStatus::Success,
        message: "done".to_owned(),
        final_history,
    })
    .await
}
