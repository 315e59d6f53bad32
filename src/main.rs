#![forbid(unsafe_code)]

//! `agent-conductor`: editor-facing worker orchestrator binary.
//!
//! Loads configuration, launches the worker, and serves the editor over
//! line-delimited JSON on stdin/stdout. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_conductor::config::{validate_model_name, GlobalConfig};
use agent_conductor::frontend::stdio::{run_writer, serve, StdioFrontend};
use agent_conductor::frontend::Frontend;
use agent_conductor::{AppError, Orchestrator, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "agent-conductor",
    about = "Editor-facing AI worker orchestrator",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the default model identifier (`provider/model`).
    #[arg(long)]
    model: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-conductor bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(model) = args.model {
        validate_model_name(&model)?;
        config.model.name = Some(model);
    }
    config.load_credentials().await?;
    info!(
        worker = %config.worker.program,
        model = config.model.name.as_deref().unwrap_or("<unset>"),
        "configuration loaded"
    );

    // ── Wire the orchestrator ───────────────────────────
    let (frontend, outbound) = StdioFrontend::new();
    let sink: Arc<dyn Frontend> = Arc::clone(&frontend) as Arc<dyn Frontend>;
    let orchestrator = Arc::new(Orchestrator::new(config, sink)?);

    // A worker that fails here is retried once by the first send.
    if let Err(err) = orchestrator.start().await {
        error!(%err, "worker failed to start");
    }

    let ct = CancellationToken::new();
    let writer = tokio::spawn(run_writer(tokio::io::stdout(), outbound, ct.clone()));
    let reader = serve(
        Arc::clone(&orchestrator),
        Arc::clone(&frontend),
        tokio::io::stdin(),
        ct.clone(),
    );

    // ── Serve until the editor leaves or a signal arrives ─
    tokio::select! {
        () = reader => info!("frontend disconnected"),
        () = shutdown_signal() => info!("shutdown signal received"),
    }

    ct.cancel();
    orchestrator.shutdown().await;

    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(%err, "frontend writer ended with error"),
        Err(err) => warn!(%err, "frontend writer task failed"),
    }

    info!("agent-conductor stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the editor protocol.
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
