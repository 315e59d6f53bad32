//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Keychain service under which the model API key is stored.
pub const KEYRING_SERVICE: &str = "agent-conductor";

/// Environment variable consulted when the keychain has no API key.
pub const API_KEY_ENV: &str = "AGENT_CONDUCTOR_API_KEY";

/// How the worker process is launched and torn down.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Executable that runs the worker (an interpreter or a native binary).
    pub program: String,
    /// Optional script handed to `program` as its first argument.
    #[serde(default)]
    pub script: Option<PathBuf>,
    /// Extra arguments appended after the script.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory of the worker; defaults to the script's directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Delay after launch before the liveness check.
    #[serde(default = "default_startup_grace_ms")]
    pub startup_grace_ms: u64,
    /// Graceful-termination window before the worker is killed.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    /// Bounded wait for the pump and router loops after a stop.
    #[serde(default = "default_loop_join_timeout_ms")]
    pub loop_join_timeout_ms: u64,
}

fn default_startup_grace_ms() -> u64 {
    500
}

fn default_stop_timeout_ms() -> u64 {
    2000
}

fn default_loop_join_timeout_ms() -> u64 {
    2000
}

impl WorkerConfig {
    /// Build a config for a bare executable with default timings.
    #[must_use]
    pub fn for_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            script: None,
            args: Vec::new(),
            working_dir: None,
            startup_grace_ms: default_startup_grace_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            loop_join_timeout_ms: default_loop_join_timeout_ms(),
        }
    }

    /// Directory the worker is pinned to.
    ///
    /// Falls back to the script's parent directory, then to the current
    /// directory of the orchestrator.
    #[must_use]
    pub fn resolved_working_dir(&self) -> Option<PathBuf> {
        self.working_dir.clone().or_else(|| {
            self.script
                .as_ref()
                .and_then(|s| s.parent())
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
        })
    }

    /// Liveness-check delay.
    #[must_use]
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    /// Graceful stop window.
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Loop join window.
    #[must_use]
    pub fn loop_join_timeout(&self) -> Duration {
        Duration::from_millis(self.loop_join_timeout_ms)
    }
}

/// Default model settings used when a submit does not carry its own.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ModelConfig {
    /// Model identifier in `provider/model` form.
    #[serde(default)]
    pub name: Option<String>,
    /// Optional API base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// API key (populated at runtime, never read from the file).
    #[serde(skip)]
    pub api_key: Option<String>,
}

/// Per-session defaults.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Initial verbosity flag of new sessions.
    #[serde(default = "default_true")]
    pub verbose: bool,
    /// Tags whose blocks are stripped from worker output before display.
    #[serde(default = "default_filter_tags")]
    pub filter_tags: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_filter_tags() -> Vec<String> {
    vec!["context".into()]
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            verbose: true,
            filter_tags: default_filter_tags(),
        }
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Worker launch settings.
    pub worker: WorkerConfig,
    /// Default model settings.
    #[serde(default)]
    pub model: ModelConfig,
    /// Session defaults.
    #[serde(default)]
    pub session: SessionConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration for the given worker with all other defaults.
    #[must_use]
    pub fn with_worker(worker: WorkerConfig) -> Self {
        Self {
            worker,
            model: ModelConfig::default(),
            session: SessionConfig::default(),
        }
    }

    /// Load the model API key from the OS keychain with env-var fallback.
    ///
    /// A missing key is not an error: local model providers run without one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the keychain task panics.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.model.api_key = load_credential("api_key", API_KEY_ENV).await?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.worker.program.trim().is_empty() {
            return Err(AppError::Config("worker.program must not be empty".into()));
        }

        if self.worker.stop_timeout_ms == 0 {
            return Err(AppError::Config(
                "worker.stop_timeout_ms must be greater than zero".into(),
            ));
        }

        if let Some(ref name) = self.model.name {
            validate_model_name(name)?;
        }

        Ok(())
    }
}

/// Check that a model identifier has the `provider/model` shape.
///
/// # Errors
///
/// Returns `AppError::Config` naming the offending value.
pub fn validate_model_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    match trimmed.split_once('/') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => Ok(()),
        _ => Err(AppError::Config(format!(
            "invalid or missing model '{name}', expected 'provider/model_name' \
             (e.g. 'ollama/llama3', 'openai/gpt-4o')"
        ))),
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<Option<String>> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(Some(value)),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            debug!(key = keyring_key, ?err, "keychain lookup failed, trying env var");
        }
    }

    Ok(env::var(env_key).ok().filter(|v| !v.is_empty()))
}
