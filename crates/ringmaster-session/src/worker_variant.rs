//! Worker variant adapters — one per supported coding-agent CLI (C8).
//!
//! A [`WorkerVariant`] knows how to check whether its binary is on `PATH`
//! and how to turn a [`SessionConfig`] into a running [`SessionHandle`].
//! Each variant spawns its CLI inside a PTY from a shared [`PtyPool`] so the
//! executor can stream merged stdout/stderr the same way for every worker
//! type, regardless of how that type's flags or prompt-passing convention
//! differ.
//!
//! Five variants cover the closed set from SPEC_FULL.md §3: `claude-code`,
//! `aider`, `codex`, `goose`, and `generic` (fully driven by the worker's
//! [`LaunchTemplate`], for CLIs the engine has no built-in knowledge of).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use ringmaster_core::types::{LaunchTemplate, SessionConfig, SessionResult, SessionStatus, WorkerType};
use tracing::{debug, info, warn};

use crate::pty_pool::{PtyError, PtyHandle, PtyPool};

pub type Result<T> = std::result::Result<T, PtyError>;

/// Checks whether `binary` resolves on `PATH`, the same way a shell would.
///
/// Grounded on the bridge's `/api/cli/availability` handler
/// (`detect_cli_binary`), generalized to an `async` call so the executor
/// never blocks the event loop on it.
pub async fn binary_on_path(binary: &str) -> bool {
    tokio::process::Command::new("which")
        .arg(binary)
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[async_trait]
pub trait WorkerVariant: Send + Sync {
    fn worker_type(&self) -> WorkerType;

    /// Whether this variant's CLI binary is installed and runnable.
    async fn is_available(&self) -> bool;

    /// Spawn the CLI inside a PTY from `pool`, applying the config's
    /// working directory, prompt, and environment.
    async fn start_session(&self, pool: &PtyPool, config: &SessionConfig) -> Result<SessionHandle>;
}

/// A running worker session: wraps a [`PtyHandle`] with the bookkeeping the
/// executor needs to stream lines and classify the terminal result.
pub struct SessionHandle {
    pty: PtyHandle,
    started_at: Instant,
    timeout: Duration,
    completion_signal: String,
    carry: Vec<u8>,
    accumulated: String,
}

impl SessionHandle {
    fn new(pty: PtyHandle, timeout_seconds: u64, completion_signal: impl Into<String>) -> Self {
        Self {
            pty,
            started_at: Instant::now(),
            timeout: Duration::from_secs(timeout_seconds),
            completion_signal: completion_signal.into(),
            carry: Vec::new(),
            accumulated: String::new(),
        }
    }

    pub fn handle_id(&self) -> uuid::Uuid {
        self.pty.id
    }

    fn timed_out(&self) -> bool {
        self.started_at.elapsed() >= self.timeout
    }

    /// Lazily yields the next complete line of merged stdout/stderr, `None`
    /// once the process has exited and no more output is buffered.
    ///
    /// The executor's streaming loop (SPEC_FULL.md §4.8 step 7) calls this
    /// in a `while let Some(line) = ...` loop, feeding each line to the
    /// output buffer, monitor, and event bus before checking for a recovery
    /// action.
    pub async fn stream_output(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.carry.iter().position(|b| *b == b'\n') {
                let line_bytes: Vec<u8> = self.carry.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]).to_string();
                self.accumulated.push_str(&line);
                self.accumulated.push('\n');
                return Some(line);
            }

            if self.timed_out() {
                return None;
            }

            match self.pty.read_timeout(Duration::from_millis(500)).await {
                Some(chunk) => self.carry.extend_from_slice(&chunk),
                None => {
                    if !self.pty.is_alive() {
                        let rest = self.pty.try_read_all();
                        if rest.is_empty() && self.carry.is_empty() {
                            return None;
                        }
                        self.carry.extend_from_slice(&rest);
                        if self.carry.is_empty() {
                            return None;
                        }
                    }
                }
            }
        }
    }

    /// Blocks until the session reaches a terminal state: the process
    /// exits, or the configured timeout elapses.
    pub async fn wait(mut self) -> SessionResult {
        while self.stream_output().await.is_some() {}

        if self.timed_out() && self.pty.is_alive() {
            warn!(handle_id = %self.pty.id, "worker session timed out, killing");
            let _ = self.pty.kill();
            return SessionResult {
                status: SessionStatus::TimedOut,
                exit_code: None,
                output: self.accumulated,
            };
        }

        let remaining = self.pty.try_read_all();
        if !remaining.is_empty() {
            self.accumulated.push_str(&String::from_utf8_lossy(&remaining));
        }

        SessionResult {
            status: SessionStatus::Completed,
            exit_code: self.pty.exit_code(),
            output: self.accumulated,
        }
    }

    /// Interrupts the session early (monitor-triggered recovery action);
    /// the caller supplies the reason for the resulting outcome.
    pub fn interrupt(mut self, reason: impl Into<String>) -> SessionResult {
        let _ = self.pty.kill();
        let remaining = self.pty.try_read_all();
        self.accumulated.push_str(&String::from_utf8_lossy(&remaining));
        self.accumulated.push_str("\n[interrupted: ");
        self.accumulated.push_str(&reason.into());
        self.accumulated.push(']');
        SessionResult {
            status: SessionStatus::Interrupted,
            exit_code: None,
            output: self.accumulated,
        }
    }

    pub fn contains_completion_signal(&self) -> bool {
        self.accumulated.contains(&self.completion_signal)
    }
}

fn env_pairs(config: &SessionConfig) -> Vec<(&str, &str)> {
    let mut env: Vec<(&str, &str)> = vec![("PWD", config.working_dir.as_str())];
    env.extend(config.env_vars.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    env
}

async fn spawn_with(
    pool: &PtyPool,
    config: &SessionConfig,
    binary: &str,
    args: Vec<String>,
) -> Result<SessionHandle> {
    let args_ref: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
    let env = env_pairs(config);
    debug!(binary, ?args_ref, workdir = %config.working_dir, "spawning worker session");
    let pty = pool.spawn(binary, &args_ref, &env)?;
    Ok(SessionHandle::new(pty, config.timeout_seconds, config.completion_signal.clone()))
}

// ---------------------------------------------------------------------------
// claude-code
// ---------------------------------------------------------------------------

/// `claude --dangerously-skip-permissions -p "<prompt>"`.
pub struct ClaudeCodeVariant;

#[async_trait]
impl WorkerVariant for ClaudeCodeVariant {
    fn worker_type(&self) -> WorkerType {
        WorkerType::ClaudeCode
    }

    async fn is_available(&self) -> bool {
        binary_on_path("claude").await
    }

    async fn start_session(&self, pool: &PtyPool, config: &SessionConfig) -> Result<SessionHandle> {
        let args = vec![
            "--dangerously-skip-permissions".to_string(),
            "-p".to_string(),
            config.prompt.clone(),
        ];
        spawn_with(pool, config, "claude", args).await
    }
}

// ---------------------------------------------------------------------------
// aider
// ---------------------------------------------------------------------------

/// `aider --yes --message "<prompt>"`.
pub struct AiderVariant;

#[async_trait]
impl WorkerVariant for AiderVariant {
    fn worker_type(&self) -> WorkerType {
        WorkerType::Aider
    }

    async fn is_available(&self) -> bool {
        binary_on_path("aider").await
    }

    async fn start_session(&self, pool: &PtyPool, config: &SessionConfig) -> Result<SessionHandle> {
        let args = vec![
            "--yes".to_string(),
            "--message".to_string(),
            config.prompt.clone(),
        ];
        spawn_with(pool, config, "aider", args).await
    }
}

// ---------------------------------------------------------------------------
// codex
// ---------------------------------------------------------------------------

/// `codex --approval-mode full-auto -q "<prompt>"`.
pub struct CodexVariant;

#[async_trait]
impl WorkerVariant for CodexVariant {
    fn worker_type(&self) -> WorkerType {
        WorkerType::Codex
    }

    async fn is_available(&self) -> bool {
        binary_on_path("codex").await
    }

    async fn start_session(&self, pool: &PtyPool, config: &SessionConfig) -> Result<SessionHandle> {
        let args = vec![
            "--approval-mode".to_string(),
            "full-auto".to_string(),
            "-q".to_string(),
            config.prompt.clone(),
        ];
        spawn_with(pool, config, "codex", args).await
    }
}

// ---------------------------------------------------------------------------
// goose
// ---------------------------------------------------------------------------

/// `goose run --no-session -t "<prompt>"`.
pub struct GooseVariant;

#[async_trait]
impl WorkerVariant for GooseVariant {
    fn worker_type(&self) -> WorkerType {
        WorkerType::Goose
    }

    async fn is_available(&self) -> bool {
        binary_on_path("goose").await
    }

    async fn start_session(&self, pool: &PtyPool, config: &SessionConfig) -> Result<SessionHandle> {
        let args = vec![
            "run".to_string(),
            "--no-session".to_string(),
            "-t".to_string(),
            config.prompt.clone(),
        ];
        spawn_with(pool, config, "goose", args).await
    }
}

// ---------------------------------------------------------------------------
// generic
// ---------------------------------------------------------------------------

/// Fully driven by the worker's [`LaunchTemplate`]: `command` is the binary,
/// `args` are prepended verbatim, and `prompt_flag` (if set) is passed before
/// the prompt text; otherwise the prompt is appended as the final bare arg.
pub struct GenericVariant {
    pub template: LaunchTemplate,
}

impl GenericVariant {
    pub fn new(template: LaunchTemplate) -> Self {
        Self { template }
    }
}

#[async_trait]
impl WorkerVariant for GenericVariant {
    fn worker_type(&self) -> WorkerType {
        WorkerType::Generic
    }

    async fn is_available(&self) -> bool {
        binary_on_path(&self.template.command).await
    }

    async fn start_session(&self, pool: &PtyPool, config: &SessionConfig) -> Result<SessionHandle> {
        let mut args = self.template.args.clone();
        if let Some(flag) = &self.template.prompt_flag {
            args.push(flag.clone());
        }
        args.push(config.prompt.clone());
        spawn_with(pool, config, &self.template.command, args).await
    }
}

/// Constructs the variant for a worker's configured type. `template` is
/// only consulted for [`WorkerType::Generic`]; the other four variants know
/// their own binary and argument conventions.
pub fn variant_for(worker_type: WorkerType, template: &LaunchTemplate) -> Box<dyn WorkerVariant> {
    match worker_type {
        WorkerType::ClaudeCode => Box::new(ClaudeCodeVariant),
        WorkerType::Aider => Box::new(AiderVariant),
        WorkerType::Codex => Box::new(CodexVariant),
        WorkerType::Goose => Box::new(GooseVariant),
        WorkerType::Generic => Box::new(GenericVariant::new(template.clone())),
    }
}
