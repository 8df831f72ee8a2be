//! Spawning the agent CLI.
//!
//! Three entry points, one command shape: streaming JSON output, no
//! interactive permission prompts.
//!
//! - [`AgentRunner::run_foreground`] blocks the caller, streams events
//!   through an [`EventSink`], and honors cooperative cancellation between
//!   JSONL lines.
//! - [`AgentRunner::start_background`] launches a detached child with
//!   merged stdout+stderr redirected to a log file and returns at once.
//! - [`AgentRunner::resume_background`] does the same against an existing
//!   session id.
//!
//! Background children run in their own process group so that the whole
//! subtree (the agent spawns test runners, language servers, whatever)
//! can be signaled at once.

use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures::{Stream, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::events::{AgentEvent, decode_line};

/// Default agent CLI binary, found via `$PATH`.
pub const DEFAULT_AGENT_CMD: &str = "claude";

/// Options recognized by all entry points.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Resume an existing agent session instead of starting fresh.
    pub resume_session_id: Option<String>,
    /// Text appended to the agent's system prompt.
    pub append_system_prompt: Option<String>,
    /// Pass `--verbose` so the stream includes intermediate events.
    pub verbose: bool,
}

/// Aggregated result of a foreground invocation.
#[derive(Debug, Clone, Default)]
pub struct AgentOutcome {
    pub session_id: Option<String>,
    pub result_text: String,
    pub cost_usd: f64,
    pub is_error: bool,
    pub duration_ms: u64,
}

/// Receives events as they arrive during a foreground invocation.
pub trait EventSink: Send {
    fn on_event(&mut self, _event: &AgentEvent) {}
}

/// Sink that discards everything.
pub struct NullSink;

impl EventSink for NullSink {}

/// Handle to a background agent process.
///
/// The child runs in its own process group; [`AgentChild::signal_group`]
/// targets the whole subtree.
#[derive(Debug)]
pub struct AgentChild {
    pid: u32,
    child: tokio::process::Child,
}

impl AgentChild {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// `Ok(Some(_))` once the process has exited, `Ok(None)` while it runs.
    pub fn try_wait(&mut self) -> std::io::Result<Option<std::process::ExitStatus>> {
        self.child.try_wait()
    }

    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }

    /// Send `signal` to the child's whole process group.
    #[cfg(unix)]
    pub fn signal_group(&self, signal: i32) {
        signal_group(self.pid, signal);
    }
}

/// Send `signal` to the process group led by `pid`.
///
/// Best-effort: a vanished group is not an error.
#[cfg(unix)]
pub fn signal_group(pid: u32, signal: i32) {
    let ret = unsafe { libc::killpg(pid as i32, signal) };
    if ret != 0 {
        debug!(pid, signal, "killpg failed (group already gone?)");
    }
}

/// Send `signal` to a single process.
#[cfg(unix)]
pub fn signal_pid(pid: u32, signal: i32) {
    let ret = unsafe { libc::kill(pid as i32, signal) };
    if ret != 0 {
        debug!(pid, signal, "kill failed (process already gone?)");
    }
}

/// The facade over the agent CLI.
#[derive(Debug, Clone)]
pub struct AgentRunner {
    agent_cmd: String,
}

impl AgentRunner {
    pub fn new() -> Self {
        Self::with_command(DEFAULT_AGENT_CMD)
    }

    /// Use a specific binary name or path. Tests point this at fake
    /// shell scripts that emit canned JSONL.
    pub fn with_command(cmd: impl Into<String>) -> Self {
        Self {
            agent_cmd: cmd.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.agent_cmd
    }

    /// Build the CLI argument vector for a prompt + options.
    fn build_args(prompt: &str, options: &RunOptions) -> Vec<String> {
        let mut args = vec!["-p".to_string()];
        if options.verbose {
            args.push("--verbose".to_string());
        }
        args.push("--output-format".to_string());
        args.push("stream-json".to_string());
        args.push("--dangerously-skip-permissions".to_string());
        if let Some(session_id) = &options.resume_session_id {
            args.push("--resume".to_string());
            args.push(session_id.clone());
        }
        if let Some(system_prompt) = &options.append_system_prompt {
            args.push("--append-system-prompt".to_string());
            args.push(system_prompt.clone());
        }
        args.push(prompt.to_string());
        args
    }

    /// Run the agent and stream its events until it exits.
    ///
    /// Cancellation is cooperative: the token is checked between events;
    /// on observation the child gets SIGINT, then SIGKILL if it lingers,
    /// and the outcome comes back `is_error` with a cancellation message.
    ///
    /// A successful `result` event is authoritative for cost even if the
    /// process then dies; a non-zero exit with no `result` event marks the
    /// outcome as an error.
    pub async fn run_foreground(
        &self,
        prompt: &str,
        workspace: &Path,
        options: &RunOptions,
        sink: &mut dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<AgentOutcome> {
        let started = Instant::now();

        let mut cmd = Command::new(&self.agent_cmd);
        cmd.args(Self::build_args(prompt, options))
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn agent binary '{}' -- is it installed and on PATH?",
                self.agent_cmd
            )
        })?;
        let pid = child.id().context("spawned agent has no pid")?;
        let stdout = child.stdout.take().context("agent stdout not piped")?;

        let mut events = event_stream(stdout);
        let mut outcome = AgentOutcome::default();
        let mut saw_result = false;

        loop {
            tokio::select! {
                maybe_event = events.next() => {
                    let Some(event) = maybe_event else { break };
                    match &event {
                        AgentEvent::Init { session_id, .. } => {
                            outcome.session_id = Some(session_id.clone());
                        }
                        AgentEvent::Result { text, cost_usd, is_error, duration_ms, session_id } => {
                            saw_result = true;
                            outcome.result_text = text.clone();
                            outcome.cost_usd = *cost_usd;
                            outcome.is_error = *is_error;
                            outcome.duration_ms = *duration_ms;
                            if session_id.is_some() {
                                outcome.session_id = session_id.clone();
                            }
                        }
                        _ => {}
                    }
                    sink.on_event(&event);
                }
                _ = cancel.cancelled() => {
                    debug!(pid, "foreground agent invocation cancelled");
                    #[cfg(unix)]
                    signal_pid(pid, libc::SIGINT);
                    if tokio::time::timeout(Duration::from_secs(5), child.wait())
                        .await
                        .is_err()
                    {
                        let _ = child.kill().await;
                    }
                    outcome.is_error = true;
                    outcome.result_text = "cancelled".to_string();
                    outcome.duration_ms = started.elapsed().as_millis() as u64;
                    return Ok(outcome);
                }
            }
        }

        let status = child.wait().await.context("failed waiting for agent exit")?;
        if !saw_result {
            outcome.duration_ms = started.elapsed().as_millis() as u64;
            if !status.success() {
                outcome.is_error = true;
                if outcome.result_text.is_empty() {
                    outcome.result_text = format!("agent exited with {status}");
                }
            }
        }
        Ok(outcome)
    }

    /// Launch a detached agent invocation with merged stdout+stderr
    /// appended to `log_path`, in a fresh process group. Returns as soon
    /// as the child is spawned.
    pub async fn start_background(
        &self,
        prompt: &str,
        workspace: &Path,
        log_path: &Path,
        options: &RunOptions,
    ) -> Result<AgentChild> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory {}", parent.display()))?;
        }
        let log_file = std::fs::File::create(log_path)
            .with_context(|| format!("failed to create log file {}", log_path.display()))?;
        let err_file = log_file
            .try_clone()
            .context("failed to clone log file handle for stderr")?;

        let mut cmd = Command::new(&self.agent_cmd);
        cmd.args(Self::build_args(prompt, options))
            .current_dir(workspace)
            // Keep the log plain JSONL.
            .env("NO_COLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(err_file));
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn agent binary '{}' -- is it installed and on PATH?",
                self.agent_cmd
            )
        })?;
        let pid = child.id().context("spawned agent has no pid")?;
        debug!(pid, log = %log_path.display(), "background agent started");

        Ok(AgentChild { pid, child })
    }

    /// Like [`Self::start_background`], but resumes an existing session.
    pub async fn resume_background(
        &self,
        prompt: &str,
        workspace: &Path,
        log_path: &Path,
        session_id: &str,
    ) -> Result<AgentChild> {
        let options = RunOptions {
            resume_session_id: Some(session_id.to_string()),
            append_system_prompt: None,
            verbose: false,
        };
        self.start_background(prompt, workspace, log_path, &options).await
    }
}

impl Default for AgentRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn the child's stdout into a stream of decoded events.
///
/// Malformed lines are dropped with a warning; the stream ends at EOF.
fn event_stream(stdout: ChildStdout) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>> {
    Box::pin(async_stream::stream! {
        let reader = BufReader::new(stdout);
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match decode_line(trimmed) {
                        Ok(events) => {
                            for event in events {
                                yield event;
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "skipping malformed stream line");
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "error reading agent stdout");
                    break;
                }
            }
        }
    })
}
