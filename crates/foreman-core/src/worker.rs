//! The worker: one background agent process executing one task.
//!
//! The engine never shares memory with a worker; the only channel is the
//! append-only log file the agent's merged output is redirected to. The
//! worker owns the process handle, the incremental log cursor, and the
//! two-phase graceful shutdown that turns an interrupted session into a
//! handover summary for the next attempt.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{
    AgentChild, AgentEvent, AgentRunner, LogCursor, ParsedLog, RunOptions, parse_log_file,
};
use crate::config::TERMINATE_GRACE;
use crate::prompts;
use crate::task::Task;
use crate::workspace::WorkspacePaths;

/// Outcome of a graceful shutdown.
///
/// `success` means the cleanup invocation ran to the `HANDOVER_END` marker;
/// partial work is then worth keeping. `handover_summary` is the fenced
/// block the agent emitted for the next worker, when there was one.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub success: bool,
    pub handover_summary: Option<String>,
    pub cost_usd: f64,
}

/// A task's background agent process.
pub struct Worker {
    task: Task,
    workspace: PathBuf,
    log_path: PathBuf,
    cleanup_log_path: PathBuf,
    runner: AgentRunner,
    child: Option<AgentChild>,
    started_at: Option<Instant>,
    cursor: LogCursor,
    cleanup_report: Option<CleanupReport>,
}

impl Worker {
    pub fn new(task: Task, paths: &WorkspacePaths, runner: AgentRunner) -> Self {
        let log_path = paths.worker_log(&task.id);
        let cleanup_log_path = paths.worker_cleanup_log(&task.id);
        Self {
            task,
            workspace: paths.root().to_path_buf(),
            cursor: LogCursor::new(&log_path),
            log_path,
            cleanup_log_path,
            runner,
            child: None,
            started_at: None,
            cleanup_report: None,
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(AgentChild::pid)
    }

    /// Launch the background agent for this task. Returns the child pid.
    pub async fn start(&mut self) -> Result<u32> {
        let options = RunOptions {
            resume_session_id: None,
            append_system_prompt: Some(prompts::WORKER_SYSTEM_PROMPT.to_string()),
            verbose: true,
        };
        let prompt = prompts::worker_task_prompt(&self.task);
        let child = self
            .runner
            .start_background(&prompt, &self.workspace, &self.log_path, &options)
            .await
            .with_context(|| format!("failed to start worker for task {}", self.task.id))?;
        let pid = child.pid();
        self.child = Some(child);
        self.started_at = Some(Instant::now());
        info!(task_id = %self.task.id, pid, log = %self.log_path.display(), "worker started");
        Ok(pid)
    }

    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Events appended to the log since the last call. Safe to call
    /// repeatedly; with no intervening writes the second call is empty.
    pub fn read_new_events(&mut self) -> Vec<AgentEvent> {
        self.cursor.read_new_events()
    }

    /// Parse the whole log from the beginning. Tolerates a live-growing
    /// file and a truncated tail.
    pub fn read_log(&self) -> ParsedLog {
        parse_log_file(&self.log_path)
    }

    /// Terminate the worker's whole process group.
    ///
    /// `graceful` sends SIGINT and allows [`TERMINATE_GRACE`] for the
    /// subtree to wind down before escalating to SIGKILL. Group signaling
    /// matters: the agent spawns its own children.
    pub async fn terminate(&mut self, graceful: bool) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        if !matches!(child.try_wait(), Ok(None)) {
            return;
        }

        if graceful {
            child.signal_group(libc::SIGINT);
            let deadline = Instant::now() + TERMINATE_GRACE;
            while Instant::now() < deadline {
                if !matches!(child.try_wait(), Ok(None)) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            debug!(task_id = %self.task.id, "worker ignored SIGINT, escalating");
        }

        child.signal_group(libc::SIGKILL);
        let _ = child.wait().await;
    }

    /// Two-phase graceful shutdown.
    ///
    /// 1. Interrupt the running process (group SIGINT, short grace, then
    ///    SIGKILL).
    /// 2. Resume the agent's own session in a fresh background invocation
    ///    with a cleanup prompt: kill side processes, remove temp files,
    ///    emit a fenced handover summary.
    ///
    /// Resuming the same session lets the agent reason about what it just
    /// did. Without a session id in the log there is nothing to resume and
    /// the shutdown reports failure.
    ///
    /// Idempotent: the report from the first call is cached and returned
    /// on every later call. `force` escalates a cancellation (second
    /// Ctrl-C) straight to SIGKILL of the cleanup child.
    pub async fn graceful_shutdown(
        &mut self,
        reason: &str,
        force: &CancellationToken,
    ) -> CleanupReport {
        if let Some(report) = &self.cleanup_report {
            return report.clone();
        }

        // Session id must come from the log before the process dies... but
        // the log survives the process, so read it whenever.
        let session_id = self.read_log().session_id;

        if self.is_alive() {
            self.interrupt_for_shutdown().await;
        }

        let report = match session_id {
            None => {
                warn!(task_id = %self.task.id, "no session id in worker log, skipping cleanup");
                CleanupReport::default()
            }
            Some(session_id) => self.run_cleanup(&session_id, reason, force).await,
        };

        self.cleanup_report = Some(report.clone());
        report
    }

    /// SIGINT the group and give it a short window before SIGKILL. The
    /// window is shorter than [`terminate`]'s: shutdown already implies
    /// the work is being abandoned.
    async fn interrupt_for_shutdown(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        child.signal_group(libc::SIGINT);
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if !matches!(child.try_wait(), Ok(None)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.terminate(false).await;
    }

    async fn run_cleanup(
        &mut self,
        session_id: &str,
        reason: &str,
        force: &CancellationToken,
    ) -> CleanupReport {
        info!(task_id = %self.task.id, session_id, "running cleanup on resumed session");
        let prompt = prompts::cleanup_prompt(reason);

        let mut cleanup_child = match self
            .runner
            .resume_background(&prompt, &self.workspace, &self.cleanup_log_path, session_id)
            .await
        {
            Ok(child) => child,
            Err(err) => {
                warn!(task_id = %self.task.id, error = %err, "failed to spawn cleanup invocation");
                return CleanupReport::default();
            }
        };

        tokio::select! {
            status = cleanup_child.wait() => {
                if let Err(err) = status {
                    warn!(task_id = %self.task.id, error = %err, "failed waiting for cleanup child");
                }
            }
            _ = force.cancelled() => {
                warn!(task_id = %self.task.id, "shutdown escalated, killing cleanup child");
                cleanup_child.signal_group(libc::SIGKILL);
                let _ = cleanup_child.wait().await;
            }
        }

        parse_cleanup_log(&self.cleanup_log_path)
    }
}

/// Extract the cleanup outcome from a cleanup invocation's log.
///
/// The `HANDOVER_END` marker anywhere in the raw log counts as successful
/// cleanup even when the fenced block cannot be recovered; the final cost
/// comes from the result event.
pub fn parse_cleanup_log(path: &Path) -> CleanupReport {
    let Ok(content) = std::fs::read_to_string(path) else {
        return CleanupReport::default();
    };

    let mut report = CleanupReport {
        success: content.contains(prompts::HANDOVER_END),
        ..CleanupReport::default()
    };

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if event.get("type").and_then(Value::as_str) == Some("result") {
            report.cost_usd = event
                .get("total_cost_usd")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            break;
        }
    }

    let text = assistant_text(&content);
    report.handover_summary = extract_handover(&text);
    report
}

/// Concatenate all assistant text blocks in a stream-json log.
fn assistant_text(content: &str) -> String {
    let mut texts = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if event.get("type").and_then(Value::as_str) != Some("assistant") {
            continue;
        }
        let Some(blocks) = event.pointer("/message/content").and_then(Value::as_array) else {
            continue;
        };
        for block in blocks {
            if block.get("type").and_then(Value::as_str) == Some("text") {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    texts.push(text.to_string());
                }
            }
        }
    }
    texts.join("\n")
}

/// Pull the fenced summary out of `HANDOVER_START` ... `HANDOVER_END`,
/// stripping any code-fence backticks the agent wrapped around the
/// markers.
pub fn extract_handover(text: &str) -> Option<String> {
    let start = text.find(prompts::HANDOVER_START)? + prompts::HANDOVER_START.len();
    let end = text.find(prompts::HANDOVER_END)?;
    if start > end {
        return None;
    }
    let summary = text[start..end].trim().trim_matches('`').trim();
    if summary.is_empty() {
        None
    } else {
        Some(summary.to_string())
    }
}
