//! The supervisor: periodic read-only oversight of a running worker.
//!
//! A check hands the agent the task description, the elapsed time, and the
//! worker log path; the agent reads the log itself and answers with one
//! JSON decision. Parse trouble always degrades to `continue` -- oversight
//! must never escalate because of its own failure.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::{AgentRunner, NullSink, ParsedLog, RunOptions};
use crate::prompts;
use crate::task::Task;

/// What the supervisor wants the engine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The worker is fine; keep waiting.
    Continue,
    /// Stop the worker and rework the task list.
    Orchestrate,
}

/// One completed check: the decision, why, and what it cost.
#[derive(Debug, Clone)]
pub struct SupervisorVerdict {
    pub decision: Decision,
    pub reason: String,
    pub cost_usd: f64,
}

impl SupervisorVerdict {
    fn keep_waiting(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Continue,
            reason: reason.into(),
            cost_usd: 0.0,
        }
    }
}

/// Oversight of one running worker.
///
/// At most one check runs at a time (the engine gates scheduling on that),
/// and a check in flight can be cancelled when the worker exits first.
pub struct Supervisor {
    workspace: PathBuf,
    runner: AgentRunner,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(workspace: impl Into<PathBuf>, runner: AgentRunner) -> Self {
        Self {
            workspace: workspace.into(),
            runner,
            cancel: CancellationToken::new(),
        }
    }

    /// Token the engine holds to cancel an in-flight analysis.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run one analysis. Blocks (asynchronously) until the agent answers
    /// or the check is cancelled; infallible by design.
    pub async fn analyze(
        &self,
        task: &Task,
        log_path: &Path,
        check_ordinal: u32,
        elapsed: Duration,
    ) -> SupervisorVerdict {
        debug!(task_id = %task.id, check_ordinal, "supervisor analysis starting");

        let prompt = prompts::supervisor_prompt(
            &task.description,
            elapsed,
            &log_path.display().to_string(),
        );

        let outcome = self
            .runner
            .run_foreground(
                &prompt,
                &self.workspace,
                &RunOptions::default(),
                &mut NullSink,
                &self.cancel,
            )
            .await;

        if self.cancel.is_cancelled() {
            return SupervisorVerdict::keep_waiting("analysis cancelled");
        }

        match outcome {
            Ok(outcome) => {
                let mut verdict = parse_verdict(&outcome.result_text);
                verdict.cost_usd = outcome.cost_usd;
                verdict
            }
            Err(err) => {
                warn!(task_id = %task.id, error = %err, "supervisor analysis failed");
                SupervisorVerdict::keep_waiting(format!("analysis failed: {err}"))
            }
        }
    }

    /// Cheap loop heuristic, no agent call: with ten or more tool calls in
    /// the log, three or fewer distinct `(name, input)` pairs among the
    /// last ten smells like a loop.
    ///
    /// Only a hint -- the engine logs it; the full analysis stays the
    /// authoritative escalation signal.
    pub fn looks_stuck(log: &ParsedLog) -> bool {
        if log.is_complete {
            return false;
        }
        let tool_calls: Vec<String> = log
            .events
            .iter()
            .filter_map(|event| match event {
                crate::agent::AgentEvent::ToolUse { name, input_summary } => {
                    Some(format!("{name}:{input_summary}"))
                }
                _ => None,
            })
            .collect();
        if tool_calls.len() < 10 {
            return false;
        }
        let recent = &tool_calls[tool_calls.len() - 10..];
        let distinct: std::collections::HashSet<&String> = recent.iter().collect();
        distinct.len() <= 3
    }
}

/// Parse the agent's answer: the first well-formed JSON object wins;
/// anything else means `continue`.
fn parse_verdict(text: &str) -> SupervisorVerdict {
    let Some(json) = first_json_object(text) else {
        return SupervisorVerdict::keep_waiting("unparseable analysis, keep waiting");
    };
    let Ok(value) = serde_json::from_str::<Value>(json) else {
        return SupervisorVerdict::keep_waiting("unparseable analysis, keep waiting");
    };

    let decision = match value.get("decision").and_then(Value::as_str) {
        Some("orchestrate") => Decision::Orchestrate,
        _ => Decision::Continue,
    };
    let reason = value
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    SupervisorVerdict {
        decision,
        reason,
        cost_usd: 0.0,
    }
}

/// Find the first balanced `{...}` region in `text`, respecting string
/// literals and escapes.
fn first_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
