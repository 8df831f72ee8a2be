//! The orchestrator: an agent-driven rewrite of the task list, guarded by
//! the engine.
//!
//! Invoked when the system wants the plan changed: a validator failure, a
//! supervisor `orchestrate` decision, or failed tasks at the head of the
//! engine loop. The agent edits tasks.json in place; the engine snapshots
//! the file first, demands completion and review tokens, validates the
//! result mechanically, and commits the file alone.
//!
//! Invariant: on every failure path the on-disk task list is restored to
//! the pre-invocation snapshot, byte for byte.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{AgentRunner, NullSink, RunOptions};
use crate::prompts;
use crate::task::store;
use crate::vcs;
use crate::workspace::TASKS_FILE;

/// Attempt bounds. Policy, not configuration.
const MAX_ORCHESTRATION_ATTEMPTS: u32 = 3;
const MAX_REVIEW_ATTEMPTS: u32 = 3;

/// What an orchestration run concluded.
#[derive(Debug, Clone)]
pub struct OrchestrationReport {
    pub success: bool,
    pub message: String,
    pub cost_usd: f64,
}

pub struct Orchestrator {
    workspace: PathBuf,
    tasks_file: PathBuf,
    runner: AgentRunner,
}

impl Orchestrator {
    pub fn new(
        workspace: impl Into<PathBuf>,
        tasks_file: impl Into<PathBuf>,
        runner: AgentRunner,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            tasks_file: tasks_file.into(),
            runner,
        }
    }

    /// Run the full protocol: snapshot, orchestrate, review, validate,
    /// commit. Never returns `Err`; every failure mode is a report with
    /// the snapshot restored.
    pub async fn run(
        &self,
        trigger: &str,
        context: &str,
        cancel: &CancellationToken,
    ) -> OrchestrationReport {
        info!(trigger, "orchestration starting");
        let mut cost_usd = 0.0;

        // Snapshot once, up front; restores must not see intermediate
        // states from failed attempts.
        let snapshot = std::fs::read(&self.tasks_file).ok();

        // Phase 1: the edit.
        let mut edited = false;
        for attempt in 1..=MAX_ORCHESTRATION_ATTEMPTS {
            let mut prompt = prompts::orchestrator_prompt(trigger, context);
            if attempt > 1 {
                prompt.push_str(&prompts::orchestrator_retry_hint());
            }
            match self.call_agent(&prompt, cancel).await {
                Some((result_text, cost)) => {
                    cost_usd += cost;
                    if result_text.contains(prompts::ORCHESTRATION_DONE) {
                        edited = true;
                        break;
                    }
                    warn!(attempt, "orchestration attempt ended without the done token");
                }
                None => warn!(attempt, "orchestration attempt failed to run"),
            }
        }
        if !edited {
            self.restore(&snapshot);
            return OrchestrationReport {
                success: false,
                message: format!(
                    "orchestration incomplete after {MAX_ORCHESTRATION_ATTEMPTS} attempts"
                ),
                cost_usd,
            };
        }

        // Phase 2: the agent reviews its own edit.
        let mut reviewed = false;
        for attempt in 1..=MAX_REVIEW_ATTEMPTS {
            match self.call_agent(&prompts::orchestrator_review_prompt(), cancel).await {
                Some((result_text, cost)) => {
                    cost_usd += cost;
                    if result_text.contains(prompts::REVIEW_PASSED) {
                        reviewed = true;
                        break;
                    }
                    warn!(attempt, "review attempt did not pass");
                }
                None => warn!(attempt, "review attempt failed to run"),
            }
        }
        if !reviewed {
            self.restore(&snapshot);
            return OrchestrationReport {
                success: false,
                message: format!("review failed after {MAX_REVIEW_ATTEMPTS} attempts"),
                cost_usd,
            };
        }

        // Phase 3: mechanical validation.
        if let Err(err) = store::validate_file(&self.tasks_file) {
            warn!(error = %err, "orchestrated task list failed validation");
            self.restore(&snapshot);
            return OrchestrationReport {
                success: false,
                message: format!("task list invalid after edit: {err}"),
                cost_usd,
            };
        }

        // Phase 4: commit the task list alone, if it changed.
        match vcs::commit_paths(
            &self.workspace,
            &[TASKS_FILE],
            &format!("chore(orchestrator): {trigger}"),
        ) {
            Ok(true) => info!("task list changes committed"),
            Ok(false) => info!("task list unchanged, nothing to commit"),
            Err(err) => {
                // The edit itself is good; a commit failure is recorded but
                // does not discard it.
                warn!(error = %err, "failed to commit task list");
            }
        }

        OrchestrationReport {
            success: true,
            message: "task list reworked".to_string(),
            cost_usd,
        }
    }

    async fn call_agent(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Option<(String, f64)> {
        match self
            .runner
            .run_foreground(prompt, &self.workspace, &RunOptions::default(), &mut NullSink, cancel)
            .await
        {
            Ok(outcome) if !outcome.is_error => Some((outcome.result_text, outcome.cost_usd)),
            Ok(outcome) => {
                warn!(result = %outcome.result_text, "orchestration agent call errored");
                // An errored call may still have cost money.
                Some((String::new(), outcome.cost_usd))
            }
            Err(err) => {
                warn!(error = %err, "orchestration agent call failed to spawn");
                None
            }
        }
    }

    /// Put the pre-invocation bytes back. A snapshot of `None` means the
    /// file did not exist; restore removes any file the agent created.
    fn restore(&self, snapshot: &Option<Vec<u8>>) {
        let result = match snapshot {
            Some(bytes) => std::fs::write(&self.tasks_file, bytes),
            None => match std::fs::remove_file(&self.tasks_file) {
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        if let Err(err) = result {
            warn!(error = %err, "failed to restore task list snapshot");
        }
    }
}
