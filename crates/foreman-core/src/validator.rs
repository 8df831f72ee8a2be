//! Post-work validation: after a worker exits cleanly, a second agent
//! invocation verifies the change set and commits it.
//!
//! The agent does the judgment calls (review, fix, commit message in the
//! project's style, .gitignore for non-committables); the validator only
//! checks the observable outcome: is the working tree clean afterwards?

use std::path::PathBuf;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::agent::{AgentRunner, NullSink, RunOptions};
use crate::prompts;
use crate::task::Task;
use crate::vcs;
use crate::workspace::TASKS_FILE;

/// What validation concluded.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub success: bool,
    pub message: String,
    /// Paths still dirty after the final attempt.
    pub remaining: Vec<String>,
    pub cost_usd: f64,
}

pub struct Validator {
    workspace: PathBuf,
    runner: AgentRunner,
}

impl Validator {
    pub fn new(workspace: impl Into<PathBuf>, runner: AgentRunner) -> Self {
        Self {
            workspace: workspace.into(),
            runner,
        }
    }

    /// Verify and commit one task's change set.
    ///
    /// 1. No uncommitted changes: trivially valid, skip the agent.
    /// 2. Run the post-work agent pass.
    /// 3. Still dirty afterwards: one more pass with the remaining paths
    ///    named. Dirty after that is a failure carrying the path list.
    ///
    /// The task-list file is excluded from the dirty check: its status
    /// bookkeeping belongs to the engine and the orchestrator, not to the
    /// worker's change set.
    ///
    /// VCS errors bubble up; a validation that cannot observe the tree
    /// must not guess.
    pub async fn validate_and_commit(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<ValidationReport> {
        let changed = self.worker_changes()?;
        if changed.is_empty() {
            debug!(task_id = %task.id, "no changes to validate");
            return Ok(ValidationReport {
                success: true,
                message: "working tree already clean".to_string(),
                remaining: Vec::new(),
                cost_usd: 0.0,
            });
        }

        info!(task_id = %task.id, files = changed.len(), "validating change set");
        let mut cost_usd = 0.0;

        let prompt = prompts::post_work_prompt(task);
        let outcome = self
            .runner
            .run_foreground(&prompt, &self.workspace, &RunOptions::default(), &mut NullSink, cancel)
            .await?;
        cost_usd += outcome.cost_usd;

        let remaining = self.worker_changes()?;
        if remaining.is_empty() {
            return Ok(ValidationReport {
                success: true,
                message: "change set verified and committed".to_string(),
                remaining: Vec::new(),
                cost_usd,
            });
        }

        // One retry, with the leftover paths spelled out.
        info!(task_id = %task.id, files = remaining.len(), "tree still dirty, retrying validation");
        let prompt = format!(
            "{}{}",
            prompts::post_work_prompt(task),
            prompts::post_work_retry_hint(&remaining),
        );
        let outcome = self
            .runner
            .run_foreground(&prompt, &self.workspace, &RunOptions::default(), &mut NullSink, cancel)
            .await?;
        cost_usd += outcome.cost_usd;

        let remaining = self.worker_changes()?;
        if remaining.is_empty() {
            Ok(ValidationReport {
                success: true,
                message: "change set verified and committed on retry".to_string(),
                remaining: Vec::new(),
                cost_usd,
            })
        } else {
            Ok(ValidationReport {
                success: false,
                message: format!("{} path(s) left uncommitted", remaining.len()),
                remaining,
                cost_usd,
            })
        }
    }

    /// Uncommitted paths attributable to the worker.
    fn worker_changes(&self) -> Result<Vec<String>> {
        let changed = vcs::changed_files(&self.workspace)?;
        Ok(changed.into_iter().filter(|path| path != TASKS_FILE).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_test_utils::{fake_agent_script, git_commit_all, init_git_repo};
    use tempfile::TempDir;

    #[tokio::test]
    async fn clean_tree_short_circuits_without_calling_the_agent() {
        let dir = TempDir::new().unwrap();
        init_git_repo(dir.path());
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        git_commit_all(dir.path(), "base");

        // A runner pointing at a missing binary proves the agent is never
        // invoked on a clean tree.
        let validator = Validator::new(dir.path(), AgentRunner::with_command("/nonexistent/agent"));
        let task = Task::new("1", "d");
        let report = validator
            .validate_and_commit(&task, &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.cost_usd, 0.0);
        assert!(report.remaining.is_empty());
    }

    #[tokio::test]
    async fn agent_that_commits_everything_passes_first_try() {
        let dir = TempDir::new().unwrap();
        init_git_repo(dir.path());
        // Ignore the fake agent script up front so only real work dirties
        // the tree.
        std::fs::write(dir.path().join(".gitignore"), "agent.sh\n").unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        git_commit_all(dir.path(), "base");

        // Fake agent: commits the tree, reports a cost.
        let agent = fake_agent_script(
            dir.path(),
            "agent.sh",
            "#!/bin/sh\n\
             git add -A >/dev/null 2>&1\n\
             git commit -q -m 'task work' >/dev/null 2>&1\n\
             cat <<'FOREMAN_EOF'\n\
             {\"type\":\"result\",\"result\":\"committed\",\"total_cost_usd\":0.02}\n\
             FOREMAN_EOF\n",
        );
        std::fs::write(dir.path().join("new.rs"), "fn f() {}").unwrap();

        let validator = Validator::new(dir.path(), AgentRunner::with_command(agent.to_str().unwrap()));
        let task = Task::new("1", "d");
        let report = validator
            .validate_and_commit(&task, &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.success, "report: {report:?}");
        assert!((report.cost_usd - 0.02).abs() < 1e-9);
    }

    #[tokio::test]
    async fn task_list_bookkeeping_does_not_count_as_worker_changes() {
        let dir = TempDir::new().unwrap();
        init_git_repo(dir.path());
        std::fs::write(dir.path().join("tasks.json"), "[]").unwrap();
        git_commit_all(dir.path(), "base");
        // Only the engine's own status write is dirty.
        std::fs::write(dir.path().join("tasks.json"), "[ ]").unwrap();

        let validator = Validator::new(dir.path(), AgentRunner::with_command("/nonexistent/agent"));
        let task = Task::new("1", "d");
        let report = validator
            .validate_and_commit(&task, &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.cost_usd, 0.0);
    }

    #[tokio::test]
    async fn dirty_tree_after_retry_fails_with_the_file_list() {
        let dir = TempDir::new().unwrap();
        init_git_repo(dir.path());
        std::fs::write(dir.path().join(".gitignore"), "agent.sh\n").unwrap();
        git_commit_all(dir.path(), "base");
        std::fs::write(dir.path().join("stray.log"), "leftover").unwrap();

        // Fake agent that does nothing about the dirt.
        let agent = fake_agent_script(
            dir.path(),
            "agent.sh",
            "#!/bin/sh\n\
             cat <<'FOREMAN_EOF'\n\
             {\"type\":\"result\",\"result\":\"looked at it\",\"total_cost_usd\":0.01}\n\
             FOREMAN_EOF\n",
        );

        let validator = Validator::new(dir.path(), AgentRunner::with_command(agent.to_str().unwrap()));
        let task = Task::new("1", "d");
        let report = validator
            .validate_and_commit(&task, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!report.success);
        assert_eq!(report.remaining, ["stray.log"]);
        // Both attempts' costs accumulate.
        assert!((report.cost_usd - 0.02).abs() < 1e-9);
    }
}
