//! The engine loop: the top-level state machine.
//!
//! Per task: reserve it, record a version-control snapshot, start a
//! worker, then concurrently tail its log for the user and schedule
//! asynchronous supervisor checks until the worker exits or a decision
//! fires. A clean exit goes through the validator; everything abnormal
//! goes through the orchestrator.
//!
//! Concurrency is deliberately narrow: the loop task and at most one
//! supervisor check share only a bounded result channel (capacity one,
//! drained greedily) and cancellation tokens. Workers are separate OS
//! processes; the only channel to them is the append-only log file.

pub mod shutdown;

use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use shutdown::ShutdownSignal;

use crate::agent::{AgentEvent, AgentRunner, ParsedLog, truncate_for_display};
use crate::config::EngineConfig;
use crate::cost::{CostLedger, CostSource, estimate_cost_from_log};
use crate::orchestrator::Orchestrator;
use crate::prompts;
use crate::supervisor::{Decision, Supervisor, SupervisorVerdict};
use crate::task::{Task, TaskStore};
use crate::validator::Validator;
use crate::vcs;
use crate::worker::Worker;
use crate::workspace::WorkspacePaths;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    /// No pending or in-progress tasks remain.
    Completed,
    /// The `--max-tasks` bound was reached.
    MaxTasksReached,
    /// Failed tasks survived every orchestration round; operator needed.
    FailedTasksUnresolved,
    /// Stopped on request; state is persisted for the next run.
    Interrupted,
}

/// Why the supervision loop ended.
enum SuperviseEnd {
    WorkerExited,
    Decision(SupervisorVerdict),
    Interrupted,
}

pub struct Engine {
    paths: WorkspacePaths,
    store: TaskStore,
    runner: AgentRunner,
    ledger: CostLedger,
    config: EngineConfig,
    shutdown: ShutdownSignal,
}

impl Engine {
    pub fn new(
        workspace: &std::path::Path,
        config: EngineConfig,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        // Absolute paths: the supervisor prompt names the log file for an
        // agent whose own working directory may differ.
        let root = std::fs::canonicalize(workspace)
            .with_context(|| format!("workspace not accessible: {}", workspace.display()))?;
        let paths = WorkspacePaths::new(root);
        paths.ensure_layout()?;
        // The state directory must never show up as dirt in validation.
        crate::workspace::ensure_gitignore_entry(paths.root(), ".state/")?;
        let store = TaskStore::load(paths.tasks_file())?;
        let ledger = CostLedger::new(paths.cost_file());
        let runner = AgentRunner::with_command(&config.agent_cmd);
        Ok(Self {
            paths,
            store,
            runner,
            ledger,
            config,
            shutdown,
        })
    }

    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Drive the task list until it is done, stopped, or stuck.
    pub async fn run(&mut self) -> Result<EngineOutcome> {
        let mut tasks_processed: u32 = 0;
        let mut failed_retries: u32 = 0;

        let outcome = loop {
            if self.shutdown.stop_requested() {
                break EngineOutcome::Interrupted;
            }
            if let Some(max) = self.config.max_tasks {
                if tasks_processed >= max {
                    info!(max, "reached the task limit for this run");
                    break EngineOutcome::MaxTasksReached;
                }
            }

            // Failed tasks outrank new work: the orchestrator must clear
            // them (or the operator must) before the loop advances.
            if self.store.failed_count() > 0 {
                if failed_retries >= self.config.max_failed_retries {
                    self.print_failed_tasks();
                    break EngineOutcome::FailedTasksUnresolved;
                }
                failed_retries += 1;
                info!(
                    round = failed_retries,
                    "failed tasks detected, asking the orchestrator to resolve them"
                );
                let report = self
                    .orchestrator()
                    .run(
                        "failed tasks need resolution",
                        &self.store.failed_summary(),
                        self.shutdown.stop_token(),
                    )
                    .await;
                self.ledger.add(
                    CostSource::Orchestrator,
                    report.cost_usd,
                    None,
                    "resolve failed tasks",
                    false,
                );
                if !report.success {
                    warn!(message = %report.message, "orchestration round failed");
                }
                self.store.reload()?;
                continue;
            }
            failed_retries = 0;

            let Some(task) = self.store.next() else {
                break EngineOutcome::Completed;
            };

            let snapshot = vcs::head_hash(self.paths.root())?;
            self.store.mark_in_progress(&task.id, None)?;

            let mut worker = Worker::new(task.clone(), &self.paths, self.runner.clone());
            let pid = worker.start().await?;
            if !self.config.quiet {
                println!("\n[{}] {}", task.id, task.description);
                println!("  worker pid {pid}, log {}", worker.log_path().display());
            }

            match self.supervise(&task, &mut worker).await {
                SuperviseEnd::WorkerExited => {
                    self.finalize_worker(&task, &mut worker).await?;
                }
                SuperviseEnd::Decision(verdict) => {
                    self.handle_orchestrate_decision(&task, &mut worker, &verdict)
                        .await?;
                }
                SuperviseEnd::Interrupted => {
                    self.handle_interruption(&task, &mut worker, snapshot.as_deref())
                        .await?;
                    break EngineOutcome::Interrupted;
                }
            }

            tasks_processed += 1;
        };

        self.ledger.print_summary();
        Ok(outcome)
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.paths.root(), self.paths.tasks_file(), self.runner.clone())
    }

    /// Tail the worker in realtime and run supervisor checks until the
    /// worker exits, a decision fires, or a stop is requested.
    ///
    /// At most one supervisor check is in flight; results come back over
    /// a capacity-one channel drained greedily, so checks for one task
    /// are strictly serialized.
    async fn supervise(&mut self, task: &Task, worker: &mut Worker) -> SuperviseEnd {
        let (tx, mut rx) = mpsc::channel::<SupervisorVerdict>(1);
        let mut in_flight: Option<(CancellationToken, JoinHandle<()>)> = None;
        let mut check_ordinal: u32 = 0;
        let mut last_check = Instant::now();
        let mut stuck_hinted = false;

        loop {
            if self.shutdown.stop_requested() {
                if let Some((cancel, _)) = &in_flight {
                    cancel.cancel();
                }
                return SuperviseEnd::Interrupted;
            }

            if !worker.is_alive() {
                // The worker finished on its own; an analysis of a finished
                // log would be wasted, so cancel anything in flight.
                if let Some((cancel, _)) = &in_flight {
                    cancel.cancel();
                }
                self.print_new_events(worker);
                return SuperviseEnd::WorkerExited;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.realtime_interval) => {}
                _ = self.shutdown.stop_token().cancelled() => continue,
            }

            self.print_new_events(worker);

            // Drain completed checks.
            while let Ok(verdict) = rx.try_recv() {
                in_flight = None;
                self.ledger.add(
                    CostSource::Supervisor,
                    verdict.cost_usd,
                    Some(&task.id),
                    &format!("check #{check_ordinal}"),
                    false,
                );
                if !self.config.quiet {
                    println!(
                        "  supervisor check #{check_ordinal}: {} ({})",
                        match verdict.decision {
                            Decision::Continue => "continue",
                            Decision::Orchestrate => "orchestrate",
                        },
                        verdict.reason,
                    );
                }
                if verdict.decision == Decision::Orchestrate {
                    return SuperviseEnd::Decision(verdict);
                }
            }

            // Cheap loop hint between real checks.
            if !stuck_hinted && Supervisor::looks_stuck(&worker.read_log()) {
                stuck_hinted = true;
                warn!(task_id = %task.id, "repeated tool calls in the log, worker may be looping");
            }

            // Schedule the next check, gated on none being alive.
            if last_check.elapsed() >= self.config.check_interval && in_flight.is_none() {
                check_ordinal += 1;
                last_check = Instant::now();
                let supervisor = Supervisor::new(self.paths.root(), self.runner.clone());
                let cancel = supervisor.cancel_token();
                let tx = tx.clone();
                let task = task.clone();
                let log_path = worker.log_path().to_path_buf();
                let elapsed = worker.elapsed();
                let ordinal = check_ordinal;
                let handle = tokio::spawn(async move {
                    let verdict = supervisor.analyze(&task, &log_path, ordinal, elapsed).await;
                    let _ = tx.send(verdict).await;
                });
                in_flight = Some((cancel, handle));
            }
        }
    }

    /// The worker exited on its own: record cost, then route by result.
    ///
    /// A result that is not an error and carries no blocked marker counts
    /// as completion; the validator is the backstop for work that merely
    /// claims to be done.
    async fn finalize_worker(&mut self, task: &Task, worker: &mut Worker) -> Result<()> {
        let log = worker.read_log();
        self.record_worker_cost(task, &log, "task finished");
        self.store.set_session(&task.id, log.session_id.as_deref())?;

        if log.is_error {
            let message = truncate_for_display(&log.result_text, 200);
            let message = if message.is_empty() { "worker failed".to_string() } else { message };
            warn!(task_id = %task.id, "worker reported an error result");
            self.store.update_notes(&task.id, &format!("run failed: {message}"))?;
            self.store.mark_failed(&task.id, &message)?;
            return Ok(());
        }

        if let Some(reason) = blocked_reason(&log.result_text) {
            warn!(task_id = %task.id, reason = %reason, "worker reported the task blocked");
            self.store.update_notes(&task.id, &format!("blocked: {reason}"))?;
            self.store.mark_failed(&task.id, &reason)?;
            return Ok(());
        }

        let validator = Validator::new(self.paths.root(), self.runner.clone());
        let report = validator
            .validate_and_commit(task, self.shutdown.stop_token())
            .await?;
        self.ledger.add(
            CostSource::Validator,
            report.cost_usd,
            Some(&task.id),
            "post-work validation",
            false,
        );

        if report.success {
            info!(task_id = %task.id, "task completed");
            if !self.config.quiet {
                println!("  completed: {}", report.message);
            }
            self.store.mark_completed(&task.id)?;
        } else {
            // Not a task failure: the work may be fine and the tree merely
            // dirty. The orchestrator decides the new shape of the plan.
            warn!(task_id = %task.id, "validation failed, invoking the orchestrator");
            let context = format!(
                "validation failure on task [{}]: {}\nuncommitted paths:\n{}",
                task.id,
                report.message,
                report.remaining.join("\n"),
            );
            let orch = self
                .orchestrator()
                .run(
                    &format!("validation failed for task {}", task.id),
                    &context,
                    self.shutdown.stop_token(),
                )
                .await;
            self.ledger.add(
                CostSource::Orchestrator,
                orch.cost_usd,
                Some(&task.id),
                "validation failure",
                false,
            );
            if !orch.success {
                self.store
                    .mark_failed(&task.id, &format!("orchestration failed: {}", orch.message))?;
            }
            self.store.reload()?;
        }
        Ok(())
    }

    /// A supervisor decision fired: wind the worker down with a handover,
    /// then hand the plan to the orchestrator.
    async fn handle_orchestrate_decision(
        &mut self,
        task: &Task,
        worker: &mut Worker,
        verdict: &SupervisorVerdict,
    ) -> Result<()> {
        let log = worker.read_log();
        self.record_worker_cost(task, &log, "interrupted by supervisor");

        let cleanup = worker
            .graceful_shutdown(
                &format!("supervisor decision: {}", verdict.reason),
                self.shutdown.force_token(),
            )
            .await;
        self.ledger.add(
            CostSource::WorkerCleanup,
            cleanup.cost_usd,
            Some(&task.id),
            "supervisor-triggered cleanup",
            false,
        );

        let summary = cleanup
            .handover_summary
            .clone()
            .unwrap_or_else(|| synthesize_handover(&log));
        self.store
            .update_notes(&task.id, &format!("supervisor interrupt:\n{summary}"))?;
        self.store.set_session(&task.id, log.session_id.as_deref())?;
        if !self.config.quiet {
            print_handover(&summary);
        }

        let report = self
            .orchestrator()
            .run(
                &format!("supervisor decision: {}", verdict.reason),
                &format!("task [{}]: {}", task.id, task.description),
                self.shutdown.stop_token(),
            )
            .await;
        self.ledger.add(
            CostSource::Orchestrator,
            report.cost_usd,
            Some(&task.id),
            "supervisor-triggered orchestration",
            false,
        );
        if !report.success {
            self.store
                .mark_failed(&task.id, &format!("orchestration failed: {}", report.message))?;
        }
        self.store.reload()?;
        Ok(())
    }

    /// Stop requested while a worker was running.
    ///
    /// Successful cleanup means the partial work is worth keeping; only a
    /// failed cleanup rolls the tree back to the pre-task snapshot, and
    /// the handover in `notes` explains the state either way.
    async fn handle_interruption(
        &mut self,
        task: &Task,
        worker: &mut Worker,
        snapshot: Option<&str>,
    ) -> Result<()> {
        info!(task_id = %task.id, "interrupt: shutting the worker down gracefully");
        let log = worker.read_log();
        self.record_worker_cost(task, &log, "interrupted by user");

        let cleanup = worker
            .graceful_shutdown("user requested termination", self.shutdown.force_token())
            .await;
        self.ledger.add(
            CostSource::WorkerCleanup,
            cleanup.cost_usd,
            Some(&task.id),
            "shutdown cleanup",
            false,
        );

        // Restore first, persist the handover after: the reset rewrites
        // tasks.json too, and the notes must survive it.
        if cleanup.success {
            info!("cleanup succeeded, keeping partial work");
        } else if let Some(snapshot) = snapshot {
            warn!(snapshot, "cleanup incomplete, restoring the pre-task snapshot");
            vcs::reset_hard(self.paths.root(), snapshot)?;
        } else {
            warn!("cleanup incomplete and no snapshot exists, leaving the tree as-is");
        }

        let summary = cleanup
            .handover_summary
            .clone()
            .unwrap_or_else(|| synthesize_handover(&log));
        self.store
            .update_notes(&task.id, &format!("interrupted:\n{summary}"))?;
        self.store.set_session(&task.id, log.session_id.as_deref())?;
        if !self.config.quiet {
            print_handover(&summary);
        }
        Ok(())
    }

    /// One worker record per invocation: the result event's cost when the
    /// log has one, an estimate from token counts otherwise.
    fn record_worker_cost(&mut self, task: &Task, log: &ParsedLog, details: &str) {
        if log.cost_usd > 0.0 {
            self.ledger
                .add(CostSource::Worker, log.cost_usd, Some(&task.id), details, false);
        } else {
            let estimate = estimate_cost_from_log(
                &self.paths.worker_log(&task.id),
                self.config.input_price_per_mtok,
                self.config.output_price_per_mtok,
            );
            self.ledger.add(
                CostSource::Worker,
                estimate,
                Some(&task.id),
                &format!("{details} (estimated)"),
                true,
            );
        }
    }

    fn print_new_events(&mut self, worker: &mut Worker) {
        let elapsed = worker.elapsed();
        for event in worker.read_new_events() {
            if self.config.quiet {
                continue;
            }
            let stamp = prompts::format_hms(elapsed);
            match &event {
                AgentEvent::AssistantText { content } => {
                    println!("  [{stamp}] ~ {}", truncate_for_display(content, 100));
                }
                AgentEvent::ToolUse { name, input_summary } => {
                    if input_summary.is_empty() {
                        println!("  [{stamp}] > {name}");
                    } else {
                        println!("  [{stamp}] > {name}: {input_summary}");
                    }
                }
                AgentEvent::Result { is_error, text, .. } => {
                    let marker = if *is_error { "error" } else { "done" };
                    println!("  [{stamp}] {marker}: {}", truncate_for_display(text, 100));
                }
                _ => {}
            }
        }
    }

    fn print_failed_tasks(&self) {
        println!(
            "\nOrchestration could not resolve the failed tasks after {} rounds.",
            self.config.max_failed_retries
        );
        for task in self.store.failed() {
            println!("  [{}] {}", task.id, task.description);
            if let Some(error) = &task.error_message {
                println!("      error: {}", truncate_for_display(error, 100));
            }
            if let Some(notes) = &task.notes {
                println!("      notes: {}", truncate_for_display(notes, 100));
            }
        }
        println!("Edit tasks.json by hand or run `foreman reset-task <id>`, then run again.");
    }
}

/// The reason following a `TASK_BLOCKED:` marker, if present.
///
/// This and `Result.isError` are the only finalize-time failure signals;
/// any other result counts as completion and the validator is the
/// backstop.
fn blocked_reason(result_text: &str) -> Option<String> {
    let start = result_text.find(prompts::TASK_BLOCKED_PREFIX)?;
    let rest = &result_text[start + prompts::TASK_BLOCKED_PREFIX.len()..];
    let reason = rest.lines().next().unwrap_or("").trim();
    Some(if reason.is_empty() {
        "blocked without a stated reason".to_string()
    } else {
        reason.to_string()
    })
}

/// When a shutdown produced no handover, build one from the log: the last
/// ten tool calls and the last assistant thought.
fn synthesize_handover(log: &ParsedLog) -> String {
    let mut lines = vec![
        "## Activity before interruption (reconstructed from the log)".to_string(),
        String::new(),
    ];

    let tool_calls: Vec<&AgentEvent> = log
        .events
        .iter()
        .filter(|event| matches!(event, AgentEvent::ToolUse { .. }))
        .collect();
    if !tool_calls.is_empty() {
        lines.push("## Recent operations".to_string());
        for event in tool_calls.iter().rev().take(10).rev() {
            if let AgentEvent::ToolUse { name, input_summary } = event {
                if input_summary.is_empty() {
                    lines.push(format!("- {name}"));
                } else {
                    lines.push(format!("- {name}: {input_summary}"));
                }
            }
        }
        lines.push(String::new());
    }

    let last_thought = log.events.iter().rev().find_map(|event| match event {
        AgentEvent::AssistantText { content } => Some(content.clone()),
        _ => None,
    });
    if let Some(thought) = last_thought {
        lines.push("## Last recorded thought".to_string());
        lines.push(truncate_for_display(&thought, 300));
        lines.push(String::new());
    }

    lines.push("## Suggested next steps".to_string());
    lines.push(
        "The run was interrupted before a handover could be written; resume from the \
         operations above or start the task over."
            .to_string(),
    );
    lines.join("\n")
}

fn print_handover(summary: &str) {
    println!("\n{}", "=".repeat(60));
    println!("Worker handover");
    println!("{}", "=".repeat(60));
    for line in summary.lines() {
        println!("  {line}");
    }
    println!("{}", "=".repeat(60));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_reason_extracts_the_first_line() {
        assert_eq!(
            blocked_reason("did what I could. TASK_BLOCKED: missing API credentials\nmore text"),
            Some("missing API credentials".to_string()),
        );
        assert_eq!(
            blocked_reason("TASK_BLOCKED:"),
            Some("blocked without a stated reason".to_string()),
        );
        assert_eq!(blocked_reason("all done TASK_COMPLETED"), None);
    }

    #[test]
    fn synthesized_handover_keeps_the_last_ten_tool_calls() {
        let mut log = ParsedLog::default();
        for i in 0..15 {
            log.events.push(AgentEvent::ToolUse {
                name: "Bash".to_string(),
                input_summary: format!("step {i}"),
            });
        }
        log.events.push(AgentEvent::AssistantText {
            content: "about to rerun the tests".to_string(),
        });

        let summary = synthesize_handover(&log);
        assert!(summary.contains("step 14"));
        assert!(summary.contains("step 5"));
        assert!(!summary.contains("step 4\n"));
        assert!(summary.contains("about to rerun the tests"));
        assert!(summary.contains("## Suggested next steps"));
    }

    #[test]
    fn synthesized_handover_with_an_empty_log_still_advises() {
        let summary = synthesize_handover(&ParsedLog::default());
        assert!(summary.contains("## Suggested next steps"));
        assert!(!summary.contains("## Recent operations"));
    }
}
