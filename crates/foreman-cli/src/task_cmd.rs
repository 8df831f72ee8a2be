//! Planning flows: bootstrap `tasks.json` from a request, or edit it from
//! a description, with an interactive confirm-or-revise loop.
//!
//! Each round calls the planning agent, validates the document it wrote,
//! shows the resulting list, and asks the user to confirm or give
//! feedback. Feedback resumes the same agent session so revisions keep
//! their context.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;

use foreman_core::agent::{AgentOutcome, AgentRunner, RunOptions};
use foreman_core::config::EngineConfig;
use foreman_core::cost::{CostLedger, CostSource};
use foreman_core::task::{TaskStore, store};
use foreman_core::workspace::WorkspacePaths;
use foreman_core::{prompts, vcs};

use crate::display::PrinterSink;

/// `foreman init <prompt>`: generate the initial tasks.json.
pub async fn bootstrap_tasks(workspace: &Path, request: &str, config: &EngineConfig) -> Result<()> {
    let paths = WorkspacePaths::new(workspace);
    if paths.tasks_file().exists() {
        print!("tasks.json already exists; overwrite? [y/N] ");
        std::io::stdout().flush()?;
        if !read_line()?.eq_ignore_ascii_case("y") {
            println!("cancelled");
            return Ok(());
        }
    }

    println!("\nplanning the initial task list...");
    let accepted = plan_loop(
        workspace,
        config,
        &prompts::tasks_creation_prompt(request),
        &[prompts::TASKS_CREATED, prompts::TASKS_MODIFIED],
    )
    .await?;

    if accepted {
        print!("commit the task list? [y/N] ");
        std::io::stdout().flush()?;
        if read_line()?.eq_ignore_ascii_case("y") {
            vcs::commit_all(workspace, "feat: initialize task list")?;
            println!("committed");
        }
    }
    Ok(())
}

/// `foreman task <description>`: rework the existing task list.
pub async fn run_task_edit(workspace: &Path, description: &str, config: &EngineConfig) -> Result<()> {
    let paths = WorkspacePaths::new(workspace);
    if !paths.tasks_file().exists() {
        bail!("no tasks.json in {}; run `foreman init` first", workspace.display());
    }

    println!("\nediting the task list...");
    plan_loop(
        workspace,
        config,
        &prompts::task_modification_prompt(description),
        &[prompts::TASKS_MODIFIED],
    )
    .await?;
    Ok(())
}

/// One planning conversation: call, validate, show, confirm or revise.
/// Returns `true` when the user accepted the result.
async fn plan_loop(
    workspace: &Path,
    config: &EngineConfig,
    initial_prompt: &str,
    accept_tokens: &[&str],
) -> Result<bool> {
    let paths = WorkspacePaths::new(workspace);
    paths.ensure_layout()?;
    let runner = AgentRunner::with_command(&config.agent_cmd);
    let mut ledger = CostLedger::new(paths.cost_file());

    let mut outcome = call_planner(&runner, workspace, initial_prompt, None, config, &mut ledger).await?;

    loop {
        if !accept_tokens.iter().any(|token| outcome.result_text.contains(token)) {
            bail!("the planning agent did not confirm the edit; tasks.json is unchanged or suspect");
        }
        store::validate_file(&paths.tasks_file())
            .context("the edited tasks.json does not validate")?;

        show_tasks(&paths)?;

        println!("\nconfirm the task list:");
        println!("  y        accept");
        println!("  <text>   send feedback and revise");
        println!("  <empty>  cancel");
        print!("> ");
        std::io::stdout().flush()?;

        let input = read_line()?;
        if input.eq_ignore_ascii_case("y") {
            println!("accepted");
            return Ok(true);
        }
        if input.is_empty() {
            println!("cancelled");
            return Ok(false);
        }

        let Some(session_id) = outcome.session_id.clone() else {
            bail!("the planning session id was not captured; edit tasks.json by hand");
        };
        println!("\nrevising from your feedback...");
        outcome = call_planner(
            &runner,
            workspace,
            &prompts::tasks_revision_prompt(&input),
            Some(session_id),
            config,
            &mut ledger,
        )
        .await?;
    }
}

async fn call_planner(
    runner: &AgentRunner,
    workspace: &Path,
    prompt: &str,
    resume_session_id: Option<String>,
    config: &EngineConfig,
    ledger: &mut CostLedger,
) -> Result<AgentOutcome> {
    let options = RunOptions {
        resume_session_id,
        append_system_prompt: None,
        verbose: true,
    };
    let mut sink = PrinterSink::new(config.quiet);
    let outcome = runner
        .run_foreground(prompt, workspace, &options, &mut sink, &CancellationToken::new())
        .await?;
    ledger.add(CostSource::TaskGeneration, outcome.cost_usd, None, "plan edit", false);
    if outcome.is_error {
        bail!("planning agent failed: {}", outcome.result_text);
    }
    Ok(outcome)
}

fn show_tasks(paths: &WorkspacePaths) -> Result<()> {
    let store = TaskStore::load(paths.tasks_file())?;
    println!("\ntask list ({} tasks):", store.tasks().len());
    for task in store.tasks() {
        println!("  [{}] {}", task.id, task.description);
        for step in task.steps.iter().take(2) {
            println!("      - {step}");
        }
        if task.steps.len() > 2 {
            println!("      ... {} steps total", task.steps.len());
        }
    }
    Ok(())
}

fn read_line() -> Result<String> {
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
