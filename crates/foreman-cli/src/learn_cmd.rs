//! `foreman learn`: fold a user suggestion into the project's CLAUDE.md
//! instructions through a single agent invocation.

use std::path::Path;

use anyhow::{Result, bail};
use tokio_util::sync::CancellationToken;

use foreman_core::agent::{AgentRunner, RunOptions};
use foreman_core::config::EngineConfig;
use foreman_core::cost::{CostLedger, CostSource};
use foreman_core::workspace::WorkspacePaths;
use foreman_core::prompts;

use crate::display::PrinterSink;

pub async fn run_learn(workspace: &Path, suggestion: &str, config: &EngineConfig) -> Result<()> {
    let paths = WorkspacePaths::new(workspace);
    paths.ensure_layout()?;
    let runner = AgentRunner::with_command(&config.agent_cmd);
    let mut ledger = CostLedger::new(paths.cost_file());

    println!("updating project instructions...");
    let mut sink = PrinterSink::new(config.quiet);
    let outcome = runner
        .run_foreground(
            &prompts::learn_prompt(suggestion),
            workspace,
            &RunOptions {
                verbose: true,
                ..RunOptions::default()
            },
            &mut sink,
            &CancellationToken::new(),
        )
        .await?;
    ledger.add(CostSource::TaskGeneration, outcome.cost_usd, None, "learn", false);

    if outcome.is_error {
        bail!("agent failed: {}", outcome.result_text);
    }
    if outcome.result_text.contains(prompts::LEARNED) {
        println!("CLAUDE.md updated");
    } else {
        println!("agent finished without confirming; check CLAUDE.md manually");
    }
    Ok(())
}
