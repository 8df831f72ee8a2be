//! `foreman run`: drive the engine loop.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;

use foreman_core::config::EngineConfig;
use foreman_core::engine::{Engine, EngineOutcome, ShutdownSignal};
use foreman_core::workspace::WorkspacePaths;

pub async fn run_engine(workspace: &Path, config: EngineConfig) -> Result<ExitCode> {
    let paths = WorkspacePaths::new(workspace);
    if !paths.tasks_file().exists() {
        println!("no tasks.json in {}; run `foreman init` first", workspace.display());
        return Ok(ExitCode::FAILURE);
    }

    let shutdown = ShutdownSignal::install()?;
    let mut engine = Engine::new(workspace, config, shutdown)?;

    println!("starting the engine (Ctrl-C stops gracefully)");
    let outcome = engine.run().await?;

    Ok(match outcome {
        EngineOutcome::Completed => {
            println!("\nall tasks completed");
            ExitCode::SUCCESS
        }
        EngineOutcome::MaxTasksReached => {
            println!("\ntask limit reached; run again to continue");
            ExitCode::SUCCESS
        }
        EngineOutcome::Interrupted => {
            println!("\nstopped; run `foreman run` to pick up where this left off");
            ExitCode::SUCCESS
        }
        EngineOutcome::FailedTasksUnresolved => ExitCode::FAILURE,
    })
}
