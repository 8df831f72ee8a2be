mod config;
mod display;
mod init_cmd;
mod learn_cmd;
mod run_cmd;
mod status_cmd;
mod task_cmd;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use foreman_core::task::{TaskId, TaskStore};
use foreman_core::workspace::{self, WorkspacePaths};

#[derive(Parser)]
#[command(name = "foreman", about = "Supervised task runner for long-running LLM coding agents")]
struct Cli {
    /// Workspace directory (defaults to the current directory)
    #[arg(short = 'w', long, global = true)]
    workspace: Option<PathBuf>,

    /// Suppress realtime agent output
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare the workspace; with a prompt, also generate tasks.json
    Init {
        /// Free-form project description for the planning agent
        prompt: Option<String>,
    },
    /// Run the engine loop over the task list
    Run {
        /// Stop after this many tasks
        #[arg(long)]
        max_tasks: Option<u32>,
    },
    /// Show task statistics and recent history
    Status,
    /// Reset every task to pending
    Reset,
    /// Reset one task to pending
    ResetTask {
        /// Task id to reset (e.g. "2.1")
        task_id: String,
    },
    /// Rework the task list from a description (interactive)
    Task {
        /// What to change in the plan
        description: String,
    },
    /// Fold a suggestion into the project's CLAUDE.md instructions
    Learn {
        /// The suggestion to capture
        suggestion: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    let workspace = match &cli.workspace {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };
    workspace::check_safe_root(&workspace)?;

    match cli.command {
        Commands::Init { prompt } => {
            let config = config::resolve_engine_config(None, cli.quiet)?;
            init_cmd::run_init(&workspace, prompt.as_deref(), &config).await?;
        }
        Commands::Run { max_tasks } => {
            let config = config::resolve_engine_config(max_tasks, cli.quiet)?;
            return run_cmd::run_engine(&workspace, config).await;
        }
        Commands::Status => {
            status_cmd::run_status(&workspace)?;
        }
        Commands::Reset => {
            let paths = WorkspacePaths::new(&workspace);
            let mut store = TaskStore::load(paths.tasks_file())?;
            store.reset_all()?;
            println!("all tasks reset to pending");
        }
        Commands::ResetTask { task_id } => {
            let paths = WorkspacePaths::new(&workspace);
            let mut store = TaskStore::load(paths.tasks_file())?;
            let id = TaskId::new(task_id.as_str());
            store.reset(&id)?;
            println!("task {task_id} reset to pending");
        }
        Commands::Task { description } => {
            let config = config::resolve_engine_config(None, cli.quiet)?;
            task_cmd::run_task_edit(&workspace, &description, &config).await?;
        }
        Commands::Learn { suggestion } => {
            let config = config::resolve_engine_config(None, cli.quiet)?;
            learn_cmd::run_learn(&workspace, &suggestion, &config).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
