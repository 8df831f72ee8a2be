//! `foreman status`: task statistics plus recent version-control history.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;

use foreman_core::cost::{self, CostSource};
use foreman_core::task::{TaskStatus, TaskStore};
use foreman_core::vcs;
use foreman_core::workspace::WorkspacePaths;

pub fn run_status(workspace: &Path) -> Result<()> {
    let paths = WorkspacePaths::new(workspace);
    let store = TaskStore::load(paths.tasks_file())?;
    let stats = store.stats();

    println!("Tasks: {} total", stats.total);
    println!(
        "  pending={} in_progress={} completed={} failed={}",
        stats.pending, stats.in_progress, stats.completed, stats.failed,
    );
    println!();

    for task in store.tasks() {
        let icon = match task.status {
            TaskStatus::Pending => ".",
            TaskStatus::InProgress => "*",
            TaskStatus::Completed => "+",
            TaskStatus::Failed => "!",
        };
        println!("  [{icon}] {} {}", task.id, task.description);
        if let Some(error) = &task.error_message {
            println!("        error: {error}");
        }
    }

    if vcs::is_repo(workspace) {
        let log = vcs::recent_log(workspace, 10)?;
        if !log.is_empty() {
            println!("\nRecent commits:");
            for line in log.lines() {
                println!("  {line}");
            }
        }
    }

    print_cost_history(&paths);
    Ok(())
}

/// Lifetime spend from the persisted ledger, split by source.
fn print_cost_history(paths: &WorkspacePaths) {
    let history = cost::read_history(&paths.cost_file());
    if history.is_empty() {
        return;
    }

    let mut by_source: BTreeMap<CostSource, f64> = BTreeMap::new();
    let mut total = 0.0;
    let mut estimated = 0.0;
    for record in &history {
        *by_source.entry(record.source).or_insert(0.0) += record.cost_usd;
        total += record.cost_usd;
        if record.estimated {
            estimated += record.cost_usd;
        }
    }

    println!("\nCost to date ({} invocations):", history.len());
    for (source, cost) in &by_source {
        println!("  {source:<16} ${cost:.4}");
    }
    if estimated > 0.0 {
        println!("  of which estimated: ${estimated:.4}");
    }
    println!("  total            ${total:.4}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_test_utils::{git_commit_all, init_git_repo};
    use tempfile::TempDir;

    #[test]
    fn status_works_on_an_empty_workspace() {
        let dir = TempDir::new().unwrap();
        run_status(dir.path()).unwrap();
    }

    #[test]
    fn status_works_with_tasks_and_history() {
        let dir = TempDir::new().unwrap();
        init_git_repo(dir.path());
        std::fs::write(
            dir.path().join("tasks.json"),
            r#"[{"id": "1", "description": "a", "status": "failed", "error_message": "boom"}]"#,
        )
        .unwrap();
        git_commit_all(dir.path(), "base");
        run_status(dir.path()).unwrap();
    }
}
