//! `foreman init`: prepare a workspace, optionally bootstrapping the task
//! list from a free-form request.

use std::path::Path;

use anyhow::Result;

use foreman_core::task::TaskStore;
use foreman_core::workspace::{self, WorkspacePaths};
use foreman_core::{vcs, config::EngineConfig};

use crate::task_cmd;

/// Create the workspace layout, initialize git, and protect existing code
/// with an initial snapshot commit. With a prompt, also generate
/// `tasks.json` through the planning agent.
pub async fn run_init(
    workspace: &Path,
    prompt: Option<&str>,
    config: &EngineConfig,
) -> Result<()> {
    std::fs::create_dir_all(workspace)?;
    let paths = WorkspacePaths::new(workspace);
    paths.ensure_layout()?;
    println!("workspace: {}", workspace.display());

    if vcs::is_repo(workspace) {
        println!("git repository already present");
        if vcs::has_uncommitted(workspace)? {
            println!("note: the tree has uncommitted changes; consider committing first");
        }
    } else {
        vcs::init(workspace)?;
        println!("git repository initialized");
        // Protect whatever was already there before any agent touches it.
        if vcs::commit_all(workspace, "chore: initial snapshot of existing files")? {
            println!("existing files committed as the initial snapshot");
        }
    }

    let mut ignored = false;
    ignored |= workspace::ensure_gitignore_entry(workspace, ".state/")?;
    ignored |= workspace::ensure_gitignore_entry(workspace, "CLAUDE.md")?;
    if ignored {
        println!(".gitignore updated");
    }

    match prompt {
        Some(request) => {
            task_cmd::bootstrap_tasks(workspace, request, config).await?;
        }
        None if !paths.tasks_file().exists() => {
            println!("\nno tasks.json yet; create one by hand or run:");
            println!("  foreman init \"<describe the project>\"");
            println!("\nformat: a JSON array of {{id, description, steps}} objects,");
            println!("ids as dot-separated path codes (\"1\", \"1.1\", \"2\").");
        }
        None => {
            let store = TaskStore::load(paths.tasks_file())?;
            let stats = store.stats();
            println!("tasks.json present: {} task(s), {} pending", stats.total, stats.pending);
        }
    }

    // Keep the bookkeeping out of the history going forward.
    if vcs::has_uncommitted(workspace)? {
        vcs::commit_all(workspace, "chore: workspace housekeeping")?;
    }

    println!("\ninitialized; run `foreman run` to start");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_core::config::EngineConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn init_creates_the_layout_and_protects_existing_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("existing.txt"), "keep me").unwrap();

        run_init(dir.path(), None, &EngineConfig::default()).await.unwrap();

        assert!(dir.path().join(".git").exists());
        assert!(dir.path().join(".state/logs").is_dir());
        let gitignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert!(gitignore.contains(".state/"));
        assert!(gitignore.contains("CLAUDE.md"));

        // The pre-existing file was committed before anything else.
        let log = vcs::recent_log(dir.path(), 10).unwrap();
        assert!(log.contains("initial snapshot"), "log: {log}");
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let dir = TempDir::new().unwrap();
        run_init(dir.path(), None, &EngineConfig::default()).await.unwrap();
        run_init(dir.path(), None, &EngineConfig::default()).await.unwrap();

        let gitignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(gitignore.matches(".state/").count(), 1);
    }
}
