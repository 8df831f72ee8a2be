//! Git subprocess helpers.
//!
//! The engine uses version control as its progress journal and its restore
//! mechanism: a snapshot hash before each task, a commit after validation,
//! a hard reset when cleanup fails. All helpers shell out to `git` in the
//! workspace and bubble failures up so the engine never continues from an
//! ambiguous tree state.

use std::path::Path;
use std::process::{Command, Output};

use anyhow::{Context, Result, bail};

/// `git init` the workspace (no-op if already a repository).
pub fn init(workspace: &Path) -> Result<()> {
    run(workspace, &["init", "--quiet"])?;
    Ok(())
}

pub fn is_repo(workspace: &Path) -> bool {
    workspace.join(".git").exists()
}

/// The current HEAD hash, or `None` when the repository has no commits yet.
pub fn head_hash(workspace: &Path) -> Result<Option<String>> {
    let output = output(workspace, &["rev-parse", "HEAD"])?;
    if output.status.success() {
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    } else {
        // rev-parse fails on an unborn branch; that is a valid state.
        Ok(None)
    }
}

/// Paths with uncommitted changes (staged, unstaged, or untracked).
pub fn changed_files(workspace: &Path) -> Result<Vec<String>> {
    let output = run(workspace, &["status", "--porcelain"])?;
    let text = String::from_utf8_lossy(&output.stdout);
    Ok(text
        .lines()
        .filter_map(|line| line.get(3..))
        .map(str::to_string)
        .collect())
}

pub fn has_uncommitted(workspace: &Path) -> Result<bool> {
    Ok(!changed_files(workspace)?.is_empty())
}

/// Whether a single path has uncommitted changes.
pub fn path_dirty(workspace: &Path, path: &str) -> Result<bool> {
    let output = run(workspace, &["status", "--porcelain", "--", path])?;
    Ok(!output.stdout.is_empty())
}

/// Stage everything and commit. Returns `false` when there was nothing
/// to commit.
pub fn commit_all(workspace: &Path, message: &str) -> Result<bool> {
    ensure_identity(workspace);
    run(workspace, &["add", "-A"])?;
    if changed_files_staged_empty(workspace)? {
        return Ok(false);
    }
    run(workspace, &["commit", "--quiet", "-m", message])?;
    Ok(true)
}

/// Stage and commit specific paths only. Returns `false` when the paths
/// were already clean.
pub fn commit_paths(workspace: &Path, paths: &[&str], message: &str) -> Result<bool> {
    ensure_identity(workspace);
    let mut dirty = false;
    for path in paths {
        if path_dirty(workspace, path)? {
            dirty = true;
        }
    }
    if !dirty {
        return Ok(false);
    }
    let mut args = vec!["add", "--"];
    args.extend_from_slice(paths);
    run(workspace, &args)?;
    let mut args = vec!["commit", "--quiet", "-m", message, "--"];
    args.extend_from_slice(paths);
    run(workspace, &args)?;
    Ok(true)
}

/// Hard-reset the working tree to a commit.
pub fn reset_hard(workspace: &Path, commit: &str) -> Result<()> {
    run(workspace, &["reset", "--hard", "--quiet", commit])?;
    Ok(())
}

/// The last `count` commits, one line each. Empty string before the first
/// commit.
pub fn recent_log(workspace: &Path, count: usize) -> Result<String> {
    let count = format!("-{count}");
    let output = output(workspace, &["log", "--oneline", &count])?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Ok(String::new())
    }
}

fn changed_files_staged_empty(workspace: &Path) -> Result<bool> {
    let output = run(workspace, &["status", "--porcelain"])?;
    Ok(output.stdout.is_empty())
}

/// Make sure commits can be created even where no git identity is
/// configured (CI, fresh containers). Only fills the gap; an existing
/// identity is left alone.
fn ensure_identity(workspace: &Path) {
    let has_email = output(workspace, &["config", "user.email"])
        .map(|o| o.status.success() && !o.stdout.is_empty())
        .unwrap_or(false);
    if !has_email {
        let _ = output(workspace, &["config", "user.email", "foreman@localhost"]);
        let _ = output(workspace, &["config", "user.name", "foreman"]);
    }
}

/// Run git and fail on non-zero exit.
fn run(workspace: &Path, args: &[&str]) -> Result<Output> {
    let out = output(workspace, args)?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        bail!("git {args:?} failed: {}", stderr.trim());
    }
    Ok(out)
}

/// Run git and hand back the raw output regardless of exit status.
fn output(workspace: &Path, args: &[&str]) -> Result<Output> {
    Command::new("git")
        .args(args)
        .current_dir(workspace)
        .output()
        .with_context(|| format!("failed to run git {args:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_test_utils::{git_commit_all, git_head, init_git_repo};
    use tempfile::TempDir;

    #[test]
    fn head_hash_is_none_on_an_unborn_branch() {
        let dir = TempDir::new().unwrap();
        init_git_repo(dir.path());
        assert_eq!(head_hash(dir.path()).unwrap(), None);
    }

    #[test]
    fn commit_all_and_head_hash_round_trip() {
        let dir = TempDir::new().unwrap();
        init_git_repo(dir.path());
        std::fs::write(dir.path().join("a.txt"), "one").unwrap();

        assert!(commit_all(dir.path(), "first").unwrap());
        let head = head_hash(dir.path()).unwrap().unwrap();
        assert_eq!(head, git_head(dir.path()));

        // Clean tree: nothing to commit.
        assert!(!commit_all(dir.path(), "noop").unwrap());
    }

    #[test]
    fn changed_files_lists_untracked_and_modified() {
        let dir = TempDir::new().unwrap();
        init_git_repo(dir.path());
        std::fs::write(dir.path().join("a.txt"), "one").unwrap();
        git_commit_all(dir.path(), "base");

        std::fs::write(dir.path().join("a.txt"), "two").unwrap();
        std::fs::write(dir.path().join("b.txt"), "new").unwrap();
        let mut files = changed_files(dir.path()).unwrap();
        files.sort();
        assert_eq!(files, ["a.txt", "b.txt"]);
        assert!(has_uncommitted(dir.path()).unwrap());
    }

    #[test]
    fn commit_paths_leaves_other_changes_alone() {
        let dir = TempDir::new().unwrap();
        init_git_repo(dir.path());
        std::fs::write(dir.path().join("tasks.json"), "[]").unwrap();
        std::fs::write(dir.path().join("other.txt"), "x").unwrap();
        git_commit_all(dir.path(), "base");

        std::fs::write(dir.path().join("tasks.json"), "[{}]").unwrap();
        std::fs::write(dir.path().join("other.txt"), "y").unwrap();

        assert!(commit_paths(dir.path(), &["tasks.json"], "update plan").unwrap());
        let files = changed_files(dir.path()).unwrap();
        assert_eq!(files, ["other.txt"]);

        // Already clean path: no commit.
        assert!(!commit_paths(dir.path(), &["tasks.json"], "noop").unwrap());
    }

    #[test]
    fn reset_hard_restores_the_snapshot() {
        let dir = TempDir::new().unwrap();
        init_git_repo(dir.path());
        std::fs::write(dir.path().join("a.txt"), "one").unwrap();
        git_commit_all(dir.path(), "base");
        let snapshot = git_head(dir.path());

        std::fs::write(dir.path().join("a.txt"), "scribbled").unwrap();
        git_commit_all(dir.path(), "bad");

        reset_hard(dir.path(), &snapshot).unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "one");
        assert_eq!(git_head(dir.path()), snapshot);
    }

    #[test]
    fn recent_log_is_empty_before_first_commit() {
        let dir = TempDir::new().unwrap();
        init_git_repo(dir.path());
        assert_eq!(recent_log(dir.path(), 10).unwrap(), "");

        std::fs::write(dir.path().join("a.txt"), "one").unwrap();
        git_commit_all(dir.path(), "hello log");
        assert!(recent_log(dir.path(), 10).unwrap().contains("hello log"));
    }
}
