//! On-disk workspace layout.
//!
//! One workspace = one project:
//!
//! ```text
//! <workspace>/
//!   tasks.json                           # the authoritative task list
//!   .gitignore                           # engine keeps .state/ ignored
//!   .state/
//!     logs/worker_<taskId>.log           # merged stdout+stderr per worker
//!     logs/worker_<taskId>_cleanup.log   # cleanup invocation logs
//!     cost_history.jsonl                 # append-only cost ledger
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::task::TaskId;

/// Name of the engine's private state directory inside the workspace.
pub const STATE_DIR: &str = ".state";

/// Name of the authoritative task list inside the workspace.
pub const TASKS_FILE: &str = "tasks.json";

/// Directories the engine refuses to use as a workspace root.
const FORBIDDEN_ROOTS: &[&str] = &[
    "/", "/etc", "/usr", "/bin", "/sbin", "/var", "/System", "/Library",
];

/// Resolved paths inside one workspace.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    root: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tasks_file(&self) -> PathBuf {
        self.root.join(TASKS_FILE)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir().join("logs")
    }

    pub fn cost_file(&self) -> PathBuf {
        self.state_dir().join("cost_history.jsonl")
    }

    pub fn worker_log(&self, id: &TaskId) -> PathBuf {
        self.logs_dir().join(format!("worker_{id}.log"))
    }

    pub fn worker_cleanup_log(&self, id: &TaskId) -> PathBuf {
        self.logs_dir().join(format!("worker_{id}_cleanup.log"))
    }

    /// Create the state directories.
    pub fn ensure_layout(&self) -> Result<()> {
        std::fs::create_dir_all(self.logs_dir()).with_context(|| {
            format!("failed to create state directory under {}", self.root.display())
        })
    }
}

/// Append `entry` to the workspace `.gitignore` unless already present.
/// Returns `true` when the file was changed.
pub fn ensure_gitignore_entry(root: &Path, entry: &str) -> Result<bool> {
    let path = root.join(".gitignore");
    let existing = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    if existing.lines().any(|line| line.trim() == entry) {
        return Ok(false);
    }

    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(entry);
    updated.push('\n');
    std::fs::write(&path, updated)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

/// Refuse to treat a system directory as a workspace. The agent runs with
/// elevated permissions inside the workspace root, so the root must be a
/// project directory.
pub fn check_safe_root(root: &Path) -> Result<()> {
    for forbidden in FORBIDDEN_ROOTS {
        let forbidden_path = Path::new(forbidden);
        if root == forbidden_path {
            bail!("refusing to use system directory {forbidden} as a workspace");
        }
        // Only direct children of a forbidden root are refused; deep paths
        // like /var/home/me/project are legitimate.
        if let Some(parent) = root.parent() {
            if parent == forbidden_path && *forbidden != "/" && root.components().count() <= 3 {
                bail!("refusing to use system directory {} as a workspace", root.display());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn paths_follow_the_layout() {
        let paths = WorkspacePaths::new("/work");
        assert_eq!(paths.tasks_file(), Path::new("/work/tasks.json"));
        assert_eq!(paths.cost_file(), Path::new("/work/.state/cost_history.jsonl"));
        let id = TaskId::new("2.1.3");
        assert_eq!(
            paths.worker_log(&id),
            Path::new("/work/.state/logs/worker_2.1.3.log")
        );
        assert_eq!(
            paths.worker_cleanup_log(&id),
            Path::new("/work/.state/logs/worker_2.1.3_cleanup.log")
        );
    }

    #[test]
    fn ensure_layout_creates_the_state_tree() {
        let dir = TempDir::new().unwrap();
        let paths = WorkspacePaths::new(dir.path());
        paths.ensure_layout().unwrap();
        assert!(paths.logs_dir().is_dir());
    }

    #[test]
    fn gitignore_entries_are_appended_once() {
        let dir = TempDir::new().unwrap();
        assert!(ensure_gitignore_entry(dir.path(), ".state/").unwrap());
        assert!(!ensure_gitignore_entry(dir.path(), ".state/").unwrap());
        assert!(ensure_gitignore_entry(dir.path(), "CLAUDE.md").unwrap());

        let content = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(content, ".state/\nCLAUDE.md\n");
    }

    #[test]
    fn gitignore_append_preserves_existing_content() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "target").unwrap();
        ensure_gitignore_entry(dir.path(), ".state/").unwrap();
        let content = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(content, "target\n.state/\n");
    }

    #[test]
    fn system_roots_are_refused() {
        assert!(check_safe_root(Path::new("/")).is_err());
        assert!(check_safe_root(Path::new("/etc")).is_err());
        assert!(check_safe_root(Path::new("/usr/lib")).is_err());
        assert!(check_safe_root(Path::new("/home/dev/project")).is_ok());
        assert!(check_safe_root(Path::new("/var/home/dev/project")).is_ok());
    }
}
