//! Shared test fixtures for foreman integration tests.
//!
//! The engine's only external collaborators are the agent CLI and git, so
//! tests exercise real subprocesses: fake agent scripts that emit canned
//! stream-json lines, and throwaway git repositories.

use std::path::{Path, PathBuf};
use std::process::Command;

/// Write an executable shell script that prints each line of `lines` and
/// exits 0. Stands in for the agent CLI: arguments are ignored, output is
/// the canned JSONL stream.
pub fn fake_agent(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
    let mut body = String::from("#!/bin/sh\n");
    for line in lines {
        body.push_str("cat <<'FOREMAN_EOF'\n");
        body.push_str(line);
        body.push_str("\nFOREMAN_EOF\n");
    }
    fake_agent_script(dir, name, &body)
}

/// Write an executable shell script with an arbitrary body.
///
/// Use this when the fake agent needs behavior (sleeping, dispatching on
/// the prompt in `"$@"`, editing files in the workspace) rather than a
/// fixed stream.
pub fn fake_agent_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("failed to write fake agent script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("failed to chmod fake agent script");
    }
    path
}

/// Initialize a git repository at `dir` with a local identity configured,
/// so commits work in bare CI environments.
pub fn init_git_repo(dir: &Path) {
    run_git(dir, &["init", "--quiet"]);
    run_git(dir, &["config", "user.email", "tests@localhost"]);
    run_git(dir, &["config", "user.name", "foreman tests"]);
}

/// Stage everything and commit. Panics on failure so tests fail loudly.
pub fn git_commit_all(dir: &Path, message: &str) {
    run_git(dir, &["add", "-A"]);
    run_git(dir, &["commit", "--quiet", "--allow-empty", "-m", message]);
}

/// Current HEAD hash.
pub fn git_head(dir: &Path) -> String {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(dir)
        .output()
        .expect("failed to run git rev-parse");
    assert!(output.status.success(), "git rev-parse failed");
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn run_git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .unwrap_or_else(|e| panic!("failed to run git {args:?}: {e}"));
    assert!(status.success(), "git {args:?} failed in {}", dir.display());
}
