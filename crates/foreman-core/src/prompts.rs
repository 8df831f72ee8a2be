//! Prompt templates and the protocol tokens shared with the agent.
//!
//! The tokens are the contract: the agent signals state by embedding them
//! verbatim in its output, which survives markdown and JSON embedding
//! without a structured return channel.

use std::time::Duration;

use crate::task::Task;

// ---------------------------------------------------------------------------
// Protocol tokens
// ---------------------------------------------------------------------------

pub const TASK_COMPLETED: &str = "TASK_COMPLETED";
pub const TASK_BLOCKED_PREFIX: &str = "TASK_BLOCKED:";
pub const TASKS_CREATED: &str = "TASKS_CREATED";
pub const TASKS_MODIFIED: &str = "TASKS_MODIFIED";
pub const ORCHESTRATION_DONE: &str = "ORCHESTRATION_DONE";
pub const REVIEW_PASSED: &str = "REVIEW_PASSED";
pub const LEARNED: &str = "LEARNED";
pub const HANDOVER_START: &str = "HANDOVER_START";
pub const HANDOVER_END: &str = "HANDOVER_END";
pub const CLEANUP_DONE: &str = "CLEANUP_DONE";

// ---------------------------------------------------------------------------
// Worker prompts
// ---------------------------------------------------------------------------

/// Appended to the agent's system prompt for every worker invocation.
pub const WORKER_SYSTEM_PROMPT: &str = "You are executing one step of a longer job. \
Before starting, run `git log --oneline -5` to see recent progress.";

/// The task prompt handed to a worker on start.
pub fn worker_task_prompt(task: &Task) -> String {
    let steps = if task.steps.is_empty() {
        "- no fixed steps; plan as needed".to_string()
    } else {
        task.steps
            .iter()
            .map(|s| format!("- {s}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let notes_section = match &task.notes {
        Some(notes) if !notes.is_empty() => format!("\n## Previous attempt\n{notes}\n"),
        _ => String::new(),
    };

    format!(
        "## Task\n{description}\n\n## Suggested steps\n{steps}\n{notes_section}\n\
         When the task is finished, end your final message with {done}.\n\
         If you cannot make progress, end with `{blocked} <reason>` instead.\n\
         Begin now.",
        description = task.description,
        done = TASK_COMPLETED,
        blocked = TASK_BLOCKED_PREFIX,
    )
}

/// Sent on a resumed session when a worker must shut down mid-task.
pub fn cleanup_prompt(reason: &str) -> String {
    format!(
        "Urgent: this task is being terminated. Perform cleanup now.\n\n\
         ## Reason\n{reason}\n\n\
         ## Required cleanup, in order\n\
         1. Kill any background processes you started.\n\
         2. Remove temporary files that are no longer needed (keep useful debug output).\n\
         3. Emit a handover summary for the next worker, fenced exactly like this:\n\n\
         {start}\n\
         ## Progress so far\n\
         [what is done, what was in flight]\n\n\
         ## Problems encountered\n\
         [issues hit and what was tried]\n\n\
         ## Suggested next steps\n\
         [concrete advice for the next worker]\n\n\
         ## Key files\n\
         [paths that matter, with one-line notes]\n\
         {end}\n\n\
         Do not edit tasks.json. The fenced summary is collected automatically.\n\
         Finish with {done}.",
        start = HANDOVER_START,
        end = HANDOVER_END,
        done = CLEANUP_DONE,
    )
}

// ---------------------------------------------------------------------------
// Supervisor prompt
// ---------------------------------------------------------------------------

/// Read-only oversight prompt. The agent reads the worker log itself and
/// answers with a single JSON object.
pub fn supervisor_prompt(task_description: &str, elapsed: Duration, log_file: &str) -> String {
    format!(
        "You are supervising a running coding agent.\n\n\
         ## Hard constraints\n\
         Read-only analysis. Do not modify files, run build commands, or create anything.\n\
         Your only output is one JSON decision.\n\n\
         ## Task under supervision\n\
         - description: {task_description}\n\
         - running for: {elapsed}\n\
         - log file: {log_file}\n\n\
         ## What to do\n\
         1. Read the log file to see what the worker has been doing.\n\
         2. Decide whether to intervene.\n\n\
         ## Decisions\n\
         - continue: the worker is making progress (including normal debugging)\n\
         - orchestrate: the task list needs rework (stuck in a loop, task too big, \
         new blocking problem discovered)\n\n\
         ## Output\n\
         Exactly one JSON object and nothing else:\n\
         {{\"decision\": \"continue|orchestrate\", \"reason\": \"<short>\"}}",
        elapsed = format_hms(elapsed),
    )
}

// ---------------------------------------------------------------------------
// Validator prompts
// ---------------------------------------------------------------------------

/// Post-work prompt: verify the worker's change set and commit it.
pub fn post_work_prompt(task: &Task) -> String {
    format!(
        "Task [{id}] \"{description}\" just finished. Verify the change set and commit it.\n\n\
         ## Suggested steps\n\
         1. Review: `git diff` the changes and check for inconsistencies or leftovers.\n\
         2. Clean: remove debug code and dead code; run the project linter if there is one.\n\
         3. Test: run the test suite or a quick functional check.\n\
         4. Commit: stage and commit with a message matching the project's existing style.\n\n\
         Anything that should never be committed (build output, scratch files) goes into \
         .gitignore instead.\n\n\
         ## Done means\n\
         `git status` reports a clean working tree.",
        id = task.id,
        description = task.description,
    )
}

/// Appended for the second validation attempt when files are still dirty.
pub fn post_work_retry_hint(remaining: &[String]) -> String {
    format!(
        "\n\n## Still uncommitted\nThe previous pass left these paths dirty; deal with \
         each one (commit it or ignore it):\n{}",
        remaining
            .iter()
            .map(|f| format!("- {f}"))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

// ---------------------------------------------------------------------------
// Orchestrator prompts
// ---------------------------------------------------------------------------

/// Task-list rework prompt.
pub fn orchestrator_prompt(trigger: &str, context: &str) -> String {
    let context = if context.is_empty() { "none" } else { context };
    format!(
        "You are the task planner. The task list needs to be reworked.\n\n\
         ## Trigger\n{trigger}\n\n\
         ## Extra context\n{context}\n\n\
         ## What to do\n\
         1. Read CLAUDE.md for the project goals.\n\
         2. Read tasks.json for the current plan.\n\
         3. Run `git log --oneline -10` and `git diff` to see recent progress.\n\
         4. Rework the plan from a whole-project view, then edit tasks.json in place.\n\n\
         ## Task format\n\
         ```json\n\
         {{\"id\": \"2.1\", \"description\": \"...\", \"steps\": [\"...\"], \"status\": \"pending\"}}\n\
         ```\n\
         Ids are dot-separated path codes executed in depth-first order: 1, 1.1, 1.2, 2.\n\n\
         ## Rules\n\
         - failed tasks must be resolved; none may stay failed\n\
         - completed tasks are frozen; never edit them\n\
         - ids stay unique\n\
         - keep tasks small (ten to fifteen minutes each); split or merge as needed\n\
         - use the notes field to carry context between tasks\n\
         - if the trigger mentions a validation failure: check `git status` for the \
         leftover files; do not re-run the original task. If the work itself landed, mark \
         the task completed and add a small task for the leftovers (usually .gitignore).\n\n\
         When the edit is complete, output {token}.",
        token = ORCHESTRATION_DONE,
    )
}

/// Appended when a previous orchestration attempt did not emit the done token.
pub fn orchestrator_retry_hint() -> String {
    format!(
        "\n\nThe previous attempt did not finish: the output never contained \
         {token}. Complete the edit and output {token}.",
        token = ORCHESTRATION_DONE,
    )
}

/// Self-review prompt run after the orchestration edit.
pub fn orchestrator_review_prompt() -> String {
    format!(
        "Review the task-list edit you just made.\n\n\
         1. Run `git diff tasks.json` to see the change.\n\
         2. Check that:\n\
         - the JSON parses\n\
         - ids are unique path codes (\"1\", \"1.2\", \"2.1.3\")\n\
         - task granularity is sane (ten to fifteen minutes each)\n\
         - notes carry useful context\n\
         - no task is left in the failed state\n\n\
         Fix anything wrong. If everything checks out, output {token}.",
        token = REVIEW_PASSED,
    )
}

// ---------------------------------------------------------------------------
// Planning / bootstrap prompts (CLI flows)
// ---------------------------------------------------------------------------

/// Create an initial tasks.json from a free-form request.
pub fn tasks_creation_prompt(user_request: &str) -> String {
    format!(
        "You are the task planner. Create the initial task list for this project.\n\n\
         ## Request\n{user_request}\n\n\
         ## What to do\n\
         1. Explore the current directory to understand the project.\n\
         2. Read any files the request points at.\n\
         3. Write tasks.json.\n\n\
         ## tasks.json rules\n\
         - one task = one agent session, ten to fifteen minutes of work\n\
         - ids are dot-separated path codes executed depth-first: 1, 1.1, 1.2, 2, 2.1\n\
         - steps are advisory; the worker may adapt\n\
         - format:\n\
         ```json\n\
         [{{\"id\": \"1\", \"description\": \"...\", \"steps\": [\"...\"]}}]\n\
         ```\n\n\
         Write the file, then output {token}.",
        token = TASKS_CREATED,
    )
}

/// Modify an existing tasks.json from a free-form request.
pub fn task_modification_prompt(user_request: &str) -> String {
    format!(
        "Modify the tasks.json task list to satisfy this request.\n\n\
         ## Request\n{user_request}\n\n\
         ## What to do\n\
         1. Read tasks.json.\n\
         2. Run `git log --oneline -10` for recent progress.\n\
         3. Add, remove, or edit tasks as needed, directly in tasks.json.\n\n\
         ## Rules\n\
         - ids are dot-separated path codes, unique, executed depth-first\n\
         - only pending, in_progress, and failed tasks may be edited or removed\n\
         - completed tasks are frozen\n\n\
         When done, output {token}.",
        token = TASKS_MODIFIED,
    )
}

/// Continue a planning session with user feedback.
pub fn tasks_revision_prompt(feedback: &str) -> String {
    format!(
        "The user reviewed the task list and has feedback. Revise tasks.json accordingly.\n\n\
         ## Feedback\n{feedback}\n\n\
         Keep ids as unique path codes. When done, output {token}.",
        token = TASKS_MODIFIED,
    )
}

/// Fold a user suggestion into the project's CLAUDE.md instructions.
pub fn learn_prompt(suggestion: &str) -> String {
    format!(
        "The user wants this suggestion captured in CLAUDE.md.\n\n\
         ## Suggestion\n{suggestion}\n\n\
         ## What to do\n\
         1. Read the current CLAUDE.md (create it if missing).\n\
         2. Explore the codebase enough to phrase the guidance in project terms.\n\
         3. Add a concise instruction; skip it if the point is already covered.\n\n\
         When done, output {token}.",
        token = LEARNED,
    )
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// Format a duration as `HH:MM:SS`.
pub fn format_hms(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskId};

    fn task_with_notes(notes: Option<&str>) -> Task {
        let mut task = Task::new(TaskId::new("1.2"), "wire the parser");
        task.steps = vec!["read the grammar".to_string()];
        task.notes = notes.map(str::to_string);
        task
    }

    #[test]
    fn worker_prompt_includes_steps_and_tokens() {
        let prompt = worker_task_prompt(&task_with_notes(None));
        assert!(prompt.contains("wire the parser"));
        assert!(prompt.contains("- read the grammar"));
        assert!(prompt.contains(TASK_COMPLETED));
        assert!(prompt.contains(TASK_BLOCKED_PREFIX));
        assert!(!prompt.contains("Previous attempt"));
    }

    #[test]
    fn worker_prompt_carries_notes() {
        let task = task_with_notes(Some("left off in module x"));
        let prompt = worker_task_prompt(&task);
        assert!(prompt.contains("## Previous attempt"));
        assert!(prompt.contains("left off in module x"));
    }

    #[test]
    fn worker_prompt_handles_empty_steps() {
        let mut task = task_with_notes(None);
        task.steps.clear();
        let prompt = worker_task_prompt(&task);
        assert!(prompt.contains("no fixed steps"));
    }

    #[test]
    fn cleanup_prompt_is_fenced() {
        let prompt = cleanup_prompt("supervisor requested rework");
        assert!(prompt.contains(HANDOVER_START));
        assert!(prompt.contains(HANDOVER_END));
        assert!(prompt.contains("supervisor requested rework"));
    }

    #[test]
    fn format_hms_rolls_over_hours() {
        assert_eq!(format_hms(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_hms(Duration::from_secs(61)), "00:01:01");
        assert_eq!(format_hms(Duration::from_secs(3 * 3600 + 42 * 60 + 5)), "03:42:05");
    }

    #[test]
    fn supervisor_prompt_names_the_log_file() {
        let prompt = supervisor_prompt("do the thing", Duration::from_secs(90), "/tmp/w.log");
        assert!(prompt.contains("/tmp/w.log"));
        assert!(prompt.contains("00:01:30"));
        assert!(prompt.contains("\"decision\""));
    }
}
