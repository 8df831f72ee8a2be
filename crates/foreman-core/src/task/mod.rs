//! The task tree: ids, statuses, and the task record itself.
//!
//! Tasks are persisted as a flat JSON array but form a tree through their
//! ids: `"2.1.3"` is a child of `"2.1"`. Execution order is the depth-first
//! pre-order implied by comparing ids segment by segment, numerically.

pub mod store;

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use store::{DocumentError, TaskStats, TaskStore};

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

/// A dot-separated path code identifying a task, e.g. `"2.1.3"`.
///
/// Ordering compares segment by segment; segments that parse as integers
/// compare numerically (so `"2.10"` sorts after `"2.9"`), anything else
/// falls back to string comparison. A shorter id that is a prefix of a
/// longer one sorts first, which makes the natural sort order exactly the
/// depth-first pre-order of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The parent id, or `None` for a root task.
    pub fn parent(&self) -> Option<TaskId> {
        self.0.rsplit_once('.').map(|(head, _)| TaskId(head.to_string()))
    }

    fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl Ord for TaskId {
    fn cmp(&self, other: &Self) -> Ordering {
        let mut ours = self.segments();
        let mut theirs = other.segments();
        loop {
            match (ours.next(), theirs.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(a), Some(b)) => {
                    let ord = match (a.parse::<u64>(), b.parse::<u64>()) {
                        (Ok(m), Ok(n)) => m.cmp(&n),
                        _ => a.cmp(b),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
            }
        }
    }
}

impl PartialOrd for TaskId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a task.
///
/// ```text
/// pending -> in_progress -> completed
///                        -> failed -> pending   (orchestrator or explicit reset)
/// ```
///
/// `completed` is terminal for automation: the engine never reopens a
/// completed task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// One node of the task tree.
///
/// `steps` is advisory only; the worker may adapt. `notes` carries handover
/// context across failures and interruptions and is cleared on successful
/// completion. Unknown JSON fields are ignored on read and not written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            steps: Vec::new(),
            status: TaskStatus::Pending,
            session_id: None,
            error_message: None,
            notes: None,
        }
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}
