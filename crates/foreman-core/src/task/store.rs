//! The persistent task store: a single `tasks.json` document.
//!
//! Reads take a snapshot of the whole document; every mutation rewrites the
//! file before returning, so the on-disk list always reflects the last
//! transition. [`TaskStore::reload`] re-reads the file after an external
//! editor (the orchestrator agent) has rewritten it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_json::Value;
use thiserror::Error;

use super::{Task, TaskId, TaskStatus};

/// Structural problems in a task-list document.
///
/// Used both when loading and as the orchestrator's mechanical validation,
/// so the two paths cannot drift apart.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("task list must be a JSON array, or an object with a \"tasks\" array")]
    NotAnArray,
    #[error("task at index {index} is missing a string id or description")]
    MissingField { index: usize },
    #[error("duplicate task id: {id}")]
    DuplicateId { id: String },
}

/// Counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

/// In-memory view of `tasks.json` plus the typed transition API.
#[derive(Debug)]
pub struct TaskStore {
    path: PathBuf,
    tasks: Vec<Task>,
}

impl TaskStore {
    /// Load the store from `path`. A missing file is an empty list.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tasks = if path.exists() {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read task list at {}", path.display()))?;
            parse_document(&bytes)
                .with_context(|| format!("failed to parse task list at {}", path.display()))?
        } else {
            Vec::new()
        };
        Ok(Self { path, tasks })
    }

    /// Re-read the file, discarding the in-memory view.
    ///
    /// Call after the orchestrator agent has rewritten the document.
    pub fn reload(&mut self) -> Result<()> {
        let reloaded = Self::load(self.path.clone())?;
        self.tasks = reloaded.tasks;
        Ok(())
    }

    /// Rewrite the whole document.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create task list directory {}", parent.display())
                })?;
            }
        }
        let mut bytes = serde_json::to_vec_pretty(&self.tasks)?;
        bytes.push(b'\n');
        std::fs::write(&self.path, bytes)
            .with_context(|| format!("failed to write task list at {}", self.path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    /// The next task to execute: the least id among `pending` and
    /// `in_progress` tasks. Failed tasks are the orchestrator's problem.
    pub fn next(&self) -> Option<Task> {
        self.tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::InProgress))
            .min_by(|a, b| a.id.cmp(&b.id))
            .cloned()
    }

    pub fn stats(&self) -> TaskStats {
        let mut stats = TaskStats {
            total: self.tasks.len(),
            ..TaskStats::default()
        };
        for task in &self.tasks {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    pub fn failed(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| t.status == TaskStatus::Failed)
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    /// One line per failed task, for the orchestrator's context block.
    pub fn failed_summary(&self) -> String {
        let mut lines = vec!["Failed tasks:".to_string()];
        for task in self.failed() {
            lines.push(format!(
                "- [{}] {}: {}",
                task.id,
                task.description,
                task.error_message.as_deref().unwrap_or("unknown error"),
            ));
        }
        lines.join("\n")
    }

    // -- transitions --------------------------------------------------------

    pub fn mark_in_progress(&mut self, id: &TaskId, session_id: Option<&str>) -> Result<()> {
        let task = self.get_mut(id)?;
        task.status = TaskStatus::InProgress;
        task.session_id = session_id.map(str::to_string);
        self.save()
    }

    /// Mark completed and clear the handover fields.
    pub fn mark_completed(&mut self, id: &TaskId) -> Result<()> {
        let task = self.get_mut(id)?;
        task.status = TaskStatus::Completed;
        task.error_message = None;
        task.notes = None;
        self.save()
    }

    pub fn mark_failed(&mut self, id: &TaskId, error_message: &str) -> Result<()> {
        let task = self.get_mut(id)?;
        task.status = TaskStatus::Failed;
        task.error_message = Some(error_message.to_string());
        self.save()
    }

    pub fn update_notes(&mut self, id: &TaskId, notes: &str) -> Result<()> {
        let task = self.get_mut(id)?;
        task.notes = Some(notes.to_string());
        self.save()
    }

    pub fn clear_notes(&mut self, id: &TaskId) -> Result<()> {
        let task = self.get_mut(id)?;
        task.notes = None;
        self.save()
    }

    /// Record the agent session that last touched the task.
    pub fn set_session(&mut self, id: &TaskId, session_id: Option<&str>) -> Result<()> {
        let task = self.get_mut(id)?;
        task.session_id = session_id.map(str::to_string);
        self.save()
    }

    /// Reset one task to `pending`, dropping its error, session, and notes.
    pub fn reset(&mut self, id: &TaskId) -> Result<()> {
        let task = self.get_mut(id)?;
        task.status = TaskStatus::Pending;
        task.session_id = None;
        task.error_message = None;
        task.notes = None;
        self.save()
    }

    /// Reset every task to `pending`.
    pub fn reset_all(&mut self) -> Result<()> {
        for task in &mut self.tasks {
            task.status = TaskStatus::Pending;
            task.session_id = None;
            task.error_message = None;
            task.notes = None;
        }
        self.save()
    }

    fn get_mut(&mut self, id: &TaskId) -> Result<&mut Task> {
        match self.tasks.iter_mut().find(|t| &t.id == id) {
            Some(task) => Ok(task),
            None => bail!("task not found: {id}"),
        }
    }
}

/// Parse a task-list document.
///
/// Accepts both legal forms: a top-level array, or `{"tasks": [...]}`.
/// Enforces the structural invariants the rest of the engine assumes:
/// every entry has a non-empty string `id` and a string `description`,
/// and ids are unique.
pub fn parse_document(bytes: &[u8]) -> Result<Vec<Task>, DocumentError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("tasks") {
            Some(Value::Array(items)) => items,
            _ => return Err(DocumentError::NotAnArray),
        },
        _ => return Err(DocumentError::NotAnArray),
    };

    let mut tasks = Vec::with_capacity(items.len());
    let mut seen: HashSet<TaskId> = HashSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let id_ok = item
            .get("id")
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty());
        let description_ok = item.get("description").and_then(Value::as_str).is_some();
        if !id_ok || !description_ok {
            return Err(DocumentError::MissingField { index });
        }
        let task: Task = serde_json::from_value(item)?;
        if !seen.insert(task.id.clone()) {
            return Err(DocumentError::DuplicateId {
                id: task.id.as_str().to_string(),
            });
        }
        tasks.push(task);
    }
    Ok(tasks)
}

/// Mechanical validation of an on-disk document, as run after an
/// orchestration edit.
pub fn validate_file(path: &Path) -> Result<(), DocumentError> {
    let bytes = std::fs::read(path).map_err(|e| {
        DocumentError::Json(serde_json::Error::io(e))
    })?;
    parse_document(&bytes).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with(tasks_json: &str) -> (TempDir, TaskStore) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, tasks_json).unwrap();
        let store = TaskStore::load(&path).unwrap();
        (dir, store)
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::load(dir.path().join("tasks.json")).unwrap();
        assert!(store.tasks().is_empty());
        assert!(store.next().is_none());
    }

    #[test]
    fn accepts_both_document_forms() {
        let (_dir, store) = store_with(r#"[{"id": "1", "description": "a"}]"#);
        assert_eq!(store.tasks().len(), 1);

        let (_dir, store) =
            store_with(r#"{"tasks": [{"id": "1", "description": "a"}], "version": 2}"#);
        assert_eq!(store.tasks().len(), 1);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let bytes = br#"[{"id": "1", "description": "a"}, {"id": "1", "description": "b"}]"#;
        let err = parse_document(bytes).unwrap_err();
        assert!(matches!(err, DocumentError::DuplicateId { .. }));
    }

    #[test]
    fn rejects_missing_required_fields() {
        let err = parse_document(br#"[{"id": "1"}]"#).unwrap_err();
        assert!(matches!(err, DocumentError::MissingField { index: 0 }));

        let err = parse_document(br#"[{"description": "no id"}]"#).unwrap_err();
        assert!(matches!(err, DocumentError::MissingField { index: 0 }));
    }

    #[test]
    fn rejects_non_array_documents() {
        let err = parse_document(br#""just a string""#).unwrap_err();
        assert!(matches!(err, DocumentError::NotAnArray));
        let err = parse_document(br#"{"items": []}"#).unwrap_err();
        assert!(matches!(err, DocumentError::NotAnArray));
    }

    #[test]
    fn save_load_round_trip() {
        let (_dir, mut store) = store_with(
            r#"[{"id": "1", "description": "a", "steps": ["x"], "notes": "carry this"}]"#,
        );
        store.save().unwrap();
        let before = store.tasks().to_vec();
        store.reload().unwrap();
        assert_eq!(store.tasks(), before.as_slice());
    }

    #[test]
    fn next_walks_ids_in_tree_order_and_skips_terminal_states() {
        let (_dir, store) = store_with(
            r#"[
                {"id": "2", "description": "later"},
                {"id": "1", "description": "done", "status": "completed"},
                {"id": "1.2", "description": "resume me", "status": "in_progress"},
                {"id": "1.3", "description": "broken", "status": "failed"}
            ]"#,
        );
        assert_eq!(store.next().unwrap().id, TaskId::new("1.2"));
    }

    #[test]
    fn transitions_persist_to_disk() {
        let (_dir, mut store) = store_with(r#"[{"id": "1", "description": "a"}]"#);
        let id = TaskId::new("1");

        store.mark_in_progress(&id, Some("worker-42")).unwrap();
        store.reload().unwrap();
        assert_eq!(store.get(&id).unwrap().status, TaskStatus::InProgress);
        assert_eq!(store.get(&id).unwrap().session_id.as_deref(), Some("worker-42"));

        store.mark_failed(&id, "exploded").unwrap();
        store.update_notes(&id, "was halfway through").unwrap();
        store.reload().unwrap();
        assert_eq!(store.get(&id).unwrap().status, TaskStatus::Failed);
        assert_eq!(store.get(&id).unwrap().notes.as_deref(), Some("was halfway through"));
    }

    #[test]
    fn completion_clears_handover_fields() {
        let (_dir, mut store) = store_with(
            r#"[{"id": "1", "description": "a", "status": "in_progress",
                 "notes": "stale", "error_message": "old"}]"#,
        );
        let id = TaskId::new("1");
        store.mark_completed(&id).unwrap();
        store.reload().unwrap();
        let task = store.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.notes.is_none());
        assert!(task.error_message.is_none());
    }

    #[test]
    fn reset_is_idempotent() {
        let (_dir, mut store) = store_with(
            r#"[{"id": "1", "description": "a", "status": "failed", "error_message": "x"}]"#,
        );
        let id = TaskId::new("1");
        store.reset(&id).unwrap();
        let once = store.tasks().to_vec();
        store.reset(&id).unwrap();
        assert_eq!(store.tasks(), once.as_slice());
        assert_eq!(store.get(&id).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn transition_on_unknown_id_is_an_error() {
        let (_dir, mut store) = store_with(r#"[{"id": "1", "description": "a"}]"#);
        assert!(store.mark_completed(&TaskId::new("9")).is_err());
    }

    #[test]
    fn notes_longer_than_any_display_width_round_trip_byte_exact() {
        let (_dir, mut store) = store_with(r#"[{"id": "1", "description": "a"}]"#);
        let id = TaskId::new("1");
        let notes = "## Progress\n".to_string() + &"very long handover line\n".repeat(200);
        store.update_notes(&id, &notes).unwrap();
        store.reload().unwrap();
        assert_eq!(store.get(&id).unwrap().notes.as_deref(), Some(notes.as_str()));
    }
}
