//! "Run in progress" state derived from a chat's persisted todos.
//!
//! Survives restarts because it is recomputed from the todo store. Failures
//! are logged and reported as "no state"; they never reach the agent loop.

use chrono::SecondsFormat;
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::boulder::BoulderProgress;
use crate::io::todo_store::TodoStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoulderData {
    pub progress: BoulderProgress,
    pub is_active: bool,
    /// Creation time of the chat's earliest todo (RFC 3339).
    pub started_at: String,
}

pub struct BoulderState {
    todos: TodoStore,
}

impl BoulderState {
    pub fn new(todos: TodoStore) -> Self {
        Self { todos }
    }

    /// Aggregate state for `chat_id`, or `None` when the chat has no todos.
    pub fn load(&self, chat_id: i64) -> Option<BoulderData> {
        let rows = match self.todos.rows_for_chat(chat_id) {
            Ok(rows) => rows,
            Err(err) => {
                warn!(chat_id, err = %format!("{err:#}"), "failed to load boulder state");
                return None;
            }
        };
        let started_at = rows.iter().map(|row| row.created_at).min()?;
        let items: Vec<_> = rows.iter().map(|row| row.item()).collect();
        let progress = BoulderProgress::from_todos(&items);
        debug!(
            chat_id,
            completed = progress.completed,
            total = progress.total,
            "boulder state loaded"
        );
        Some(BoulderData {
            progress,
            is_active: progress.is_active(),
            started_at: started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        })
    }

    /// Whether a multi-step run is in progress for `chat_id`.
    pub fn is_active(&self, chat_id: i64) -> bool {
        self.load(chat_id).is_some_and(|data| data.is_active)
    }

    /// Drop every todo of `chat_id`.
    pub fn clear(&self, chat_id: i64) {
        if let Err(err) = self.todos.clear_chat(chat_id) {
            warn!(chat_id, err = %format!("{err:#}"), "failed to clear boulder state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{TodoItem, TodoPriority, TodoStatus};
    use std::fs;

    fn todo(status: TodoStatus) -> TodoItem {
        TodoItem {
            content: "step".to_string(),
            status,
            priority: TodoPriority::Low,
        }
    }

    #[test]
    fn no_todos_means_no_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let boulder = BoulderState::new(TodoStore::at_root(temp.path()));
        assert_eq!(boulder.load(1), None);
        assert!(!boulder.is_active(1));
    }

    #[test]
    fn pending_todo_keeps_run_active_until_cleared() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = TodoStore::at_root(temp.path());
        store
            .upsert_todos(
                "run-1",
                1,
                &[todo(TodoStatus::Completed), todo(TodoStatus::Pending)],
            )
            .expect("seed");
        let boulder = BoulderState::new(store);

        let data = boulder.load(1).expect("state");
        assert!(data.is_active);
        assert_eq!(data.progress.completed, 1);
        assert_eq!(data.progress.pending, 1);
        assert!(chrono::DateTime::parse_from_rfc3339(&data.started_at).is_ok());

        boulder.clear(1);
        assert_eq!(boulder.load(1), None);
    }

    #[test]
    fn terminal_todos_are_inactive() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = TodoStore::at_root(temp.path());
        store
            .upsert_todos(
                "run-1",
                1,
                &[todo(TodoStatus::Completed), todo(TodoStatus::Cancelled)],
            )
            .expect("seed");
        let boulder = BoulderState::new(store);
        assert!(!boulder.is_active(1));
    }

    #[test]
    fn corrupt_store_yields_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("todos.json");
        fs::write(&path, "{not json").expect("write");
        let boulder = BoulderState::new(TodoStore::new(&path));
        assert_eq!(boulder.load(1), None);
        boulder.clear(1);
    }
}
