//! Todo list storage (`.anyon/state/todos.json`).
//!
//! Todos belong to a run and a chat. Writing a run's todos replaces the whole
//! list for that run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{TodoItem, TodoPriority, TodoStatus};

/// One persisted todo row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoRow {
    pub run_id: String,
    pub chat_id: i64,
    pub content: String,
    pub status: TodoStatus,
    pub priority: TodoPriority,
    pub created_at: DateTime<Utc>,
}

impl TodoRow {
    pub fn item(&self) -> TodoItem {
        TodoItem {
            content: self.content.clone(),
            status: self.status,
            priority: self.priority,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TodoFile {
    todos: Vec<TodoRow>,
}

pub struct TodoStore {
    path: PathBuf,
}

impl TodoStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn at_root(root: &Path) -> Self {
        Self::new(root.join(".anyon").join("state").join("todos.json"))
    }

    /// Replace the todos of `run_id`.
    pub fn upsert_todos(&self, run_id: &str, chat_id: i64, todos: &[TodoItem]) -> Result<()> {
        let mut file = self.read()?;
        file.todos.retain(|row| row.run_id != run_id);
        let now = Utc::now();
        file.todos.extend(todos.iter().map(|todo| TodoRow {
            run_id: run_id.to_string(),
            chat_id,
            content: todo.content.clone(),
            status: todo.status,
            priority: todo.priority,
            created_at: now,
        }));
        debug!(run_id, chat_id, count = todos.len(), "upserted todos");
        self.write(&file)
    }

    pub fn rows_for_chat(&self, chat_id: i64) -> Result<Vec<TodoRow>> {
        Ok(self
            .read()?
            .todos
            .into_iter()
            .filter(|row| row.chat_id == chat_id)
            .collect())
    }

    pub fn todos_for_run(&self, run_id: &str) -> Result<Vec<TodoItem>> {
        Ok(self
            .read()?
            .todos
            .iter()
            .filter(|row| row.run_id == run_id)
            .map(TodoRow::item)
            .collect())
    }

    pub fn todos_for_chat(&self, chat_id: i64) -> Result<Vec<TodoItem>> {
        Ok(self
            .rows_for_chat(chat_id)?
            .iter()
            .map(TodoRow::item)
            .collect())
    }

    /// Pending and in-progress todos of `run_id`.
    pub fn incomplete_todos(&self, run_id: &str) -> Result<Vec<TodoItem>> {
        Ok(self
            .todos_for_run(run_id)?
            .into_iter()
            .filter(|todo| !todo.status.is_terminal())
            .collect())
    }

    pub fn clear_run(&self, run_id: &str) -> Result<()> {
        self.retain(|row| row.run_id != run_id)
    }

    pub fn clear_chat(&self, chat_id: i64) -> Result<()> {
        self.retain(|row| row.chat_id != chat_id)
    }

    fn retain(&self, keep: impl Fn(&TodoRow) -> bool) -> Result<()> {
        let mut file = self.read()?;
        let before = file.todos.len();
        file.todos.retain(|row| keep(row));
        if file.todos.len() == before {
            return Ok(());
        }
        self.write(&file)
    }

    fn read(&self) -> Result<TodoFile> {
        if !self.path.exists() {
            return Ok(TodoFile::default());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read todos {}", self.path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parse todos {}", self.path.display()))
    }

    fn write(&self, file: &TodoFile) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(file)?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("todo store path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp todos {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace todos {}", path.display()))?;
    Ok(())
}
