//! Todo-derived progress for multi-step runs ("boulder" progress).
//!
//! A run is active while any todo is pending or in progress.

use serde::Serialize;

use crate::core::types::{TodoItem, TodoStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BoulderProgress {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub cancelled: usize,
    /// Share of completed + cancelled todos, rounded to the nearest percent.
    pub percent: u32,
}

impl BoulderProgress {
    pub fn from_todos(todos: &[TodoItem]) -> Self {
        let mut progress = BoulderProgress {
            total: todos.len(),
            ..Default::default()
        };
        for todo in todos {
            match todo.status {
                TodoStatus::Completed => progress.completed += 1,
                TodoStatus::Pending => progress.pending += 1,
                TodoStatus::InProgress => progress.in_progress += 1,
                TodoStatus::Cancelled => progress.cancelled += 1,
            }
        }
        if progress.total > 0 {
            let done = (progress.completed + progress.cancelled) as f64;
            progress.percent = (done / progress.total as f64 * 100.0).round() as u32;
        }
        progress
    }

    pub fn remaining(&self) -> usize {
        self.pending + self.in_progress
    }

    pub fn is_active(&self) -> bool {
        self.remaining() > 0
    }

    /// System notice injected at the 25/50/75 percent milestones.
    pub fn milestone_notice(&self) -> Option<String> {
        if self.percent == 0 || self.percent >= 100 || self.percent % 25 != 0 {
            return None;
        }
        Some(format!(
            "[BOULDER PROGRESS] {}% complete - {} of {} tasks done. {} remaining.",
            self.percent,
            self.completed,
            self.total,
            self.remaining()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TodoPriority;

    fn todo(status: TodoStatus) -> TodoItem {
        TodoItem {
            content: format!("{status:?}"),
            status,
            priority: TodoPriority::Medium,
        }
    }

    #[test]
    fn empty_list_is_inactive() {
        let progress = BoulderProgress::from_todos(&[]);
        assert_eq!(progress, BoulderProgress::default());
        assert!(!progress.is_active());
        assert_eq!(progress.milestone_notice(), None);
    }

    #[test]
    fn counts_by_status() {
        let todos = vec![
            todo(TodoStatus::Completed),
            todo(TodoStatus::Cancelled),
            todo(TodoStatus::Pending),
            todo(TodoStatus::InProgress),
        ];
        let progress = BoulderProgress::from_todos(&todos);
        assert_eq!(progress.total, 4);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.cancelled, 1);
        assert_eq!(progress.remaining(), 2);
        assert_eq!(progress.percent, 50);
        assert!(progress.is_active());
        let notice = progress.milestone_notice().expect("50% milestone");
        assert!(notice.starts_with("[BOULDER PROGRESS] 50% complete"));
    }

    #[test]
    fn terminal_only_is_inactive() {
        let todos = vec![todo(TodoStatus::Completed), todo(TodoStatus::Cancelled)];
        let progress = BoulderProgress::from_todos(&todos);
        assert!(!progress.is_active());
        assert_eq!(progress.percent, 100);
        assert_eq!(progress.milestone_notice(), None);
    }

    #[test]
    fn non_milestone_percent_has_no_notice() {
        let todos = vec![
            todo(TodoStatus::Completed),
            todo(TodoStatus::Pending),
            todo(TodoStatus::Pending),
        ];
        let progress = BoulderProgress::from_todos(&todos);
        assert_eq!(progress.percent, 33);
        assert_eq!(progress.milestone_notice(), None);
    }
}
