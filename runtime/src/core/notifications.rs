//! Bounded in-memory log of background task events.
//!
//! The agent loop drains recent events after each step and injects them into
//! the conversation as system notices. Each task id is reported at most once
//! until the sink is cleared.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskEventKind {
    Completed,
    Error,
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskEvent {
    pub task_id: String,
    pub kind: TaskEventKind,
    pub agent: Option<String>,
    pub description: Option<String>,
    /// Result text, error message or staleness note.
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl TaskEvent {
    /// System notice injected into the conversation.
    pub fn render(&self) -> String {
        let label = match self.kind {
            TaskEventKind::Completed => "COMPLETED",
            TaskEventKind::Error => "FAILED",
            TaskEventKind::Stale => "STALE",
        };
        format!(
            "[Background Task {label}] Agent \"{}\" - {}\nResult: {}",
            self.agent.as_deref().unwrap_or("unknown"),
            self.description.as_deref().unwrap_or(&self.task_id),
            self.detail.as_deref().unwrap_or("(no details)"),
        )
    }
}

#[derive(Debug, Clone)]
pub struct TaskNotificationSink {
    capacity: usize,
    events: VecDeque<TaskEvent>,
    reported: HashSet<String>,
}

impl TaskNotificationSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: VecDeque::new(),
            reported: HashSet::new(),
        }
    }

    /// Record an event. Returns false when the task was already reported.
    pub fn push(&mut self, event: TaskEvent) -> bool {
        if !self.reported.insert(event.task_id.clone()) {
            return false;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
        true
    }

    /// Up to `n` events, newest first.
    pub fn recent(&self, n: usize) -> Vec<&TaskEvent> {
        self.events.iter().rev().take(n).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.reported.clear();
    }
}

/// Snapshot of a background sub-agent task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundTask {
    pub task_id: String,
    pub agent: Option<String>,
    pub description: Option<String>,
    pub running: bool,
    pub last_activity: DateTime<Utc>,
}

/// Stale events for running tasks idle longer than `stale_after`.
pub fn stale_events(
    tasks: &[BackgroundTask],
    now: DateTime<Utc>,
    stale_after: Duration,
) -> Vec<TaskEvent> {
    let Ok(threshold) = chrono::Duration::from_std(stale_after) else {
        return Vec::new();
    };
    tasks
        .iter()
        .filter(|task| task.running && now - task.last_activity > threshold)
        .map(|task| TaskEvent {
            task_id: task.task_id.clone(),
            kind: TaskEventKind::Stale,
            agent: task.agent.clone(),
            description: task.description.clone(),
            detail: Some(format!("no activity for {}s", stale_after.as_secs())),
            at: now,
        })
        .collect()
}
