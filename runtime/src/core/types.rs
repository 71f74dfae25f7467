//! Shared deterministic types for runtime core logic.
//!
//! These types define stable contracts between the agent loop and the core
//! components. They do not depend on external state or I/O.

use serde::{Deserialize, Serialize};

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Message body: plain text or structured content blocks.
///
/// Serialized untagged so it matches the `{role, content}` shape used by the
/// model layer, where `content` is either a string or an array of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<serde_json::Value>),
}

/// One entry of the chronological conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }
}

/// Risk classification attached to a native tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Moderate,
    Dangerous,
}

/// The user's disposition toward one tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsentDecision {
    AcceptOnce,
    AcceptAlways,
    Decline,
}

impl ConsentDecision {
    /// True when the tool call may execute.
    pub fn is_approved(self) -> bool {
        !matches!(self, ConsentDecision::Decline)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConsentDecision::AcceptOnce => "accept-once",
            ConsentDecision::AcceptAlways => "accept-always",
            ConsentDecision::Decline => "decline",
        }
    }
}

/// Payload sent to the front-end when a tool call needs approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRequest {
    pub request_id: String,
    pub tool_name: String,
    pub risk_level: RiskLevel,
    pub input_preview: Option<String>,
    pub chat_id: i64,
}

/// Persisted "always allow" decision. At most one record exists per tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRecord {
    pub tool_name: String,
    pub consent: ConsentDecision,
}

/// Lifecycle status of a todo item tracked for a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TodoStatus {
    /// Completed and cancelled todos never become active again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TodoStatus::Completed | TodoStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TodoPriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    pub status: TodoStatus,
    pub priority: TodoPriority,
}
