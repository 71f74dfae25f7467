//! Accumulator for configuration validation issues.
//!
//! Validation passes push issues here instead of failing fast, so callers see
//! every problem at once and decide whether warnings should block.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

/// One validation finding, addressed by a dotted path (`start.max_attempts`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigIssue {
    pub path: String,
    pub message: String,
    pub severity: Severity,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.path, self.message)
    }
}

/// Append-only collection of issues, ordered by insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigErrorReporter {
    issues: Vec<ConfigIssue>,
}

impl ConfigErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, issue: ConfigIssue) {
        self.issues.push(issue);
    }

    pub fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.push(ConfigIssue {
            path: path.into(),
            message: message.into(),
            severity: Severity::Error,
        });
    }

    pub fn warning(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.push(ConfigIssue {
            path: path.into(),
            message: message.into(),
            severity: Severity::Warning,
        });
    }

    /// Merge another report, keeping its order after ours.
    pub fn extend(&mut self, other: ConfigErrorReporter) {
        self.issues.extend(other.issues);
    }

    pub fn issues(&self) -> &[ConfigIssue] {
        &self.issues
    }

    pub fn errors(&self) -> impl Iterator<Item = &ConfigIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ConfigIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn has_warnings(&self) -> bool {
        self.warnings().next().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn clear(&mut self) {
        self.issues.clear();
    }

    /// One line per issue, in insertion order. Empty report renders as "".
    pub fn format(&self) -> String {
        self.issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
