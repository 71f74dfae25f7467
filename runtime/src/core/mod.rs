//! Deterministic, pure logic shared by the runtime core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod boulder;
pub mod config_issues;
pub mod context_budget;
pub mod notifications;
pub mod startup;
pub mod types;
