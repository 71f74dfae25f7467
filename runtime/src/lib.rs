//! Core of the agent runtime: tool consent, context budgeting and agent
//! subprocess startup.
//!
//! The crate keeps the same separation throughout:
//!
//! - **[`core`]**: Pure, deterministic logic (token estimation, truncation,
//!   startup error codes, config issues, todo progress). No I/O.
//! - **[`io`]**: Side-effecting adapters (config file, consent and todo stores,
//!   the consent transport, subprocess launch). Isolated behind traits where
//!   tests need fakes.
//!
//! Orchestration modules ([`consent`], [`start`], [`outbound`]) coordinate core
//! logic with I/O and back the CLI commands.

pub mod consent;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod outbound;
pub mod start;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
