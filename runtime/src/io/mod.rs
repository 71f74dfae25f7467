//! I/O adapters for the agent runtime.

pub mod boulder_state;
pub mod config;
pub mod consent_store;
pub mod consent_transport;
pub mod process;
pub mod todo_store;
