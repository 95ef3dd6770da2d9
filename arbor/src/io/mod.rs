//! I/O helpers for arbor commands.

pub mod command;
pub mod config;
pub mod iteration_log;
pub mod parse;
pub mod process;
pub mod prompt;
pub mod session_store;
