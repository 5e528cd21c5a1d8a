//! I/O helpers: configuration, the persisted state file, child processes.

pub mod config;
pub mod process;
pub mod state_store;
