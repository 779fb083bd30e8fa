//! I/O adapters behind the orchestration engine.

pub mod atomic;
pub mod config;
pub mod init;
pub mod iteration_log;
pub mod journal;
pub mod local_sandbox;
pub mod model;
pub mod process;
pub mod prompt;
pub mod run_state;
pub mod sandbox;
pub mod store;
