//! Sandbox provider contract.
//!
//! A sandbox is an ephemeral execution environment owned by one run. The
//! [`SandboxProvider`] creates it once; every later step re-attaches with
//! [`SandboxProvider::connect`] using the stored id, so a restarted run keeps
//! working against the same files and processes.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::io::process::OutputSink;

/// Stored reference to a created sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxHandle {
    pub id: String,
    pub template: String,
}

/// Outcome of a sandbox command. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Describe why the command failed, if it did.
    pub fn failure(&self) -> Option<String> {
        if self.timed_out {
            return Some("command timed out".to_string());
        }
        match self.exit_code {
            Some(0) => None,
            Some(code) => Some(format!("command exited with status {code}")),
            None => Some("command terminated by signal".to_string()),
        }
    }
}

/// An attached sandbox.
///
/// Operations on one session must not run concurrently; the network issues
/// them one at a time.
pub trait SandboxSession {
    fn id(&self) -> &str;

    /// Execute `command` through a shell, streaming lines to `sink`.
    ///
    /// Returns `Err` only when the sandbox itself is unreachable.
    fn run(&self, command: &str, sink: Option<OutputSink>) -> Result<CommandResult>;

    fn write_file(&self, path: &str, content: &str) -> Result<()>;

    fn read_file(&self, path: &str) -> Result<String>;

    /// Public URL for a port exposed by the sandbox.
    fn host_url(&self, port: u16) -> String;
}

/// Creates sandboxes and re-attaches to existing ones.
pub trait SandboxProvider: Send + Sync {
    fn create(&self, template: &str) -> Result<SandboxHandle>;

    /// Attach to an existing sandbox. Must not create or modify anything.
    fn connect(&self, id: &str) -> Result<Box<dyn SandboxSession>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit_code: Option<i32>, timed_out: bool) -> CommandResult {
        CommandResult {
            stdout: String::new(),
            stderr: String::new(),
            exit_code,
            timed_out,
        }
    }

    #[test]
    fn failure_describes_exit_status() {
        assert_eq!(result(Some(0), false).failure(), None);
        assert!(result(Some(0), false).success());
        assert_eq!(
            result(Some(2), false).failure().as_deref(),
            Some("command exited with status 2")
        );
        assert_eq!(
            result(None, true).failure().as_deref(),
            Some("command timed out")
        );
    }
}
