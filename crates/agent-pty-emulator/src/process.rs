//! Process seam between sessions and the child they drive.
//!
//! Sessions never talk to portable-pty directly. They ask a
//! [`ProcessSpawner`] for a [`SpawnedProcess`]: a shared [`ProcessIo`] handle
//! for input and lifecycle, plus a single-consumer queue of [`ProcessEvent`]s
//! carrying output and the exit signal.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use agent_pty_core::{Dimensions, Result};

/// Event produced by a running child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// Raw bytes read from the terminal
    Output(Vec<u8>),
    /// The child exited (or its terminal closed)
    Exited {
        /// Exit code, when the platform reports one
        code: Option<u32>,
    },
}

/// Input and lifecycle control over a spawned child.
///
/// Implementations must tolerate concurrent calls; the session layer
/// serializes writes but may call `kill` or `is_alive` at any time.
pub trait ProcessIo: Send + Sync + std::fmt::Debug {
    /// Write bytes to the child's terminal input.
    fn write(&self, data: &[u8]) -> Result<usize>;

    /// Forcibly terminate the child.
    fn kill(&self) -> Result<()>;

    /// Whether the child is still running.
    fn is_alive(&self) -> bool;

    /// OS process id, if known.
    fn process_id(&self) -> Option<u32>;
}

/// Everything needed to start one child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Executable name or path
    pub program: String,
    /// Command-line arguments
    pub args: Vec<String>,
    /// Terminal size
    pub dimensions: Dimensions,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl SpawnRequest {
    /// Request to run `program` with no arguments.
    pub fn new(program: impl Into<String>, dimensions: Dimensions) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dimensions,
            cwd: None,
            env: Vec::new(),
        }
    }

    /// Set the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// A started child: control handle plus its output queue.
#[derive(Debug)]
pub struct SpawnedProcess {
    /// Shared control handle
    pub io: Arc<dyn ProcessIo>,
    /// Output and exit events; the only consumer is the owning session
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
}

/// Factory for child processes.
pub trait ProcessSpawner: Send + Sync {
    /// Start a child as described by `request`.
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedProcess>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_request_builder() {
        let request = SpawnRequest::new("claude", Dimensions::new(30, 100))
            .with_cwd("/srv/repo")
            .with_env("TERM", "xterm-256color");

        assert_eq!(request.program, "claude");
        assert!(request.args.is_empty());
        assert_eq!(request.cwd, Some(PathBuf::from("/srv/repo")));
        assert_eq!(
            request.env,
            vec![("TERM".to_string(), "xterm-256color".to_string())]
        );
    }
}
