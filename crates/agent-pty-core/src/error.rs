//! Error types for the agent-pty session engine.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{SessionId, SessionState};

/// Main error type for session engine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Owner identifier was empty or missing
    #[error("Owner id must not be empty")]
    InvalidOwner,

    /// The child never printed anything before the handshake deadline
    #[error("Session did not become ready within {0}ms")]
    InitializationTimeout(u64),

    /// The child process exited while the session expected it to be running
    #[error("Process exited unexpectedly: {0}")]
    ProcessExited(String),

    /// Unknown session id or an id owned by someone else
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Session cannot accept input in its current state
    #[error("Session is not ready (state: {0})")]
    SessionNotReady(SessionState),

    /// Input exceeds the configured maximum prompt length
    #[error("Prompt too long: {len} characters (max: {max})")]
    PromptTooLong {
        /// Length of the rejected input in characters
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Session has been disposed
    #[error("Session has been disposed")]
    Disposed,

    /// Pool is full; resolved by eviction before reaching callers
    #[error("Session capacity exceeded (max: {0})")]
    CapacityExceeded(usize),

    /// Caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// PTY-related errors
    #[error("PTY error: {0}")]
    PtyError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input or parameters (generic)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Machine-distinguishable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidOwner => ErrorKind::InvalidOwner,
            Error::InitializationTimeout(_) => ErrorKind::InitializationTimeout,
            Error::ProcessExited(_) => ErrorKind::ProcessExitedUnexpectedly,
            Error::SessionNotFound(_) => ErrorKind::SessionNotFound,
            Error::SessionNotReady(_) => ErrorKind::SessionNotReady,
            Error::PromptTooLong { .. } => ErrorKind::PromptTooLong,
            Error::Disposed => ErrorKind::Disposed,
            Error::CapacityExceeded(_) => ErrorKind::CapacityExceeded,
            Error::Cancelled => ErrorKind::OperationCanceled,
            Error::PtyError(_) | Error::Io(_) => ErrorKind::Process,
            Error::Config(_) => ErrorKind::Config,
            Error::Serialization(_) | Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Other(_) => ErrorKind::Internal,
        }
    }
}

/// Error classification exposed at the engine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Empty or missing owner id
    InvalidOwner,
    /// Handshake produced no output in time
    InitializationTimeout,
    /// Child process is gone
    ProcessExitedUnexpectedly,
    /// Unknown session or ownership mismatch
    SessionNotFound,
    /// Session is still starting or already failed
    SessionNotReady,
    /// Input over the configured length
    PromptTooLong,
    /// Session was disposed
    Disposed,
    /// Pool capacity reached
    CapacityExceeded,
    /// Cancelled by the caller
    OperationCanceled,
    /// PTY or I/O failure
    Process,
    /// Bad configuration
    Config,
    /// Malformed request
    InvalidInput,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Whether a client should be offered a "restart session" action.
    pub fn suggests_restart(self) -> bool {
        matches!(
            self,
            ErrorKind::InitializationTimeout
                | ErrorKind::ProcessExitedUnexpectedly
                | ErrorKind::SessionNotFound
                | ErrorKind::SessionNotReady
                | ErrorKind::Disposed
                | ErrorKind::Process
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_not_found_error() {
        let session_id = SessionId::new();
        let err = Error::SessionNotFound(session_id);
        assert!(err.to_string().starts_with("Session not found:"));
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);
    }

    #[test]
    fn test_prompt_too_long_error() {
        let err = Error::PromptTooLong { len: 12, max: 10 };
        assert_eq!(
            err.to_string(),
            "Prompt too long: 12 characters (max: 10)"
        );
        assert_eq!(err.kind(), ErrorKind::PromptTooLong);
        assert!(!err.kind().suggests_restart());
    }

    #[test]
    fn test_not_ready_error_names_state() {
        let err = Error::SessionNotReady(SessionState::Initializing);
        assert_eq!(err.to_string(), "Session is not ready (state: initializing)");
    }

    #[test]
    fn test_initialization_timeout_error() {
        let err = Error::InitializationTimeout(30000);
        assert_eq!(err.to_string(), "Session did not become ready within 30000ms");
        assert!(err.kind().suggests_restart());
    }

    #[test]
    fn test_process_exit_suggests_restart() {
        let err = Error::ProcessExited("exit code 1".to_string());
        assert_eq!(err.kind(), ErrorKind::ProcessExitedUnexpectedly);
        assert!(err.kind().suggests_restart());
    }

    #[test]
    fn test_cancel_does_not_suggest_restart() {
        assert_eq!(Error::Cancelled.kind(), ErrorKind::OperationCanceled);
        assert!(!ErrorKind::OperationCanceled.suggests_restart());
        assert!(!ErrorKind::InvalidOwner.suggests_restart());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Process);
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::ProcessExitedUnexpectedly).unwrap();
        assert_eq!(json, "\"process_exited_unexpectedly\"");
    }
}
