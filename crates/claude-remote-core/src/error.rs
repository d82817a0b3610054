//! Error types, from the transport up to the registry boundary.

use thiserror::Error;

/// Transport-level failure of a backing process
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The pseudo-terminal could not be opened
    #[error("failed to create PTY: {0}")]
    CreateFailed(String),

    /// The backing process could not be spawned
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    /// An operation was attempted before `start` succeeded
    #[error("process has not been started")]
    NotStarted,

    /// A tmux session with this name already exists and attaching is disabled
    #[error("tmux session already exists: {0}")]
    AlreadyExists(String),

    /// The name cannot be used as a tmux target
    #[error("invalid session name: {0}")]
    InvalidName(String),

    /// A tmux command failed
    #[error("tmux command failed: {0}")]
    Tmux(#[from] anyhow::Error),

    /// Reading from or writing to the process failed
    #[error("PTY I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of an operation on a single session
#[derive(Debug, Error)]
pub enum SessionError {
    /// The backing process is gone
    #[error("session {id} is not active")]
    NotActive { id: String },

    /// The transport failed mid-operation
    #[error("I/O failure in session {id}: {source}")]
    Io {
        id: String,
        #[source]
        source: ProcessError,
    },
}

/// Typed outcome of a registry operation.
///
/// `SessionNotFound` and `ProcessNotActive` are deliberately distinct so a
/// caller can decide between "try a different id" and "recreate the session".
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The backing process or session could not be created
    #[error("failed to start session {id}: {reason}")]
    StartFailure { id: String, reason: String },

    /// No session with this id is registered
    #[error("session not found: {id}")]
    SessionNotFound { id: String },

    /// The session is registered but its process is gone
    #[error("session {id} is not active")]
    ProcessNotActive { id: String },

    /// A send/capture/terminate call failed at the transport level
    #[error("I/O failure in session {id}: {message}")]
    Io { id: String, message: String },

    /// The process could not be confirmed dead; the entry was retained
    #[error("session {id} could not be confirmed terminated")]
    PartialTermination { id: String },

    /// The request itself was malformed
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

impl From<SessionError> for SupervisorError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotActive { id } => SupervisorError::ProcessNotActive { id },
            SessionError::Io { id, source } => SupervisorError::Io {
                id,
                message: source.to_string(),
            },
        }
    }
}
