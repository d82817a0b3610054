//! Core library for claude-remote.
//!
//! Owns a set of long-lived interactive terminal sessions (each backed by a
//! PTY-spawned process or a tmux session), serializes access to each one,
//! keeps a bounded replayable log of their output and detects when a session
//! is blocked on an interactive prompt.

pub mod config;
pub mod detector;
pub mod error;
pub mod log_buffer;
pub mod namegen;
pub mod process;
pub mod registry;
pub mod scanner;
pub mod session;

pub use config::{BackendKind, ExistingSessionPolicy, SessionSettings, TmuxSettings};
pub use detector::PromptDetector;
pub use error::{ProcessError, SessionError, SupervisorError};
pub use log_buffer::{DisplayMode, LogBuffer, LogRole};
pub use process::{DefaultSpawner, ProcessHandle, Spawner};
pub use registry::{HealthReport, SessionRegistry, SharedSession, ShutdownReport};
pub use scanner::{PendingPrompt, PromptScanner};
pub use session::{SendOutcome, Session, SessionState, SessionStatus};
