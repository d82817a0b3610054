//! A single supervised session.
//!
//! [`Session`] ties a backing process to its activity log and metadata and
//! performs every log side effect. It is not synchronized itself; the
//! registry keeps each session behind its own async mutex so at most one
//! operation is in flight per session.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendKind, SessionSettings};
use crate::detector::PromptDetector;
use crate::error::{ProcessError, SessionError};
use crate::log_buffer::{DisplayMode, LogBuffer, LogRole};
use crate::process::{memory_usage_mb, ProcessHandle};

/// Lines of recent output handed to the prompt detector
const PEEK_LINES: usize = 10;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Starting,
    Active,
    Terminated,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Terminated => "terminated",
        }
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub status: SessionState,
    pub created_at: DateTime<Local>,
    pub last_activity: DateTime<Local>,
    pub working_dir: PathBuf,
    pub log_lines: usize,
    pub backend: BackendKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(rename = "memory_usage", skip_serializing_if = "Option::is_none")]
    pub memory_usage_mb: Option<f64>,
}

/// Result of a successful send
#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub status: &'static str,
    pub immediate_response: String,
    pub timestamp: DateTime<Local>,
}

pub struct Session {
    id: String,
    working_dir: PathBuf,
    created_at: DateTime<Local>,
    last_activity: DateTime<Local>,
    state: SessionState,
    log: LogBuffer,
    process: Box<dyn ProcessHandle>,
    detector: Arc<PromptDetector>,
    capture_window: Duration,
    terminate_grace: Duration,
    /// Output generation when a line was last written
    ack_generation: Option<u64>,
    /// Prompt that was showing when a line was last written
    answered_prompt: Option<String>,
    /// Output generation whose prompt is already in the log
    logged_prompt_generation: Option<u64>,
}

impl Session {
    pub fn new(
        id: String,
        working_dir: PathBuf,
        process: Box<dyn ProcessHandle>,
        detector: Arc<PromptDetector>,
        settings: &SessionSettings,
    ) -> Self {
        let now = Local::now();
        Self {
            id,
            working_dir,
            created_at: now,
            last_activity: now,
            state: SessionState::Starting,
            log: LogBuffer::new(settings.max_log_lines),
            process,
            detector,
            capture_window: settings.capture_window(),
            terminate_grace: settings.terminate_grace(),
            ack_generation: None,
            answered_prompt: None,
            logged_prompt_generation: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    pub fn last_activity(&self) -> DateTime<Local> {
        self.last_activity
    }

    /// Start the backing process and wait for it to come up.
    ///
    /// A failed start leaves the session terminated.
    pub async fn start(&mut self) -> Result<(), ProcessError> {
        tracing::info!(
            session_id = %self.id,
            working_dir = %self.working_dir.display(),
            backend = self.process.kind().as_str(),
            "Starting session"
        );
        match self.process.start(&self.working_dir).await {
            Ok(()) => {
                self.state = SessionState::Active;
                self.log.append(LogRole::Session, "Starting up...");
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Terminated;
                Err(e)
            }
        }
    }

    /// Log whatever the process printed while initializing
    pub async fn complete_startup(&mut self) {
        if self.state != SessionState::Active {
            return;
        }
        match self.process.collect_output(Duration::ZERO).await {
            Ok(text) => {
                for line in non_blank_lines(&text) {
                    self.log.append(LogRole::Startup, line);
                }
                self.log.append(LogRole::Session, "Ready for commands");
                tracing::info!(session_id = %self.id, "Session ready");
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, "Startup output unavailable: {}", e);
                self.log
                    .append(LogRole::Session, "Initialization completed with warnings");
                self.is_alive();
            }
        }
    }

    /// Write one line and capture the immediate response
    pub async fn send_line(&mut self, text: &str) -> Result<SendOutcome, SessionError> {
        self.ensure_active()?;
        self.mark_acknowledged().await;

        if let Err(e) = self.process.write_line(text).await {
            return Err(self.io_failure(e));
        }
        self.log.append(LogRole::User, text);
        self.last_activity = Local::now();
        tracing::debug!(session_id = %self.id, "Sent line");

        let response = match self.process.collect_output(self.capture_window).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(session_id = %self.id, "Failed to collect response: {}", e);
                self.is_alive();
                String::new()
            }
        };

        let lines = non_blank_lines(&response);
        for line in &lines {
            self.log.append(LogRole::Session, *line);
        }

        Ok(SendOutcome {
            status: "sent",
            immediate_response: lines.join("\n"),
            timestamp: Local::now(),
        })
    }

    /// Last `max_lines` log lines, rendered for `mode`
    pub fn capture_recent_output(&self, max_lines: usize, mode: DisplayMode) -> Vec<String> {
        self.log.tail_with_mode(max_lines, mode)
    }

    /// Probe the backing process; a dead process terminates the session
    pub fn is_alive(&mut self) -> bool {
        if self.state == SessionState::Terminated {
            return false;
        }
        let alive = self.process.is_alive();
        if !alive && self.state == SessionState::Active {
            tracing::info!(session_id = %self.id, "Backing process is gone");
            self.state = SessionState::Terminated;
        }
        alive
    }

    /// Stop the backing process. Returns whether it is confirmed gone.
    pub async fn terminate(&mut self) -> bool {
        tracing::info!(session_id = %self.id, "Terminating session");
        match self.process.terminate(self.terminate_grace).await {
            Ok(true) => {
                self.state = SessionState::Terminated;
                true
            }
            Ok(false) => {
                tracing::warn!(session_id = %self.id, "Process survived termination");
                false
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, "Termination failed: {}", e);
                false
            }
        }
    }

    /// Peek at recent output for an unanswered prompt.
    ///
    /// Nothing is consumed. A detected prompt is logged once per output
    /// generation.
    pub async fn check_for_prompt(&mut self) -> Result<Option<String>, SessionError> {
        if !self.is_alive() {
            return Ok(None);
        }
        let window = match self.process.recent_output(PEEK_LINES).await {
            Ok(window) => window,
            Err(e) => return Err(self.io_failure(e)),
        };

        let Some(prompt) = self.detector.detect(&window.text) else {
            self.answered_prompt = None;
            return Ok(None);
        };

        if self.ack_generation == Some(window.generation) {
            return Ok(None);
        }
        // Still the answered prompt, possibly with the echoed answer
        let answered = self
            .answered_prompt
            .as_deref()
            .is_some_and(|a| prompt.starts_with(a));
        if answered {
            return Ok(None);
        }
        self.answered_prompt = None;

        if self.logged_prompt_generation != Some(window.generation) {
            self.log.append(LogRole::Prompt, prompt.as_str());
            self.logged_prompt_generation = Some(window.generation);
            tracing::debug!(session_id = %self.id, prompt = %prompt, "Prompt detected");
        }
        Ok(Some(prompt))
    }

    /// Answer a prompt with one line
    pub async fn respond_to_prompt(&mut self, response: &str) -> Result<(), SessionError> {
        self.ensure_active()?;
        self.mark_acknowledged().await;

        if let Err(e) = self.process.write_line(response).await {
            return Err(self.io_failure(e));
        }
        self.log.append(LogRole::PromptResponse, response);
        self.last_activity = Local::now();
        tracing::debug!(session_id = %self.id, "Sent prompt response");
        Ok(())
    }

    /// Snapshot for status queries; probes liveness first
    pub fn status(&mut self) -> SessionStatus {
        let alive = self.is_alive();
        let pid = if alive { self.process.pid() } else { None };
        SessionStatus {
            session_id: self.id.clone(),
            status: self.state,
            created_at: self.created_at,
            last_activity: self.last_activity,
            working_dir: self.working_dir.clone(),
            log_lines: self.log.len(),
            backend: self.process.kind(),
            pid,
            memory_usage_mb: pid.and_then(memory_usage_mb),
        }
    }

    fn ensure_active(&mut self) -> Result<(), SessionError> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(SessionError::NotActive {
                id: self.id.clone(),
            })
        }
    }

    /// Treat whatever is on screen now as seen by the caller
    async fn mark_acknowledged(&mut self) {
        if let Ok(window) = self.process.recent_output(PEEK_LINES).await {
            self.answered_prompt = self.detector.detect(&window.text);
            self.ack_generation = Some(window.generation);
        }
    }

    /// Classify a transport failure after re-probing liveness
    fn io_failure(&mut self, source: ProcessError) -> SessionError {
        tracing::warn!(session_id = %self.id, "I/O failure: {}", source);
        if self.is_alive() {
            SessionError::Io {
                id: self.id.clone(),
                source,
            }
        } else {
            SessionError::NotActive {
                id: self.id.clone(),
            }
        }
    }
}

fn non_blank_lines(text: &str) -> Vec<&str> {
    text.lines()
        .map(|line| line.trim_end_matches('\r').trim_end())
        .filter(|line| !line.trim().is_empty())
        .collect()
}
