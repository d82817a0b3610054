//! Backing processes of sessions.
//!
//! A [`ProcessHandle`] owns exactly one interactive process, either spawned
//! directly under a pseudo-terminal ([`PtyProcess`]) or living in a named tmux
//! session ([`TmuxProcess`]). Both expose the same line-oriented transport.

#[cfg(any(test, feature = "test-util"))]
pub mod mock;
mod output;
mod proc_info;
mod pty;
mod tmux;
mod tmux_client;

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::config::{BackendKind, SessionSettings};
use crate::error::ProcessError;

pub use output::OutputBuffer;
pub use proc_info::memory_usage_mb;
pub use pty::PtyProcess;
pub use tmux::TmuxProcess;
pub use tmux_client::TmuxClient;

/// Snapshot of the most recent output of a process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputWindow {
    /// The last lines of output, newline separated
    pub text: String,
    /// Changes whenever new output arrives
    pub generation: u64,
}

/// Transport to one backing interactive process
#[async_trait]
pub trait ProcessHandle: Send {
    /// Which backend this handle belongs to
    fn kind(&self) -> BackendKind;

    /// Spawn (or attach to) the process rooted at `working_dir`.
    ///
    /// Waits at most the configured startup window and fails if the process
    /// is not alive afterwards.
    async fn start(&mut self, working_dir: &Path) -> Result<(), ProcessError>;

    /// Write `text` followed by a line terminator
    async fn write_line(&mut self, text: &str) -> Result<(), ProcessError>;

    /// Wait up to `window` for output and take everything not yet collected.
    ///
    /// Returns early once output has been quiet for the settle interval.
    /// An empty string is a normal result.
    async fn collect_output(&mut self, window: Duration) -> Result<String, ProcessError>;

    /// Peek at the last `max_lines` of output without consuming anything
    async fn recent_output(&mut self, max_lines: usize) -> Result<OutputWindow, ProcessError>;

    /// Non-blocking liveness probe
    fn is_alive(&mut self) -> bool;

    /// OS process id, if known
    fn pid(&self) -> Option<u32>;

    /// Interrupt, then escalate to forced termination after `grace`.
    ///
    /// Returns whether the process is confirmed gone. Terminating a dead or
    /// never-started process succeeds.
    async fn terminate(&mut self, grace: Duration) -> Result<bool, ProcessError>;
}

/// Creates unstarted process handles for new sessions
pub trait Spawner: Send + Sync {
    /// A fresh handle for the session `id`
    fn spawn(&self, id: &str) -> Box<dyn ProcessHandle>;

    /// A handle attached to the existing external session `id`.
    ///
    /// Only backends with externally named sessions support this.
    fn attach(&self, id: &str) -> Option<Box<dyn ProcessHandle>> {
        let _ = id;
        None
    }

    /// Ids of existing external sessions that could be attached
    fn discover(&self) -> Result<Vec<String>, ProcessError> {
        Ok(Vec::new())
    }
}

/// Spawner that builds handles for the configured backend
pub struct DefaultSpawner {
    settings: SessionSettings,
    tmux: TmuxClient,
}

impl DefaultSpawner {
    pub fn new(settings: SessionSettings) -> Self {
        let tmux = TmuxClient::with_capture_lines(settings.tmux.capture_lines);
        Self { settings, tmux }
    }

    fn tmux_name(&self, id: &str) -> String {
        format!("{}{}", self.settings.tmux.prefix, id)
    }
}

impl Spawner for DefaultSpawner {
    fn spawn(&self, id: &str) -> Box<dyn ProcessHandle> {
        match self.settings.backend {
            BackendKind::Pty => Box::new(PtyProcess::new(id, &self.settings)),
            BackendKind::Tmux => Box::new(TmuxProcess::new(
                self.tmux_name(id),
                self.tmux.clone(),
                &self.settings,
            )),
        }
    }

    fn attach(&self, id: &str) -> Option<Box<dyn ProcessHandle>> {
        match self.settings.backend {
            BackendKind::Pty => None,
            BackendKind::Tmux => Some(Box::new(TmuxProcess::attached(
                self.tmux_name(id),
                self.tmux.clone(),
                &self.settings,
            ))),
        }
    }

    fn discover(&self) -> Result<Vec<String>, ProcessError> {
        if self.settings.backend != BackendKind::Tmux {
            return Ok(Vec::new());
        }
        let prefix = &self.settings.tmux.prefix;
        let names = self.tmux.list_sessions()?;
        Ok(names
            .iter()
            .filter_map(|name| name.strip_prefix(prefix.as_str()))
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect())
    }
}
