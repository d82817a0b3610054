//! Agent process living in a named tmux session.
//!
//! Output is read by capturing the pane and diffing it against the previous
//! capture, so lines already handed out are not returned again.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::time::{Duration, Instant};

use super::tmux_client::{validate_name, TmuxClient};
use super::{OutputWindow, ProcessHandle};
use crate::config::{BackendKind, ExistingSessionPolicy, SessionSettings};
use crate::error::ProcessError;

/// Interval between pane captures while waiting on output
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct TmuxProcess {
    name: String,
    client: TmuxClient,
    command: String,
    args: Vec<String>,
    on_existing: ExistingSessionPolicy,
    /// Only attach; never create the session
    attach_only: bool,
    startup_window: Duration,
    settle: Duration,
    started: bool,
    /// Pane lines as of the last collection
    seen: Vec<String>,
    /// Capture hash when the last line was written
    write_mark: Option<u64>,
    pid: Option<u32>,
}

impl TmuxProcess {
    /// Handle that creates the tmux session `name` on start
    pub fn new(name: String, client: TmuxClient, settings: &SessionSettings) -> Self {
        Self {
            name,
            client,
            command: settings.command.clone(),
            args: settings.args.clone(),
            on_existing: settings.tmux.on_existing,
            attach_only: false,
            startup_window: settings.startup_window(),
            settle: settings.settle(),
            started: false,
            seen: Vec::new(),
            write_mark: None,
            pid: None,
        }
    }

    /// Handle for an existing tmux session `name`
    pub fn attached(name: String, client: TmuxClient, settings: &SessionSettings) -> Self {
        Self {
            attach_only: true,
            ..Self::new(name, client, settings)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn ensure_started(&self) -> Result<(), ProcessError> {
        if self.started {
            Ok(())
        } else {
            Err(ProcessError::NotStarted)
        }
    }

    fn exists(&self) -> bool {
        self.client.has_session(&self.name).unwrap_or(false)
    }

    fn capture(&self) -> Result<Vec<String>, ProcessError> {
        let content = self.client.capture_pane_plain(&self.name)?;
        Ok(trimmed_lines(&content))
    }
}

#[async_trait]
impl ProcessHandle for TmuxProcess {
    fn kind(&self) -> BackendKind {
        BackendKind::Tmux
    }

    async fn start(&mut self, working_dir: &Path) -> Result<(), ProcessError> {
        validate_name(&self.name).map_err(|_| ProcessError::InvalidName(self.name.clone()))?;

        let exists = self.client.has_session(&self.name)?;
        if self.attach_only {
            if !exists {
                return Err(ProcessError::SpawnFailed(format!(
                    "tmux session {} does not exist",
                    self.name
                )));
            }
            tracing::debug!(tmux_session = %self.name, "Attaching to tmux session");
        } else if exists {
            match self.on_existing {
                ExistingSessionPolicy::Error => {
                    return Err(ProcessError::AlreadyExists(self.name.clone()));
                }
                ExistingSessionPolicy::Attach => {
                    tracing::info!(tmux_session = %self.name, "Attaching to existing tmux session");
                }
            }
        } else {
            self.client
                .create_session(&self.name, working_dir, &self.command, &self.args)
                .map_err(|e| ProcessError::CreateFailed(e.to_string()))?;
            tracing::debug!(
                tmux_session = %self.name,
                command = %self.command,
                "Created tmux session"
            );
            tokio::time::sleep(self.startup_window).await;
        }

        if !self.exists() {
            return Err(ProcessError::SpawnFailed(format!(
                "tmux session {} exited during startup",
                self.name
            )));
        }

        self.pid = self.client.pane_pid(&self.name).ok().flatten();
        self.started = true;
        Ok(())
    }

    async fn write_line(&mut self, text: &str) -> Result<(), ProcessError> {
        self.ensure_started()?;
        let mark = capture_hash(&self.capture()?);
        self.client.send_keys_literal(&self.name, text)?;
        self.client.send_keys(&self.name, "Enter")?;
        self.write_mark = Some(mark);
        Ok(())
    }

    async fn collect_output(&mut self, window: Duration) -> Result<String, ProcessError> {
        self.ensure_started()?;
        let mark = self.write_mark.take();
        let started = Instant::now();
        let mut latest = self.capture()?;
        let mark = mark.unwrap_or_else(|| capture_hash(&latest));
        let mut stable_since = Instant::now();

        while started.elapsed() < window {
            tokio::time::sleep(POLL_INTERVAL).await;
            let current = self.capture()?;
            if current != latest {
                latest = current;
                stable_since = Instant::now();
            }
            if capture_hash(&latest) != mark && stable_since.elapsed() >= self.settle {
                break;
            }
        }

        let fresh = new_lines(&self.seen, &latest).join("\n");
        self.seen = latest;
        Ok(fresh)
    }

    async fn recent_output(&mut self, max_lines: usize) -> Result<OutputWindow, ProcessError> {
        self.ensure_started()?;
        let lines = self.capture()?;
        let start = lines.len().saturating_sub(max_lines);
        Ok(OutputWindow {
            text: lines[start..].join("\n"),
            generation: capture_hash(&lines),
        })
    }

    fn is_alive(&mut self) -> bool {
        self.started && self.exists()
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn terminate(&mut self, grace: Duration) -> Result<bool, ProcessError> {
        if !self.started || !self.exists() {
            return Ok(true);
        }

        if let Err(e) = self.client.send_keys(&self.name, "C-c") {
            tracing::debug!(tmux_session = %self.name, "Interrupt failed: {}", e);
        }
        tokio::time::sleep(grace).await;
        if !self.exists() {
            return Ok(true);
        }

        if let Err(e) = self.client.kill_session(&self.name) {
            tracing::warn!(tmux_session = %self.name, "kill-session failed: {}", e);
        }
        Ok(!self.exists())
    }
}

/// Pane content as lines, without trailing blank lines
fn trimmed_lines(content: &str) -> Vec<String> {
    let mut lines: Vec<String> = content.lines().map(|l| l.trim_end().to_string()).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

fn capture_hash(lines: &[String]) -> u64 {
    let mut hasher = DefaultHasher::new();
    lines.hash(&mut hasher);
    hasher.finish()
}

/// Lines of `current` that were not part of `previous`.
///
/// Scrolling is handled by finding the longest suffix of `previous` that
/// is a prefix of `current`. Without such an overlap the common prefix is
/// skipped instead.
fn new_lines<'a>(previous: &[String], current: &'a [String]) -> &'a [String] {
    let max = previous.len().min(current.len());
    for k in (1..=max).rev() {
        if previous[previous.len() - k..] == current[..k] {
            return &current[k..];
        }
    }
    let common = previous
        .iter()
        .zip(current)
        .take_while(|(a, b)| a == b)
        .count();
    &current[common..]
}
