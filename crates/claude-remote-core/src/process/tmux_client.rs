use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::process::{Command, Output};

/// Regex pattern for validating tmux session names
static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("Invalid NAME_PATTERN regex"));

/// Validate a session name to prevent command injection and target ambiguity.
/// Only ASCII alphanumerics, `_` and `-` are allowed.
pub fn validate_name(name: &str) -> Result<()> {
    if !NAME_PATTERN.is_match(name) {
        anyhow::bail!("Invalid tmux session name: {}", name);
    }
    Ok(())
}

/// Exact-match target for a session
fn session_target(name: &str) -> String {
    format!("={}", name)
}

/// Exact-match target for the active pane of a session
fn pane_target(name: &str) -> String {
    format!("={}:", name)
}

/// Arguments for sending `text` verbatim. `--` ends option parsing so text
/// starting with `-` is not taken for a flag.
fn literal_keys_args<'a>(target: &'a str, text: &'a str) -> [&'a str; 6] {
    ["send-keys", "-t", target, "-l", "--", text]
}

/// Client for the tmux command line
#[derive(Debug, Clone)]
pub struct TmuxClient {
    /// Number of lines to capture from pane
    capture_lines: u32,
}

impl TmuxClient {
    /// Creates a new TmuxClient with default settings
    pub fn new() -> Self {
        Self { capture_lines: 200 }
    }

    /// Creates a new TmuxClient with custom capture lines
    pub fn with_capture_lines(capture_lines: u32) -> Self {
        Self { capture_lines }
    }

    pub fn capture_lines(&self) -> u32 {
        self.capture_lines
    }

    /// Run tmux and fail on a non-zero exit status
    fn run(&self, args: &[&str], what: &str) -> Result<Output> {
        let output = Command::new("tmux")
            .args(args)
            .output()
            .with_context(|| format!("Failed to execute tmux {}", what))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("tmux {} failed: {}", what, stderr.trim());
        }

        Ok(output)
    }

    /// Lists all session names. No running server means no sessions.
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        let output = Command::new("tmux")
            .args(["list-sessions", "-F", "#{session_name}"])
            .output()
            .context("Failed to execute tmux list-sessions")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("no server running") || stderr.contains("error connecting") {
                return Ok(Vec::new());
            }
            anyhow::bail!("tmux list-sessions failed: {}", stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().map(|s| s.to_string()).collect())
    }

    /// Whether a session with exactly this name exists
    pub fn has_session(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        let status = Command::new("tmux")
            .args(["has-session", "-t", &session_target(name)])
            .output()
            .context("Failed to execute tmux has-session")?
            .status;
        Ok(status.success())
    }

    /// Create a detached session running `command` in `cwd`
    pub fn create_session(
        &self,
        name: &str,
        cwd: &Path,
        command: &str,
        args: &[String],
    ) -> Result<()> {
        validate_name(name)?;
        let cwd = cwd.to_string_lossy().into_owned();
        let mut argv: Vec<&str> = vec!["new-session", "-d", "-s", name, "-c", cwd.as_str(), command];
        argv.extend(args.iter().map(String::as_str));
        self.run(&argv, "new-session")?;
        Ok(())
    }

    /// Sends a key name (e.g. `Enter`, `C-c`) to the session's active pane
    pub fn send_keys(&self, name: &str, keys: &str) -> Result<()> {
        validate_name(name)?;
        self.run(&["send-keys", "-t", &pane_target(name), keys], "send-keys")?;
        Ok(())
    }

    /// Sends literal text (with -l flag) to the session's active pane
    pub fn send_keys_literal(&self, name: &str, text: &str) -> Result<()> {
        validate_name(name)?;
        let target = pane_target(name);
        self.run(&literal_keys_args(&target, text), "send-keys")?;
        Ok(())
    }

    /// Captures the visible pane plus scrollback without ANSI codes
    pub fn capture_pane_plain(&self, name: &str) -> Result<String> {
        validate_name(name)?;
        let start_line = format!("-{}", self.capture_lines);
        let output = self.run(
            &["capture-pane", "-p", "-t", &pane_target(name), "-S", &start_line],
            "capture-pane",
        )?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// PID of the process running in the session's active pane
    pub fn pane_pid(&self, name: &str) -> Result<Option<u32>> {
        validate_name(name)?;
        let output = self.run(
            &["display-message", "-p", "-t", &pane_target(name), "#{pane_pid}"],
            "display-message",
        )?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.trim().parse().ok())
    }

    /// Kill a session
    pub fn kill_session(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        self.run(
            &["kill-session", "-t", &session_target(name)],
            "kill-session",
        )?;
        Ok(())
    }
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new()
    }
}
