use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which kind of backing process new sessions get
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Spawn the agent directly under a pseudo-terminal
    #[default]
    Pty,
    /// Run the agent inside a named tmux session
    Tmux,
}

impl BackendKind {
    /// Short name used in status output
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Pty => "pty",
            BackendKind::Tmux => "tmux",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pty" => Ok(BackendKind::Pty),
            "tmux" => Ok(BackendKind::Tmux),
            other => Err(format!("unknown backend: {other} (expected pty or tmux)")),
        }
    }
}

/// What to do when a tmux session with the requested name already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistingSessionPolicy {
    /// Fail the start
    #[default]
    Error,
    /// Attach to the existing session
    Attach,
}

/// Session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Backend for newly created sessions
    #[serde(default)]
    pub backend: BackendKind,

    /// Agent command to launch
    #[serde(default = "default_command")]
    pub command: String,

    /// Extra arguments for the agent command
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory used when a create request names none
    #[serde(default)]
    pub default_working_dir: Option<PathBuf>,

    /// Log buffer capacity per session
    #[serde(default = "default_max_log_lines")]
    pub max_log_lines: usize,

    /// How long `start` waits before confirming liveness
    #[serde(default = "default_startup_window")]
    pub startup_window_ms: u64,

    /// Delay before startup output is collected in the background
    #[serde(default = "default_init_window")]
    pub init_window_ms: u64,

    /// Upper bound of the read-after-write capture
    #[serde(default = "default_capture_window")]
    pub capture_window_ms: u64,

    /// Quiet period that ends a capture early
    #[serde(default = "default_settle")]
    pub settle_ms: u64,

    /// Upper bound of a single prompt check
    #[serde(default = "default_prompt_check_timeout")]
    pub prompt_check_timeout_ms: u64,

    /// Grace period between termination escalation steps
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace_ms: u64,

    /// Additional prompt regexes, matched case-insensitively after the built-in ones
    #[serde(default)]
    pub extra_prompt_patterns: Vec<String>,

    /// tmux backend settings
    #[serde(default)]
    pub tmux: TmuxSettings,
}

fn default_command() -> String {
    "claude".to_string()
}

fn default_max_log_lines() -> usize {
    1000
}

fn default_startup_window() -> u64 {
    500
}

fn default_init_window() -> u64 {
    5000
}

fn default_capture_window() -> u64 {
    2000
}

fn default_settle() -> u64 {
    300
}

fn default_prompt_check_timeout() -> u64 {
    200
}

fn default_terminate_grace() -> u64 {
    1000
}

/// tmux backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmuxSettings {
    /// Prefix of tmux session names owned by the supervisor
    #[serde(default = "default_tmux_prefix")]
    pub prefix: String,

    /// Behaviour when the session name is already taken
    #[serde(default)]
    pub on_existing: ExistingSessionPolicy,

    /// Adopt existing prefixed sessions at startup
    #[serde(default)]
    pub discover_on_start: bool,

    /// Number of scrollback lines to capture from a pane
    #[serde(default = "default_capture_lines")]
    pub capture_lines: u32,
}

fn default_tmux_prefix() -> String {
    "claude-".to_string()
}

fn default_capture_lines() -> u32 {
    200
}

impl Default for TmuxSettings {
    fn default() -> Self {
        Self {
            prefix: default_tmux_prefix(),
            on_existing: ExistingSessionPolicy::default(),
            discover_on_start: false,
            capture_lines: default_capture_lines(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            command: default_command(),
            args: Vec::new(),
            default_working_dir: None,
            max_log_lines: default_max_log_lines(),
            startup_window_ms: default_startup_window(),
            init_window_ms: default_init_window(),
            capture_window_ms: default_capture_window(),
            settle_ms: default_settle(),
            prompt_check_timeout_ms: default_prompt_check_timeout(),
            terminate_grace_ms: default_terminate_grace(),
            extra_prompt_patterns: Vec::new(),
            tmux: TmuxSettings::default(),
        }
    }
}

impl SessionSettings {
    pub fn startup_window(&self) -> Duration {
        Duration::from_millis(self.startup_window_ms)
    }

    pub fn init_window(&self) -> Duration {
        Duration::from_millis(self.init_window_ms)
    }

    pub fn capture_window(&self) -> Duration {
        Duration::from_millis(self.capture_window_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn prompt_check_timeout(&self) -> Duration {
        Duration::from_millis(self.prompt_check_timeout_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    /// Clamp values that would break bounded-wait guarantees.
    ///
    /// The capture window stays within 100 ms..=10 s and the prompt check
    /// within 10 ms..=1 s; the log buffer keeps at least two lines.
    pub fn validate(&mut self) {
        self.max_log_lines = self.max_log_lines.max(2);
        self.capture_window_ms = self.capture_window_ms.clamp(100, 10_000);
        self.settle_ms = self.settle_ms.clamp(10, self.capture_window_ms);
        self.prompt_check_timeout_ms = self.prompt_check_timeout_ms.clamp(10, 1000);
        self.startup_window_ms = self.startup_window_ms.min(10_000);
        self.terminate_grace_ms = self.terminate_grace_ms.min(10_000);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_session_settings() {
        let settings = SessionSettings::default();
        assert_eq!(settings.backend, BackendKind::Pty);
        assert_eq!(settings.command, "claude");
        assert_eq!(settings.max_log_lines, 1000);
        assert_eq!(settings.capture_window(), Duration::from_secs(2));
        assert_eq!(settings.prompt_check_timeout(), Duration::from_millis(200));
        assert_eq!(settings.tmux.prefix, "claude-");
        assert_eq!(settings.tmux.on_existing, ExistingSessionPolicy::Error);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            backend = "tmux"
            command = "python3"
            args = ["mock-agent.py"]
            max_log_lines = 200

            [tmux]
            on_existing = "attach"
        "#;

        let settings: SessionSettings = toml::from_str(toml).expect("Should parse TOML");
        assert_eq!(settings.backend, BackendKind::Tmux);
        assert_eq!(settings.args, vec!["mock-agent.py"]);
        assert_eq!(settings.max_log_lines, 200);
        assert_eq!(settings.tmux.on_existing, ExistingSessionPolicy::Attach);
        assert_eq!(settings.capture_window_ms, 2000);
    }

    #[test]
    fn test_validate_clamps_timings() {
        let mut settings = SessionSettings {
            max_log_lines: 0,
            capture_window_ms: 60_000,
            prompt_check_timeout_ms: 0,
            ..Default::default()
        };
        settings.validate();
        assert_eq!(settings.max_log_lines, 2);
        assert_eq!(settings.capture_window_ms, 10_000);
        assert_eq!(settings.prompt_check_timeout_ms, 10);
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("PTY".parse::<BackendKind>(), Ok(BackendKind::Pty));
        assert_eq!("tmux".parse::<BackendKind>(), Ok(BackendKind::Tmux));
        assert!("screen".parse::<BackendKind>().is_err());
    }
}
