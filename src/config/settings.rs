use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use claude_remote_core::{BackendKind, SessionSettings};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Supervisor for remote-controlled interactive agent sessions"
)]
pub struct Config {
    /// Enable debug mode
    #[arg(short, long)]
    pub debug: bool,

    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "SUPERVISOR_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "SUPERVISOR_PORT")]
    pub port: Option<u16>,

    /// Session backend (pty or tmux)
    #[arg(short, long)]
    pub backend: Option<BackendKind>,

    /// Agent command to launch in new sessions
    #[arg(long)]
    pub command: Option<String>,

    /// Working directory for sessions created without one
    #[arg(short, long, env = "DEFAULT_WORKING_DIR")]
    pub working_dir: Option<PathBuf>,

    /// Log lines kept per session
    #[arg(long, env = "MAX_LOG_LINES")]
    pub max_log_lines: Option<usize>,

    /// Adopt existing tmux sessions at startup
    #[arg(long)]
    pub discover: bool,
}

impl Config {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Application settings (from config file)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Session settings
    #[serde(default)]
    pub session: SessionSettings,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Listen address
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds between background health sweeps (0 disables them)
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_health_interval() -> u64 {
    30
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            health_interval_secs: default_health_interval(),
        }
    }
}

impl Settings {
    /// Load settings from config file or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        // Try custom path first
        if let Some(p) = path {
            if p.exists() {
                return Self::from_file(p);
            }
            tracing::warn!("Config file not found: {:?}", p);
        }

        // Try default config locations
        let default_paths = [
            dirs::config_dir().map(|p| p.join("claude-remote/config.toml")),
            dirs::home_dir().map(|p| p.join(".config/claude-remote/config.toml")),
            dirs::home_dir().map(|p| p.join(".claude-remote.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::from_file(path);
            }
        }

        // Return defaults if no config file found
        Ok(Self::default())
    }

    fn from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Merge CLI config into settings (CLI takes precedence)
    pub fn merge_cli(&mut self, cli: &Config) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(backend) = cli.backend {
            self.session.backend = backend;
        }
        if let Some(command) = &cli.command {
            self.session.command = command.clone();
        }
        if let Some(dir) = &cli.working_dir {
            self.session.default_working_dir = Some(dir.clone());
        }
        if let Some(max_log_lines) = cli.max_log_lines {
            self.session.max_log_lines = max_log_lines;
        }
        if cli.discover {
            self.session.tmux.discover_on_start = true;
        }
    }

    /// Validate and normalize settings values
    pub fn validate(&mut self) {
        self.session.validate();
        if let Some(dir) = self.session.default_working_dir.take() {
            self.session.default_working_dir = Some(expand_home(dir));
        }
    }
}

/// Expand a leading `~` to the home directory
fn expand_home(path: PathBuf) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path;
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path,
    }
}
