//! End-to-end tests against a real tmux server.
//!
//! Each test owns a unique session-name prefix and kills whatever it left
//! behind. Tests return early when `tmux` is not installed.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use claude_remote_core::process::{TmuxClient, TmuxProcess};
use claude_remote_core::{
    BackendKind, DefaultSpawner, DisplayMode, ExistingSessionPolicy, ProcessError,
    ProcessHandle, PromptScanner, SessionRegistry, SessionSettings, SupervisorError,
};

fn tmux_available() -> bool {
    Command::new("tmux")
        .arg("-V")
        .output()
        .is_ok_and(|o| o.status.success())
}

/// Kills every tmux session carrying the prefix when dropped
struct Cleanup {
    prefix: String,
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        let client = TmuxClient::new();
        for name in client.list_sessions().unwrap_or_default() {
            if name.starts_with(&self.prefix) {
                let _ = client.kill_session(&name);
            }
        }
    }
}

fn settings(tag: &str, command: &str, args: &[&str]) -> (SessionSettings, Cleanup) {
    let prefix = format!("crt{}-{}-", std::process::id(), tag);
    let mut settings = SessionSettings {
        backend: BackendKind::Tmux,
        command: command.to_string(),
        args: args.iter().map(|s| s.to_string()).collect(),
        startup_window_ms: 300,
        init_window_ms: 0,
        capture_window_ms: 2000,
        settle_ms: 200,
        terminate_grace_ms: 300,
        ..Default::default()
    };
    settings.tmux.prefix = prefix.clone();
    (settings, Cleanup { prefix })
}

fn registry(settings: SessionSettings) -> SessionRegistry {
    let spawner = Arc::new(DefaultSpawner::new(settings.clone()));
    SessionRegistry::new(settings, spawner).expect("registry")
}

fn start_external(name: &str, dir: &Path, command: &str) {
    TmuxClient::new()
        .create_session(name, dir, command, &[])
        .expect("external tmux session");
    std::thread::sleep(Duration::from_millis(300));
}

#[tokio::test]
async fn test_tmux_session_end_to_end() {
    if !tmux_available() {
        return;
    }
    let (settings, _cleanup) = settings("e2e", "cat", &[]);
    let prefix = settings.tmux.prefix.clone();
    let registry = registry(settings);
    let dir = tempfile::tempdir().unwrap();

    let id = registry.create(Some("demo"), Some(dir.path())).await.unwrap();
    assert!(TmuxClient::new()
        .has_session(&format!("{}{}", prefix, id))
        .unwrap());

    let outcome = registry.send_message(&id, "echo hi").await.unwrap();
    assert!(
        outcome.immediate_response.contains("echo hi"),
        "response was {:?}",
        outcome.immediate_response
    );

    // Text that looks like a tmux flag is sent verbatim
    let outcome = registry.send_message(&id, "-y").await.unwrap();
    assert!(
        outcome.immediate_response.contains("-y"),
        "response was {:?}",
        outcome.immediate_response
    );
    registry.respond_to_prompt(&id, "--help").await.unwrap();

    let logs = registry.get_logs(&id, 50, DisplayMode::Full).await.unwrap();
    assert!(logs.iter().any(|l| l.contains("USER: -y")));
    assert!(logs.iter().any(|l| l.contains("PROMPT_RESPONSE: --help")));

    registry.terminate(&id).await.unwrap();
    assert!(registry.is_empty());
    assert!(!TmuxClient::new()
        .has_session(&format!("{}{}", prefix, id))
        .unwrap());
}

#[tokio::test]
async fn test_tmux_prompt_detected_and_answered() {
    if !tmux_available() {
        return;
    }
    let script = r#"printf 'Continue? [y/n] '; read answer; echo "answer=$answer"; sleep 30"#;
    let (settings, _cleanup) = settings("prompt", "sh", &["-c", script]);
    let registry = registry(settings);
    let dir = tempfile::tempdir().unwrap();
    let id = registry.create(None, Some(dir.path())).await.unwrap();

    let scanner = PromptScanner::new(Duration::from_millis(500));
    let prompts = scanner.scan_all(&registry).await;
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].session_id, id);
    assert_eq!(prompts[0].prompt_text, "Continue? [y/n]");

    registry.respond_to_prompt(&id, "y").await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(scanner.scan_all(&registry).await.is_empty());

    registry.terminate(&id).await.unwrap();
}

#[tokio::test]
async fn test_tmux_existing_session_error_or_attach() {
    if !tmux_available() {
        return;
    }
    let (mut settings, _cleanup) = settings("exist", "cat", &[]);
    let name = format!("{}taken", settings.tmux.prefix);
    let dir = tempfile::tempdir().unwrap();
    start_external(&name, dir.path(), "cat");

    settings.tmux.on_existing = ExistingSessionPolicy::Error;
    let mut process = TmuxProcess::new(name.clone(), TmuxClient::new(), &settings);
    assert!(matches!(
        process.start(dir.path()).await,
        Err(ProcessError::AlreadyExists(_))
    ));
    assert!(!process.is_alive());

    settings.tmux.on_existing = ExistingSessionPolicy::Attach;
    let mut process = TmuxProcess::new(name.clone(), TmuxClient::new(), &settings);
    process.start(dir.path()).await.expect("attach to existing session");
    assert!(process.is_alive());
    assert!(process.pid().is_some());

    assert!(process.terminate(Duration::from_millis(300)).await.unwrap());
    assert!(!TmuxClient::new().has_session(&name).unwrap());
}

#[tokio::test]
async fn test_tmux_discover_adopts_prefixed_sessions() {
    if !tmux_available() {
        return;
    }
    let (settings, _cleanup) = settings("disc", "cat", &[]);
    let prefix = settings.tmux.prefix.clone();
    let dir = tempfile::tempdir().unwrap();
    start_external(&format!("{}ext1", prefix), dir.path(), "cat");

    let registry = registry(settings);
    assert_eq!(registry.discover().await, vec!["ext1".to_string()]);
    // Already registered sessions are not adopted twice
    assert!(registry.discover().await.is_empty());
    assert!(matches!(
        registry.adopt("ext1").await,
        Err(SupervisorError::InvalidInput { .. })
    ));

    let outcome = registry.send_message("ext1", "hello").await.unwrap();
    assert!(outcome.immediate_response.contains("hello"));

    registry.terminate("ext1").await.unwrap();
    assert!(!TmuxClient::new()
        .has_session(&format!("{}ext1", prefix))
        .unwrap());
}
