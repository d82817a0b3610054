//! End-to-end tests against real processes under a PTY.

use std::sync::Arc;
use std::time::Duration;

use claude_remote_core::{
    DefaultSpawner, DisplayMode, PromptScanner, SessionRegistry, SessionSettings, SessionState,
    SupervisorError,
};

fn settings(command: &str, args: &[&str]) -> SessionSettings {
    SessionSettings {
        command: command.to_string(),
        args: args.iter().map(|s| s.to_string()).collect(),
        startup_window_ms: 200,
        init_window_ms: 0,
        capture_window_ms: 1500,
        settle_ms: 150,
        terminate_grace_ms: 300,
        ..Default::default()
    }
}

fn registry(settings: SessionSettings) -> SessionRegistry {
    let spawner = Arc::new(DefaultSpawner::new(settings.clone()));
    SessionRegistry::new(settings, spawner).expect("registry")
}

#[tokio::test]
async fn test_cat_session_end_to_end() {
    let registry = registry(settings("cat", &[]));
    let dir = tempfile::tempdir().unwrap();

    let id = registry
        .create(Some("demo"), Some(dir.path()))
        .await
        .expect("cat should start");
    assert!(id.starts_with("demo_"));

    let outcome = registry.send_message(&id, "echo hi").await.unwrap();
    assert_eq!(outcome.status, "sent");
    assert!(
        outcome.immediate_response.contains("echo hi"),
        "response was {:?}",
        outcome.immediate_response
    );

    let logs = registry.get_logs(&id, 50, DisplayMode::Full).await.unwrap();
    assert!(logs.iter().any(|l| l.contains("USER: echo hi")));

    let status = registry.get_status(&id).await.unwrap();
    assert_eq!(status.status, SessionState::Active);
    assert!(status.pid.is_some());

    registry.terminate(&id).await.unwrap();
    assert!(matches!(
        registry.get_status(&id).await,
        Err(SupervisorError::SessionNotFound { .. })
    ));
}

#[tokio::test]
async fn test_prompt_detected_and_answered() {
    let script = r#"printf 'Continue? [y/n] '; read answer; echo "answer=$answer"; sleep 5"#;
    let registry = registry(settings("sh", &["-c", script]));
    let dir = tempfile::tempdir().unwrap();
    let id = registry.create(None, Some(dir.path())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let scanner = PromptScanner::new(Duration::from_millis(200));
    let prompts = scanner.scan_all(&registry).await;
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].session_id, id);
    assert_eq!(prompts[0].prompt_text, "Continue? [y/n]");

    registry.respond_to_prompt(&id, "y").await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(scanner.scan_all(&registry).await.is_empty());

    let logs = registry.get_logs(&id, 50, DisplayMode::Full).await.unwrap();
    assert_eq!(
        logs.iter()
            .filter(|l| l.contains("PROMPT_RESPONSE: y"))
            .count(),
        1
    );

    registry.terminate(&id).await.unwrap();
}

#[tokio::test]
async fn test_process_exiting_during_startup_fails() {
    let registry = registry(settings("sh", &["-c", "exit 0"]));
    let dir = tempfile::tempdir().unwrap();

    let err = registry.create(None, Some(dir.path())).await.unwrap_err();
    assert!(matches!(err, SupervisorError::StartFailure { .. }));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_dead_process_is_evicted() {
    let registry = registry(settings("sh", &["-c", "sleep 0.5"]));
    let dir = tempfile::tempdir().unwrap();
    let id = registry.create(None, Some(dir.path())).await.unwrap();

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(matches!(
        registry.send_message(&id, "hello").await,
        Err(SupervisorError::ProcessNotActive { .. })
    ));

    let report = registry.health_sweep().await;
    assert_eq!(report.dead, 1);
    assert_eq!(report.evicted, vec![id]);
    assert!(registry.list().await.is_empty());
}

#[tokio::test]
async fn test_terminate_escalates_past_ignored_interrupt() {
    // Ignores both SIGINT and SIGTERM, so only SIGKILL ends it
    let script = "trap '' INT TERM; while true; do sleep 0.1; done";
    let registry = registry(settings("sh", &["-c", script]));
    let dir = tempfile::tempdir().unwrap();
    let id = registry.create(None, Some(dir.path())).await.unwrap();

    registry.terminate(&id).await.unwrap();
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_sends_to_non_reading_process_stay_bounded() {
    let mut settings = settings("sleep", &["60"]);
    settings.capture_window_ms = 400;
    settings.settle_ms = 50;
    let registry = registry(settings);
    let dir = tempfile::tempdir().unwrap();
    let id = registry.create(None, Some(dir.path())).await.unwrap();

    let line = "x".repeat(200);
    let mut failures = 0;
    for _ in 0..150 {
        let result =
            tokio::time::timeout(Duration::from_secs(5), registry.send_message(&id, &line))
                .await
                .expect("send_message must return");
        if let Err(e) = result {
            assert!(matches!(e, SupervisorError::Io { .. }), "unexpected {:?}", e);
            failures += 1;
        }
    }
    assert!(failures > 0, "tty input queue never filled");

    // The session lock is free again, so other operations proceed
    let status = tokio::time::timeout(Duration::from_secs(2), registry.get_status(&id))
        .await
        .expect("get_status must return")
        .unwrap();
    assert_eq!(status.status, SessionState::Active);

    tokio::time::timeout(Duration::from_secs(5), registry.terminate(&id))
        .await
        .expect("terminate must return")
        .unwrap();
    assert!(registry.is_empty());
}
