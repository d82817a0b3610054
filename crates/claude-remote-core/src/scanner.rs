//! Cross-session prompt aggregation.

use chrono::{DateTime, Local};
use futures_util::future::join_all;
use serde::Serialize;
use std::time::Duration;

use crate::registry::{SessionRegistry, SharedSession};

/// A session waiting for input
#[derive(Debug, Clone, Serialize)]
pub struct PendingPrompt {
    pub session_id: String,
    pub prompt_text: String,
    pub timestamp: DateTime<Local>,
}

/// Checks every registered session for an unanswered prompt.
///
/// Each check is bounded by `timeout`, covering both the wait for the
/// session lock and the peek itself. A session that is busy or slow is
/// skipped rather than stalling the scan.
#[derive(Debug, Clone)]
pub struct PromptScanner {
    timeout: Duration,
}

impl PromptScanner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Scanner using the registry's configured prompt check timeout
    pub fn for_registry(registry: &SessionRegistry) -> Self {
        Self::new(registry.settings().prompt_check_timeout())
    }

    /// Pending prompts across all sessions, in registry order
    pub async fn scan_all(&self, registry: &SessionRegistry) -> Vec<PendingPrompt> {
        let checks = registry
            .sessions()
            .into_iter()
            .map(|(id, session)| self.check(id, session));

        join_all(checks).await.into_iter().flatten().collect()
    }

    async fn check(&self, id: String, session: SharedSession) -> Option<PendingPrompt> {
        let result = tokio::time::timeout(self.timeout, async {
            session.lock().await.check_for_prompt().await
        })
        .await;

        match result {
            Ok(Ok(Some(prompt_text))) => Some(PendingPrompt {
                session_id: id,
                prompt_text,
                timestamp: Local::now(),
            }),
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                tracing::warn!(session_id = %id, "Prompt check failed: {}", e);
                None
            }
            Err(_) => {
                tracing::debug!(session_id = %id, "Prompt check timed out, skipping");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionSettings;
    use crate::process::mock::MockSpawner;
    use std::sync::Arc;
    use std::time::Instant;

    async fn setup(count: usize) -> (MockSpawner, SessionRegistry, Vec<String>) {
        let spawner = MockSpawner::new();
        let registry =
            SessionRegistry::new(SessionSettings::default(), Arc::new(spawner.clone())).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut ids = Vec::new();
        for _ in 0..count {
            ids.push(registry.create(None, Some(dir.path())).await.unwrap());
        }
        (spawner, registry, ids)
    }

    #[tokio::test]
    async fn test_scan_collects_prompts() {
        let (spawner, registry, ids) = setup(3).await;
        spawner.control(&ids[0]).unwrap().emit("Continue? [y/n]");
        spawner.control(&ids[1]).unwrap().emit("just output\n");
        spawner
            .control(&ids[2])
            .unwrap()
            .emit("Enter your name: ");

        let prompts = PromptScanner::for_registry(&registry).scan_all(&registry).await;
        let found: Vec<(&str, &str)> = prompts
            .iter()
            .map(|p| (p.session_id.as_str(), p.prompt_text.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![
                (ids[0].as_str(), "Continue? [y/n]"),
                (ids[2].as_str(), "Enter your name:"),
            ]
        );
    }

    #[tokio::test]
    async fn test_scan_skips_busy_session() {
        let (spawner, registry, ids) = setup(2).await;
        spawner.control(&ids[0]).unwrap().emit("Continue? [y/n]");
        spawner.control(&ids[1]).unwrap().emit("Proceed (y/n)");

        // Hold the first session as if a send were in flight
        let busy = registry.get(&ids[0]).unwrap();
        let _guard = busy.lock().await;

        let started = Instant::now();
        let prompts = PromptScanner::new(Duration::from_millis(50))
            .scan_all(&registry)
            .await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].session_id, ids[1]);
    }

    #[tokio::test]
    async fn test_scan_skips_dead_session() {
        let (spawner, registry, ids) = setup(2).await;
        let dead = spawner.control(&ids[0]).unwrap();
        dead.emit("Continue? [y/n]");
        dead.kill();
        spawner.control(&ids[1]).unwrap().emit("Continue? [y/n]");

        let prompts = PromptScanner::for_registry(&registry).scan_all(&registry).await;
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].session_id, ids[1]);
    }

    #[tokio::test]
    async fn test_scan_empty_registry() {
        let (_spawner, registry, _) = setup(0).await;
        let prompts = PromptScanner::for_registry(&registry).scan_all(&registry).await;
        assert!(prompts.is_empty());
    }
}
