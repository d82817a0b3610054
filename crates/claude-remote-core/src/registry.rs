//! Concurrency-safe directory of sessions.
//!
//! The map itself sits behind a `parking_lot::RwLock` that is only held for
//! short synchronous sections; every session sits behind its own
//! `tokio::sync::Mutex`, so operations on one session are serialized while
//! different sessions proceed independently.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::SessionSettings;
use crate::detector::PromptDetector;
use crate::error::SupervisorError;
use crate::log_buffer::DisplayMode;
use crate::namegen::generate_unique_id;
use crate::process::{DefaultSpawner, ProcessHandle, Spawner};
use crate::session::{SendOutcome, Session, SessionStatus};

/// A registered session, locked for the duration of each operation
pub type SharedSession = Arc<Mutex<Session>>;

/// Outcome of a health sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    #[serde(rename = "total_sessions")]
    pub total: usize,
    #[serde(rename = "active_sessions")]
    pub active: usize,
    #[serde(rename = "dead_sessions")]
    pub dead: usize,
    /// Ids removed by this sweep
    #[serde(rename = "cleaned_up")]
    pub evicted: Vec<String>,
}

/// Outcome of terminating every session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    #[serde(rename = "total_sessions")]
    pub total: usize,
    #[serde(rename = "successful_shutdowns")]
    pub succeeded: usize,
    #[serde(rename = "failed_shutdowns")]
    pub failed: usize,
    #[serde(rename = "session_results")]
    pub results: BTreeMap<String, String>,
}

struct Entry {
    seq: u64,
    session: SharedSession,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Entry>,
    /// Every id handed out so far, live or not
    issued: HashSet<String>,
    next_seq: u64,
}

pub struct SessionRegistry {
    inner: RwLock<Inner>,
    spawner: Arc<dyn Spawner>,
    detector: Arc<PromptDetector>,
    settings: SessionSettings,
}

impl SessionRegistry {
    pub fn new(
        settings: SessionSettings,
        spawner: Arc<dyn Spawner>,
    ) -> Result<Self, SupervisorError> {
        let detector = PromptDetector::with_patterns(&settings.extra_prompt_patterns).map_err(
            |e| SupervisorError::InvalidInput {
                message: format!("invalid prompt pattern: {}", e),
            },
        )?;
        Ok(Self {
            inner: RwLock::new(Inner::default()),
            spawner,
            detector: Arc::new(detector),
            settings,
        })
    }

    /// Registry whose sessions use the configured backend
    pub fn with_default_spawner(settings: SessionSettings) -> Result<Self, SupervisorError> {
        let spawner = Arc::new(DefaultSpawner::new(settings.clone()));
        Self::new(settings, spawner)
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().sessions.is_empty()
    }

    /// Create and start a new session.
    ///
    /// Nothing is registered unless the backing process started.
    pub async fn create(
        &self,
        name: Option<&str>,
        working_dir: Option<&Path>,
    ) -> Result<String, SupervisorError> {
        let id = {
            let mut inner = self.inner.write();
            let id = generate_unique_id(name, |candidate| inner.issued.contains(candidate));
            inner.issued.insert(id.clone());
            id
        };
        let dir = self.resolve_working_dir(&id, working_dir)?;
        let process = self.spawner.spawn(&id);
        self.start_and_insert(id, dir, process).await
    }

    /// Register an existing externally named session
    pub async fn adopt(&self, name: &str) -> Result<String, SupervisorError> {
        if name.trim().is_empty() {
            return Err(SupervisorError::InvalidInput {
                message: "session name must not be empty".to_string(),
            });
        }
        {
            let mut inner = self.inner.write();
            if inner.issued.contains(name) {
                return Err(SupervisorError::InvalidInput {
                    message: format!("session id already used: {}", name),
                });
            }
            inner.issued.insert(name.to_string());
        }

        let id = name.to_string();
        let dir = self.resolve_working_dir(&id, None)?;
        let process = self
            .spawner
            .attach(&id)
            .ok_or_else(|| SupervisorError::StartFailure {
                id: id.clone(),
                reason: "backend cannot attach to existing sessions".to_string(),
            })?;
        self.start_and_insert(id, dir, process).await
    }

    /// Adopt every external session not registered yet.
    ///
    /// Returns the adopted ids. Failures are logged and skipped.
    pub async fn discover(&self) -> Vec<String> {
        let found = match self.spawner.discover() {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("Session discovery failed: {}", e);
                return Vec::new();
            }
        };

        let mut adopted = Vec::new();
        for id in found {
            let known = self.inner.read().issued.contains(&id);
            if known {
                continue;
            }
            match self.adopt(&id).await {
                Ok(id) => {
                    tracing::info!(session_id = %id, "Discovered existing session");
                    adopted.push(id);
                }
                Err(e) => tracing::warn!(session_id = %id, "Failed to adopt session: {}", e),
            }
        }
        adopted
    }

    /// Status of every registered session, in insertion order
    pub async fn list(&self) -> Vec<SessionStatus> {
        let mut statuses = Vec::new();
        for (_, session) in self.sessions() {
            statuses.push(session.lock().await.status());
        }
        statuses
    }

    /// Consistent snapshot of the registered sessions, in insertion order
    pub fn sessions(&self) -> Vec<(String, SharedSession)> {
        let inner = self.inner.read();
        let mut entries: Vec<(u64, String, SharedSession)> = inner
            .sessions
            .iter()
            .map(|(id, entry)| (entry.seq, id.clone(), entry.session.clone()))
            .collect();
        entries.sort_by_key(|(seq, _, _)| *seq);
        entries
            .into_iter()
            .map(|(_, id, session)| (id, session))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<SharedSession> {
        self.inner
            .read()
            .sessions
            .get(id)
            .map(|entry| entry.session.clone())
    }

    pub async fn send_message(
        &self,
        id: &str,
        message: &str,
    ) -> Result<SendOutcome, SupervisorError> {
        require_text(message, "message")?;
        let session = self.lookup(id)?;
        let mut session = session.lock().await;
        Ok(session.send_line(message).await?)
    }

    pub async fn get_logs(
        &self,
        id: &str,
        lines: usize,
        mode: DisplayMode,
    ) -> Result<Vec<String>, SupervisorError> {
        let session = self.lookup(id)?;
        let session = session.lock().await;
        Ok(session.capture_recent_output(lines, mode))
    }

    pub async fn get_status(&self, id: &str) -> Result<SessionStatus, SupervisorError> {
        let session = self.lookup(id)?;
        let mut session = session.lock().await;
        Ok(session.status())
    }

    pub async fn respond_to_prompt(
        &self,
        id: &str,
        response: &str,
    ) -> Result<(), SupervisorError> {
        require_text(response, "response")?;
        let session = self.lookup(id)?;
        let mut session = session.lock().await;
        Ok(session.respond_to_prompt(response).await?)
    }

    /// Terminate a session and remove it once its process is confirmed gone.
    ///
    /// A second call for the same id yields `SessionNotFound`.
    pub async fn terminate(&self, id: &str) -> Result<(), SupervisorError> {
        let shared = self.lookup(id)?;
        let mut session = shared.lock().await;

        // A concurrent terminate may have removed it while we waited
        if !self.is_registered(id, &shared) {
            return Err(SupervisorError::SessionNotFound { id: id.to_string() });
        }

        if !session.terminate().await {
            tracing::error!(session_id = %id, "Termination could not be confirmed");
            return Err(SupervisorError::PartialTermination { id: id.to_string() });
        }

        self.remove_if_same(id, &shared);
        tracing::info!(session_id = %id, "Session terminated");
        Ok(())
    }

    /// Probe every session and evict the dead ones
    pub async fn health_sweep(&self) -> HealthReport {
        let snapshot = self.sessions();
        let mut report = HealthReport {
            total: snapshot.len(),
            ..Default::default()
        };

        let mut dead = Vec::new();
        for (id, session) in &snapshot {
            let alive = session.lock().await.is_alive();
            if alive {
                report.active += 1;
            } else {
                dead.push((id, session));
            }
        }
        report.dead = dead.len();

        for (id, session) in dead {
            if self.remove_if_same(id, session) {
                tracing::info!(session_id = %id, "Evicted dead session");
                report.evicted.push(id.clone());
            }
        }

        if report.dead > 0 {
            tracing::debug!(
                total = report.total,
                active = report.active,
                dead = report.dead,
                "Health sweep finished"
            );
        }
        report
    }

    /// Terminate every session
    pub async fn shutdown_all(&self) -> ShutdownReport {
        let snapshot = self.sessions();
        let mut report = ShutdownReport {
            total: snapshot.len(),
            ..Default::default()
        };

        for (id, _) in snapshot {
            let result = match self.terminate(&id).await {
                Ok(()) | Err(SupervisorError::SessionNotFound { .. }) => {
                    report.succeeded += 1;
                    "success".to_string()
                }
                Err(SupervisorError::PartialTermination { .. }) => {
                    report.failed += 1;
                    "failed".to_string()
                }
                Err(e) => {
                    report.failed += 1;
                    format!("error: {}", e)
                }
            };
            report.results.insert(id, result);
        }

        tracing::info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            "Shutdown complete"
        );
        report
    }

    async fn start_and_insert(
        &self,
        id: String,
        working_dir: PathBuf,
        process: Box<dyn ProcessHandle>,
    ) -> Result<String, SupervisorError> {
        let mut session = Session::new(
            id.clone(),
            working_dir,
            process,
            self.detector.clone(),
            &self.settings,
        );
        if let Err(e) = session.start().await {
            tracing::error!(session_id = %id, "Failed to start session: {}", e);
            return Err(SupervisorError::StartFailure {
                id,
                reason: e.to_string(),
            });
        }

        let shared = Arc::new(Mutex::new(session));
        {
            let mut inner = self.inner.write();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.sessions.insert(
                id.clone(),
                Entry {
                    seq,
                    session: shared.clone(),
                },
            );
        }

        self.spawn_init(shared);
        tracing::info!(session_id = %id, "Session created");
        Ok(id)
    }

    /// Collect startup output once the initialization window has passed
    fn spawn_init(&self, session: SharedSession) {
        let delay = self.settings.init_window();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            session.lock().await.complete_startup().await;
        });
    }

    fn resolve_working_dir(
        &self,
        id: &str,
        requested: Option<&Path>,
    ) -> Result<PathBuf, SupervisorError> {
        let start_failure = |reason: String| SupervisorError::StartFailure {
            id: id.to_string(),
            reason,
        };

        let dir = match requested.or(self.settings.default_working_dir.as_deref()) {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir()
                .map_err(|e| start_failure(format!("no current directory: {}", e)))?,
        };
        let dir = dir.canonicalize().map_err(|e| {
            start_failure(format!("working directory {}: {}", dir.display(), e))
        })?;
        if !dir.is_dir() {
            return Err(start_failure(format!(
                "working directory {} is not a directory",
                dir.display()
            )));
        }
        Ok(dir)
    }

    fn lookup(&self, id: &str) -> Result<SharedSession, SupervisorError> {
        self.get(id)
            .ok_or_else(|| SupervisorError::SessionNotFound { id: id.to_string() })
    }

    fn is_registered(&self, id: &str, session: &SharedSession) -> bool {
        self.inner
            .read()
            .sessions
            .get(id)
            .is_some_and(|entry| Arc::ptr_eq(&entry.session, session))
    }

    /// Remove `id` if it still maps to `session`
    fn remove_if_same(&self, id: &str, session: &SharedSession) -> bool {
        let mut inner = self.inner.write();
        let same = inner
            .sessions
            .get(id)
            .is_some_and(|entry| Arc::ptr_eq(&entry.session, session));
        if same {
            inner.sessions.remove(id);
        }
        same
    }
}

fn require_text(text: &str, what: &str) -> Result<(), SupervisorError> {
    if text.trim().is_empty() {
        Err(SupervisorError::InvalidInput {
            message: format!("{} must not be empty", what),
        })
    } else {
        Ok(())
    }
}
