//! In-memory process backend for tests.
//!
//! A [`MockProcess`] is driven through its [`MockControl`]: tests emit
//! output, kill the process or make operations fail, and inspect what was
//! written. [`MockSpawner`] hands out mock processes and keeps their
//! controls by session id.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::{OutputWindow, ProcessHandle, Spawner};
use crate::config::BackendKind;
use crate::error::ProcessError;

#[derive(Debug, Default)]
struct MockState {
    started: bool,
    alive: bool,
    fail_start: bool,
    fail_writes: bool,
    ignore_terminate: bool,
    reply: Option<String>,
    written: Vec<String>,
    pending: String,
    lines: Vec<String>,
    generation: u64,
    working_dir: Option<PathBuf>,
    terminate_calls: usize,
}

/// Test-side handle to a mock process
#[derive(Debug, Clone, Default)]
pub struct MockControl {
    state: Arc<Mutex<MockState>>,
}

impl MockControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce output as if the process printed `text`
    pub fn emit(&self, text: &str) {
        emit_locked(&mut self.state.lock(), text);
    }

    /// Make the process die
    pub fn kill(&self) {
        self.state.lock().alive = false;
    }

    pub fn is_alive(&self) -> bool {
        self.state.lock().alive
    }

    /// Lines written to the process, oldest first
    pub fn written(&self) -> Vec<String> {
        self.state.lock().written.clone()
    }

    /// Output emitted after every written line
    pub fn set_reply(&self, reply: Option<&str>) {
        self.state.lock().reply = reply.map(str::to_string);
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.state.lock().fail_start = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Keep the process alive through termination attempts
    pub fn set_ignore_terminate(&self, ignore: bool) {
        self.state.lock().ignore_terminate = ignore;
    }

    pub fn working_dir(&self) -> Option<PathBuf> {
        self.state.lock().working_dir.clone()
    }

    pub fn terminate_calls(&self) -> usize {
        self.state.lock().terminate_calls
    }
}

fn emit_locked(state: &mut MockState, text: &str) {
    if text.is_empty() {
        return;
    }
    state.generation += 1;
    state.pending.push_str(text);
    state.lines.extend(text.lines().map(str::to_string));
}

/// A process that only exists in memory
#[derive(Debug)]
pub struct MockProcess {
    control: MockControl,
}

impl MockProcess {
    pub fn new(control: MockControl) -> Self {
        Self { control }
    }
}

#[async_trait]
impl ProcessHandle for MockProcess {
    fn kind(&self) -> BackendKind {
        BackendKind::Pty
    }

    async fn start(&mut self, working_dir: &Path) -> Result<(), ProcessError> {
        let mut state = self.control.state.lock();
        if state.fail_start {
            return Err(ProcessError::SpawnFailed("mock start failure".to_string()));
        }
        state.started = true;
        state.alive = true;
        state.working_dir = Some(working_dir.to_path_buf());
        Ok(())
    }

    async fn write_line(&mut self, text: &str) -> Result<(), ProcessError> {
        let mut state = self.control.state.lock();
        if !state.started {
            return Err(ProcessError::NotStarted);
        }
        if !state.alive || state.fail_writes {
            return Err(ProcessError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }
        state.written.push(text.to_string());
        if let Some(reply) = state.reply.clone() {
            emit_locked(&mut state, &reply);
        }
        Ok(())
    }

    async fn collect_output(&mut self, _window: Duration) -> Result<String, ProcessError> {
        let mut state = self.control.state.lock();
        if !state.started {
            return Err(ProcessError::NotStarted);
        }
        Ok(std::mem::take(&mut state.pending))
    }

    async fn recent_output(&mut self, max_lines: usize) -> Result<OutputWindow, ProcessError> {
        let state = self.control.state.lock();
        if !state.started {
            return Err(ProcessError::NotStarted);
        }
        let start = state.lines.len().saturating_sub(max_lines);
        Ok(OutputWindow {
            text: state.lines[start..].join("\n"),
            generation: state.generation,
        })
    }

    fn is_alive(&mut self) -> bool {
        self.control.is_alive()
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    async fn terminate(&mut self, _grace: Duration) -> Result<bool, ProcessError> {
        let mut state = self.control.state.lock();
        state.terminate_calls += 1;
        if state.ignore_terminate && state.alive {
            return Ok(false);
        }
        state.alive = false;
        Ok(true)
    }
}

#[derive(Debug, Default)]
struct SpawnerState {
    controls: HashMap<String, MockControl>,
    external: Vec<String>,
    reply: Option<String>,
    fail_start: bool,
}

/// Spawner handing out [`MockProcess`]es
#[derive(Debug, Clone, Default)]
pub struct MockSpawner {
    state: Arc<Mutex<SpawnerState>>,
}

impl MockSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every process spawned afterwards answers each line with `reply`
    pub fn with_reply(reply: &str) -> Self {
        let spawner = Self::new();
        spawner.state.lock().reply = Some(reply.to_string());
        spawner
    }

    /// Processes spawned afterwards fail to start
    pub fn set_fail_start(&self, fail: bool) {
        self.state.lock().fail_start = fail;
    }

    /// Ids reported by `discover` and accepted by `attach`
    pub fn set_external(&self, ids: &[&str]) {
        self.state.lock().external = ids.iter().map(|s| s.to_string()).collect();
    }

    /// Control of the process most recently spawned for `id`
    pub fn control(&self, id: &str) -> Option<MockControl> {
        self.state.lock().controls.get(id).cloned()
    }

    /// Number of processes handed out so far
    pub fn spawned(&self) -> usize {
        self.state.lock().controls.len()
    }

    fn new_process(&self, id: &str) -> Box<dyn ProcessHandle> {
        let mut state = self.state.lock();
        let control = MockControl::new();
        control.set_reply(state.reply.as_deref());
        control.set_fail_start(state.fail_start);
        state.controls.insert(id.to_string(), control.clone());
        Box::new(MockProcess::new(control))
    }
}

impl Spawner for MockSpawner {
    fn spawn(&self, id: &str) -> Box<dyn ProcessHandle> {
        self.new_process(id)
    }

    fn attach(&self, id: &str) -> Option<Box<dyn ProcessHandle>> {
        let known = self.state.lock().external.iter().any(|e| e == id);
        known.then(|| self.new_process(id))
    }

    fn discover(&self) -> Result<Vec<String>, ProcessError> {
        Ok(self.state.lock().external.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_lifecycle() {
        let control = MockControl::new();
        control.set_reply(Some("ok\n"));
        let mut process = MockProcess::new(control.clone());

        process.start(Path::new("/tmp")).await.unwrap();
        assert!(process.is_alive());
        assert_eq!(control.working_dir(), Some(PathBuf::from("/tmp")));

        process.write_line("hello").await.unwrap();
        assert_eq!(control.written(), vec!["hello"]);
        assert_eq!(process.collect_output(Duration::ZERO).await.unwrap(), "ok\n");
        assert_eq!(process.collect_output(Duration::ZERO).await.unwrap(), "");

        let window = process.recent_output(5).await.unwrap();
        assert_eq!(window.text, "ok");
        assert_eq!(window.generation, 1);

        assert!(process.terminate(Duration::ZERO).await.unwrap());
        assert!(!control.is_alive());
        assert!(process.write_line("late").await.is_err());
    }

    #[tokio::test]
    async fn test_mock_ignores_terminate() {
        let control = MockControl::new();
        control.set_ignore_terminate(true);
        let mut process = MockProcess::new(control.clone());
        process.start(Path::new("/tmp")).await.unwrap();

        assert!(!process.terminate(Duration::ZERO).await.unwrap());
        assert!(process.is_alive());
        assert_eq!(control.terminate_calls(), 1);
    }

    #[test]
    fn test_spawner_tracks_controls() {
        let spawner = MockSpawner::new();
        spawner.set_external(&["ext_1"]);
        let _ = spawner.spawn("a_1");
        assert!(spawner.control("a_1").is_some());
        assert!(spawner.attach("nope").is_none());
        assert!(spawner.attach("ext_1").is_some());
        assert_eq!(spawner.discover().unwrap(), vec!["ext_1"]);
        assert_eq!(spawner.spawned(), 2);
    }
}
