//! Agent process spawned directly under a pseudo-terminal.

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use super::output::OutputBuffer;
use super::{OutputWindow, ProcessHandle};
use crate::config::{BackendKind, SessionSettings};
use crate::error::ProcessError;

/// Interval between polls while waiting on output or exit
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Ctrl-C as written by a terminal
const INTERRUPT: &[u8] = &[0x03];

/// A process running under a PTY owned by this handle
pub struct PtyProcess {
    id: String,
    command: String,
    args: Vec<String>,
    rows: u16,
    cols: u16,
    startup_window: Duration,
    settle: Duration,
    /// Upper bound on waiting for the writer thread
    write_timeout: Duration,
    running: Option<Running>,
    /// Output generation when the last line was written
    write_mark: Option<u64>,
}

struct Running {
    /// Kept open for the lifetime of the child
    _master: Box<dyn MasterPty + Send>,
    input: mpsc::Sender<WriteRequest>,
    /// Completion of a write that timed out and may still be blocked
    stalled: Option<oneshot::Receiver<io::Result<()>>>,
    child: Box<dyn Child + Send + Sync>,
    output: Arc<Mutex<OutputBuffer>>,
    pid: Option<u32>,
}

/// Bytes for the writer thread plus a completion channel
struct WriteRequest {
    bytes: Vec<u8>,
    done: oneshot::Sender<io::Result<()>>,
}

impl Running {
    /// Fails fast while an earlier write is still blocked on a full tty queue
    fn ensure_writer_idle(&mut self) -> Result<(), ProcessError> {
        if let Some(stalled) = self.stalled.as_mut() {
            if let Err(oneshot::error::TryRecvError::Empty) = stalled.try_recv() {
                return Err(ProcessError::Io(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "previous PTY write is still pending",
                )));
            }
            self.stalled = None;
        }
        Ok(())
    }

    fn submit(&self, bytes: Vec<u8>) -> Result<oneshot::Receiver<io::Result<()>>, ProcessError> {
        let (done, rx) = oneshot::channel();
        self.input
            .send(WriteRequest { bytes, done })
            .map_err(|_| writer_gone())?;
        Ok(rx)
    }
}

fn writer_gone() -> ProcessError {
    ProcessError::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "PTY writer thread has exited",
    ))
}

impl PtyProcess {
    pub fn new(id: &str, settings: &SessionSettings) -> Self {
        Self {
            id: id.to_string(),
            command: settings.command.clone(),
            args: settings.args.clone(),
            rows: 40,
            cols: 120,
            startup_window: settings.startup_window(),
            settle: settings.settle(),
            write_timeout: settings.capture_window(),
            running: None,
            write_mark: None,
        }
    }

    fn running_mut(&mut self) -> Result<&mut Running, ProcessError> {
        self.running.as_mut().ok_or(ProcessError::NotStarted)
    }
}

#[async_trait]
impl ProcessHandle for PtyProcess {
    fn kind(&self) -> BackendKind {
        BackendKind::Pty
    }

    async fn start(&mut self, working_dir: &Path) -> Result<(), ProcessError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: self.rows,
                cols: self.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ProcessError::CreateFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&self.command);
        cmd.args(&self.args);
        cmd.cwd(working_dir);

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| ProcessError::SpawnFailed(e.to_string()))?;
        // The master only sees EOF once every slave handle is closed
        drop(pair.slave);
        let pid = child.process_id();

        tracing::debug!(
            session_id = %self.id,
            command = %self.command,
            pid = ?pid,
            "Spawned PTY process"
        );

        let master = pair.master;
        let streams = master
            .try_clone_reader()
            .and_then(|reader| master.take_writer().map(|writer| (reader, writer)));
        let (reader, writer) = match streams {
            Ok(streams) => streams,
            Err(e) => {
                let _ = child.kill();
                return Err(ProcessError::Io(io::Error::other(e)));
            }
        };

        let output = Arc::new(Mutex::new(OutputBuffer::new()));
        if let Err(e) = spawn_reader(&self.id, reader, output.clone()) {
            let _ = child.kill();
            return Err(ProcessError::Io(e));
        }
        let input = match spawn_writer(&self.id, writer) {
            Ok(input) => input,
            Err(e) => {
                let _ = child.kill();
                return Err(ProcessError::Io(e));
            }
        };

        self.running = Some(Running {
            _master: master,
            input,
            stalled: None,
            child,
            output,
            pid,
        });

        tokio::time::sleep(self.startup_window).await;

        if self.is_alive() {
            Ok(())
        } else {
            Err(ProcessError::SpawnFailed(format!(
                "{} exited during startup",
                self.command
            )))
        }
    }

    async fn write_line(&mut self, text: &str) -> Result<(), ProcessError> {
        let write_timeout = self.write_timeout;
        let running = self.running_mut()?;
        running.ensure_writer_idle()?;
        let mark = running.output.lock().generation();

        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(b'\n');
        let mut done = running.submit(bytes)?;

        match tokio::time::timeout(write_timeout, &mut done).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(writer_gone()),
            Err(_) => {
                // The child is not draining its input; later writes fail fast
                running.stalled = Some(done);
                return Err(ProcessError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "PTY write timed out",
                )));
            }
        }

        self.write_mark = Some(mark);
        Ok(())
    }

    async fn collect_output(&mut self, window: Duration) -> Result<String, ProcessError> {
        let settle = self.settle;
        let mark = self.write_mark.take();
        let output = self.running_mut()?.output.clone();
        let mark = mark.unwrap_or_else(|| output.lock().generation());
        let started = Instant::now();

        loop {
            {
                let buf = output.lock();
                if buf.is_closed() {
                    break;
                }
                let quiet = buf
                    .last_output()
                    .is_some_and(|at| at.elapsed() >= settle);
                if buf.generation() > mark && quiet {
                    break;
                }
            }
            if started.elapsed() >= window {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let collected = output.lock().take_pending();
        Ok(collected)
    }

    async fn recent_output(&mut self, max_lines: usize) -> Result<OutputWindow, ProcessError> {
        let running = self.running_mut()?;
        let window = running.output.lock().recent(max_lines);
        Ok(window)
    }

    fn is_alive(&mut self) -> bool {
        match self.running.as_mut() {
            Some(running) => matches!(running.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn pid(&self) -> Option<u32> {
        self.running.as_ref().and_then(|r| r.pid)
    }

    async fn terminate(&mut self, grace: Duration) -> Result<bool, ProcessError> {
        if !self.is_alive() {
            return Ok(true);
        }
        let id = self.id.clone();
        let running = self.running_mut()?;

        // Step 1: interrupt like a user pressing Ctrl-C, unless input is stuck
        if running.ensure_writer_idle().is_ok() {
            if let Ok(done) = running.submit(INTERRUPT.to_vec()) {
                running.stalled = Some(done);
            }
        }
        if wait_for_exit(running.child.as_mut(), grace).await {
            tracing::debug!(session_id = %id, "PTY process exited after interrupt");
            return Ok(true);
        }

        // Step 2: SIGTERM
        if let Some(pid) = running.pid {
            if let Err(e) = forward_signal(pid, Signal::SIGTERM) {
                tracing::debug!(session_id = %id, "SIGTERM failed: {}", e);
            }
            if wait_for_exit(running.child.as_mut(), grace).await {
                tracing::debug!(session_id = %id, "PTY process exited after SIGTERM");
                return Ok(true);
            }
        }

        // Step 3: SIGKILL
        tracing::warn!(session_id = %id, "PTY process ignored SIGTERM, killing");
        if let Err(e) = running.child.kill() {
            tracing::debug!(session_id = %id, "kill failed: {}", e);
        }
        Ok(wait_for_exit(running.child.as_mut(), grace).await)
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if let Some(running) = self.running.as_mut() {
            if matches!(running.child.try_wait(), Ok(None)) {
                let _ = running.child.kill();
            }
        }
    }
}

/// Poll the child until it exits or `timeout` passes
async fn wait_for_exit(child: &mut (dyn Child + Send + Sync), timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {}
            Err(_) => return false,
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Send a signal to the child process
fn forward_signal(pid: u32, sig: Signal) -> nix::Result<()> {
    signal::kill(Pid::from_raw(pid as i32), sig)
}

/// Thread: read from the PTY master into the shared output buffer
fn spawn_reader(
    id: &str,
    mut reader: Box<dyn Read + Send>,
    output: Arc<Mutex<OutputBuffer>>,
) -> io::Result<()> {
    let id = id.to_string();
    thread::Builder::new()
        .name(format!("pty-reader-{}", id))
        .spawn(move || {
            let mut buf = [0u8; 4096];
            let mut carry = Vec::new();

            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break, // EOF
                    Ok(n) => {
                        let text = decode_utf8(&mut carry, &buf[..n]);
                        output.lock().push(&text);
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // EIO is how Linux reports a closed PTY
                        tracing::debug!(session_id = %id, "PTY read ended: {}", e);
                        break;
                    }
                }
            }
            output.lock().close();
        })?;
    Ok(())
}

/// Thread: write queued requests to the PTY master.
///
/// A write into a full tty input queue blocks until the child reads, so it
/// never runs on an async worker.
fn spawn_writer(
    id: &str,
    mut writer: Box<dyn Write + Send>,
) -> io::Result<mpsc::Sender<WriteRequest>> {
    let (tx, rx) = mpsc::channel::<WriteRequest>();
    let id = id.to_string();
    thread::Builder::new()
        .name(format!("pty-writer-{}", id))
        .spawn(move || {
            while let Ok(request) = rx.recv() {
                let result = writer
                    .write_all(&request.bytes)
                    .and_then(|()| writer.flush());
                if let Err(e) = &result {
                    tracing::debug!(session_id = %id, "PTY write failed: {}", e);
                }
                // The caller may have stopped waiting
                let _ = request.done.send(result);
            }
        })?;
    Ok(tx)
}

/// Decode bytes as UTF-8, holding back an incomplete trailing sequence
fn decode_utf8(carry: &mut Vec<u8>, bytes: &[u8]) -> String {
    carry.extend_from_slice(bytes);
    match std::str::from_utf8(carry) {
        Ok(s) => {
            let text = s.to_string();
            carry.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let rest = carry.split_off(valid);
            let text = String::from_utf8_lossy(carry).into_owned();
            *carry = rest;
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(carry).into_owned();
            carry.clear();
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(command: &str, args: &[&str]) -> SessionSettings {
        SessionSettings {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            startup_window_ms: 200,
            settle_ms: 100,
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_utf8_split_sequence() {
        let mut carry = Vec::new();
        let bytes = "é".as_bytes();
        assert_eq!(decode_utf8(&mut carry, &bytes[..1]), "");
        assert_eq!(carry.len(), 1);
        assert_eq!(decode_utf8(&mut carry, &bytes[1..]), "é");
        assert!(carry.is_empty());
    }

    #[test]
    fn test_decode_utf8_invalid_bytes() {
        let mut carry = Vec::new();
        let text = decode_utf8(&mut carry, &[b'a', 0xff, b'b']);
        assert_eq!(text, "a\u{fffd}b");
        assert!(carry.is_empty());
    }

    #[tokio::test]
    async fn test_operations_before_start_fail() {
        let mut process = PtyProcess::new("idle_1", &settings("cat", &[]));
        assert!(!process.is_alive());
        assert!(process.pid().is_none());
        assert!(matches!(
            process.write_line("hi").await,
            Err(ProcessError::NotStarted)
        ));
        // Terminating a never-started handle succeeds
        assert!(process.terminate(Duration::from_millis(10)).await.unwrap());
    }

    #[tokio::test]
    async fn test_spawn_invalid_command_fails() {
        let mut process =
            PtyProcess::new("bad_1", &settings("/nonexistent/binary", &[]));
        let dir = tempfile::tempdir().unwrap();
        assert!(process.start(dir.path()).await.is_err());
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn test_cat_echoes_line() {
        let mut process = PtyProcess::new("cat_1", &settings("cat", &[]));
        let dir = tempfile::tempdir().unwrap();
        process.start(dir.path()).await.expect("cat should start");
        assert!(process.is_alive());
        assert!(process.pid().is_some());

        process.write_line("echo hi").await.unwrap();
        let output = process
            .collect_output(Duration::from_secs(2))
            .await
            .unwrap();
        assert!(output.contains("echo hi"), "output was {:?}", output);

        assert!(process.terminate(Duration::from_millis(500)).await.unwrap());
        assert!(!process.is_alive());
        // Idempotent
        assert!(process.terminate(Duration::from_millis(10)).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_to_non_reading_child_is_bounded() {
        let mut s = settings("sleep", &["60"]);
        s.capture_window_ms = 300;
        let mut process = PtyProcess::new("stuck_1", &s);
        let dir = tempfile::tempdir().unwrap();
        process.start(dir.path()).await.expect("sleep should start");

        // Fill the tty input queue until a write times out
        let line = "x".repeat(512);
        let mut timed_out = false;
        for _ in 0..400 {
            let result = tokio::time::timeout(Duration::from_secs(3), process.write_line(&line))
                .await
                .expect("write_line must not hang");
            if let Err(ProcessError::Io(e)) = result {
                assert_eq!(e.kind(), io::ErrorKind::TimedOut);
                timed_out = true;
                break;
            }
        }
        assert!(timed_out, "tty input queue never filled");

        // The stuck write is remembered; the next one fails without waiting
        let started = Instant::now();
        match process.write_line("more").await {
            Err(ProcessError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::WouldBlock),
            other => panic!("expected WouldBlock, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_millis(100));

        // Termination escalates to signals and still succeeds
        assert!(process.terminate(Duration::from_millis(300)).await.unwrap());
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn test_recent_output_is_not_consumed() {
        let mut process = PtyProcess::new(
            "sh_1",
            &settings("sh", &["-c", "printf 'Continue? [y/n] '; read answer"]),
        );
        let dir = tempfile::tempdir().unwrap();
        process.start(dir.path()).await.expect("sh should start");

        let first = process.recent_output(3).await.unwrap();
        let second = process.recent_output(3).await.unwrap();
        assert!(first.text.contains("Continue? [y/n]"));
        assert_eq!(first, second);

        let _ = process.terminate(Duration::from_millis(500)).await;
    }
}
