use std::collections::VecDeque;
use std::time::Instant;

use super::OutputWindow;

/// Upper bound of uncollected output kept in memory (bytes)
const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Number of completed lines kept for prompt peeking
const MAX_TAIL_LINES: usize = 200;

/// Output shared between a PTY reader thread and its handle.
///
/// `pending` holds output not yet handed to a caller; `tail` holds the most
/// recent lines regardless of collection so prompts stay visible after a
/// send has drained them.
#[derive(Debug)]
pub struct OutputBuffer {
    pending: String,
    tail: VecDeque<String>,
    partial: String,
    generation: u64,
    last_output: Option<Instant>,
    closed: bool,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self {
            pending: String::new(),
            tail: VecDeque::new(),
            partial: String::new(),
            generation: 0,
            last_output: None,
            closed: false,
        }
    }

    /// Record a chunk of output
    pub fn push(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        self.generation += 1;
        self.last_output = Some(Instant::now());

        self.pending.push_str(chunk);
        if self.pending.len() > MAX_PENDING_BYTES {
            let mut cut = self.pending.len() - MAX_PENDING_BYTES;
            while !self.pending.is_char_boundary(cut) {
                cut += 1;
            }
            self.pending.drain(..cut);
        }

        for c in chunk.chars() {
            match c {
                '\n' => {
                    let line = std::mem::take(&mut self.partial);
                    self.tail.push_back(line);
                    if self.tail.len() > MAX_TAIL_LINES {
                        self.tail.pop_front();
                    }
                }
                '\r' => {}
                c => self.partial.push(c),
            }
        }
    }

    /// Take all output not yet collected
    pub fn take_pending(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }

    /// Last `max_lines` lines including the unterminated current line
    pub fn recent(&self, max_lines: usize) -> OutputWindow {
        let mut lines: Vec<&str> = self.tail.iter().map(String::as_str).collect();
        if !self.partial.is_empty() {
            lines.push(&self.partial);
        }
        let start = lines.len().saturating_sub(max_lines);
        OutputWindow {
            text: lines[start..].join("\n"),
            generation: self.generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// When the last chunk arrived
    pub fn last_output(&self) -> Option<Instant> {
        self.last_output
    }

    /// Mark the stream as finished (EOF or read error)
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}
