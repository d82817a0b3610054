//! Bounded per-session activity log.

use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fmt;

/// Default number of lines kept per session
pub const DEFAULT_CAPACITY: usize = 1000;

/// Lines longer than this are shortened in mobile mode
const MOBILE_WIDTH: usize = 80;

/// Content after the timestamp is cut to this many chars (plus ellipsis)
const MOBILE_CONTENT_KEEP: usize = 47;

/// Content after the timestamp longer than this gets cut
const MOBILE_CONTENT_MAX: usize = 50;

/// Lines without a timestamp are cut to this many chars (plus ellipsis)
const MOBILE_LINE_KEEP: usize = 77;

/// Returned by [`LogBuffer::format`] for an empty log
pub const NO_ACTIVITY: &str = "No recent activity in this session.";

/// Who produced a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRole {
    User,
    Session,
    Prompt,
    PromptResponse,
    Startup,
}

impl LogRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogRole::User => "USER",
            LogRole::Session => "SESSION",
            LogRole::Prompt => "PROMPT",
            LogRole::PromptResponse => "PROMPT_RESPONSE",
            LogRole::Startup => "STARTUP",
        }
    }
}

impl fmt::Display for LogRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How log lines are rendered for the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    /// Lines as stored
    #[default]
    Full,
    /// Long lines shortened for narrow screens
    Mobile,
}

impl DisplayMode {
    pub fn from_mobile_flag(mobile: bool) -> Self {
        if mobile {
            DisplayMode::Mobile
        } else {
            DisplayMode::Full
        }
    }
}

/// A single timestamped entry
#[derive(Debug, Clone)]
pub struct LogLine {
    pub at: DateTime<Local>,
    pub role: LogRole,
    pub text: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.at.format("%H:%M:%S"),
            self.role,
            self.text
        )
    }
}

/// Append-only ring of timestamped lines.
///
/// When the number of lines exceeds the capacity, the oldest lines are
/// dropped in one step so that only the newest half remains.
#[derive(Debug)]
pub struct LogBuffer {
    lines: VecDeque<LogLine>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a line stamped with the current local time
    pub fn append(&mut self, role: LogRole, text: impl Into<String>) {
        self.push(LogLine {
            at: Local::now(),
            role,
            text: text.into(),
        });
    }

    /// Append a pre-built line
    pub fn push(&mut self, line: LogLine) {
        self.lines.push_back(line);
        if self.lines.len() > self.capacity {
            let keep = (self.capacity / 2).max(1);
            let evict = self.lines.len() - keep;
            self.lines.drain(..evict);
        }
    }

    /// The last `n` rendered lines, oldest first
    pub fn tail(&self, n: usize) -> Vec<String> {
        self.tail_with_mode(n, DisplayMode::Full)
    }

    /// The last `n` rendered lines, passed through the display transform.
    ///
    /// The stored lines are never modified.
    pub fn tail_with_mode(&self, n: usize, mode: DisplayMode) -> Vec<String> {
        let start = self.lines.len().saturating_sub(n);
        self.lines
            .iter()
            .skip(start)
            .map(|line| {
                let rendered = line.to_string();
                match mode {
                    DisplayMode::Full => rendered,
                    DisplayMode::Mobile => shorten_for_mobile(&rendered),
                }
            })
            .collect()
    }

    /// Join the last `max_lines` of `lines` into one fenced block
    pub fn format(lines: &[String], max_lines: usize) -> String {
        if lines.is_empty() {
            return NO_ACTIVITY.to_string();
        }

        let start = lines.len().saturating_sub(max_lines);
        let mut formatted = String::from("Recent session activity:\n```\n");
        for line in &lines[start..] {
            formatted.push_str(line);
            formatted.push('\n');
        }
        formatted.push_str("```");
        formatted
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Shorten one rendered line for a narrow display
pub fn shorten_for_mobile(line: &str) -> String {
    if line.chars().count() <= MOBILE_WIDTH {
        return line.to_string();
    }

    match line.split_once(']') {
        Some((stamp, content)) => {
            let content = if content.chars().count() > MOBILE_CONTENT_MAX {
                format!("{}...", take_chars(content, MOBILE_CONTENT_KEEP))
            } else {
                content.to_string()
            };
            format!("{}]{}", stamp, content)
        }
        None => format!("{}...", take_chars(line, MOBILE_LINE_KEEP)),
    }
}

fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
