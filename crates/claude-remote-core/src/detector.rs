//! Prompt detection over captured terminal text.

use once_cell::sync::Lazy;
use regex::Regex;

/// Number of trailing non-blank lines that are inspected
const TAIL_LINES: usize = 3;

/// Built-in prompt shapes, in tie-break order
static BUILTIN_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Yes/no prompts
        r"(?i)\[y/n\]",
        // Yes/no with a default, e.g. (y/N)
        r"(?i)\(y/n\)",
        // Continue prompts
        r"(?i)continue\?",
        // Input prompts such as "Enter your name:"
        r"(?i)\benter\b.*:\s*$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid builtin prompt pattern"))
    .collect()
});

/// CSI escape sequences (colors, cursor movement)
static ANSI_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("Invalid ANSI_PATTERN regex")
});

/// Decides whether the tail of captured output is waiting for input.
///
/// Lines are checked most-recent-first; for one line the patterns are tried
/// in order, so the newest matching line always wins.
#[derive(Debug, Clone)]
pub struct PromptDetector {
    patterns: Vec<Regex>,
}

impl PromptDetector {
    /// Detector with the built-in patterns only
    pub fn new() -> Self {
        Self {
            patterns: BUILTIN_PATTERNS.clone(),
        }
    }

    /// Detector with the built-in patterns followed by `extra`.
    ///
    /// Extra patterns are compiled case-insensitively.
    pub fn with_patterns(extra: &[String]) -> Result<Self, regex::Error> {
        let mut patterns = BUILTIN_PATTERNS.clone();
        for pattern in extra {
            patterns.push(Regex::new(&format!("(?i){}", pattern))?);
        }
        Ok(Self { patterns })
    }

    /// Return the matching prompt line, if any
    pub fn detect(&self, tail_text: &str) -> Option<String> {
        let clean = ANSI_PATTERN.replace_all(tail_text, "");
        let lines: Vec<&str> = clean
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty())
            .collect();

        for line in lines.iter().rev().take(TAIL_LINES) {
            if self.patterns.iter().any(|p| p.is_match(line)) {
                return Some(line.trim().to_string());
            }
        }
        None
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

impl Default for PromptDetector {
    fn default() -> Self {
        Self::new()
    }
}
