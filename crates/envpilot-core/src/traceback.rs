//! Python traceback collector.
//!
//! A line-by-line state machine that detects the start of a traceback,
//! accumulates the following lines and decides when the block ends: on a
//! blank line, on a shell-prompt-like line, after a period of silence, or
//! when the line limit is reached.

use std::time::{Duration, Instant};

use crate::ansi::strip_ansi_codes;
use crate::classify::is_traceback_start;

pub const DEFAULT_SILENCE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_LINES: usize = 500;

/// Shell prompt prefixes that end a traceback block
pub const DEFAULT_PROMPT_PREFIXES: &[&str] = &["$ ", "> ", ">>> ", "% ", "PS "];

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// A completed traceback block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traceback {
    pub lines: Vec<String>,
}

impl Traceback {
    /// The block as a single error detail string
    pub fn detail(&self) -> String {
        self.lines.join("\n")
    }

    /// Last non-empty line, usually `SomeError: message`
    pub fn summary(&self) -> Option<&str> {
        self.lines
            .iter()
            .rev()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
    }
}

/// Result of feeding a line to the collector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedResult {
    /// Line was consumed and buffered
    Buffered,

    /// Not part of a traceback, caller should handle it normally
    NotConsumed,

    /// A traceback block is complete. `line_consumed` is false when the
    /// terminating line (a prompt) was not made part of the block.
    Complete {
        traceback: Traceback,
        line_consumed: bool,
    },
}

/// Tunables for end-of-block detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    pub silence_timeout: Duration,
    pub max_lines: usize,
    pub prompt_prefixes: Vec<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            silence_timeout: DEFAULT_SILENCE_TIMEOUT,
            max_lines: DEFAULT_MAX_LINES,
            prompt_prefixes: DEFAULT_PROMPT_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectorState {
    Idle,
    Collecting,
}

// ─────────────────────────────────────────────────────────────────────────────
// Collector
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct TracebackCollector {
    state: CollectorState,
    lines: Vec<String>,
    last_line_at: Option<Instant>,
    config: CollectorConfig,
}

impl Default for TracebackCollector {
    fn default() -> Self {
        Self::new(CollectorConfig::default())
    }
}

impl TracebackCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            state: CollectorState::Idle,
            lines: Vec::new(),
            last_line_at: None,
            config,
        }
    }

    pub fn is_collecting(&self) -> bool {
        self.state == CollectorState::Collecting
    }

    /// Feed a line received at `now`
    pub fn feed_line(&mut self, line: &str, now: Instant) -> FeedResult {
        let clean = strip_ansi_codes(line);

        match self.state {
            CollectorState::Idle => {
                if is_traceback_start(&clean) {
                    self.state = CollectorState::Collecting;
                    self.lines.push(clean);
                    self.last_line_at = Some(now);
                    FeedResult::Buffered
                } else {
                    FeedResult::NotConsumed
                }
            }
            CollectorState::Collecting => {
                if self.is_prompt(&clean) {
                    return FeedResult::Complete {
                        traceback: self.take(),
                        line_consumed: false,
                    };
                }

                let blank = clean.trim().is_empty();
                self.lines.push(clean);
                self.last_line_at = Some(now);

                if blank || self.lines.len() >= self.config.max_lines {
                    if !blank {
                        tracing::warn!(
                            "Traceback exceeded {} lines, force-completing",
                            self.config.max_lines
                        );
                    }
                    return FeedResult::Complete {
                        traceback: self.take(),
                        line_consumed: true,
                    };
                }

                FeedResult::Buffered
            }
        }
    }

    /// Complete the block if nothing arrived within the silence timeout
    pub fn poll_timeout(&mut self, now: Instant) -> Option<Traceback> {
        if self.state != CollectorState::Collecting {
            return None;
        }
        let last = self.last_line_at?;
        if now.saturating_duration_since(last) >= self.config.silence_timeout {
            Some(self.take())
        } else {
            None
        }
    }

    /// When the pending block would time out, if collecting
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            CollectorState::Collecting => self.last_line_at.map(|t| t + self.config.silence_timeout),
            CollectorState::Idle => None,
        }
    }

    /// Flush an incomplete block and reset
    pub fn flush(&mut self) -> Option<Traceback> {
        match self.state {
            CollectorState::Collecting => Some(self.take()),
            CollectorState::Idle => None,
        }
    }

    pub fn reset(&mut self) {
        self.state = CollectorState::Idle;
        self.lines.clear();
        self.last_line_at = None;
    }

    fn is_prompt(&self, line: &str) -> bool {
        self.config
            .prompt_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && line.starts_with(prefix.as_str()))
    }

    fn take(&mut self) -> Traceback {
        let lines = std::mem::take(&mut self.lines);
        self.reset();
        Traceback { lines }
    }
}
