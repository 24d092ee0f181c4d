//! Pure classification of a single process output line.
//!
//! The classifier knows nothing about timing or buffering; the traceback
//! collector and the process monitors consume its verdicts.

use regex::Regex;
use std::sync::LazyLock;

use crate::ansi::strip_ansi_codes;

/// `Started server process [12345]` as printed by uvicorn/gunicorn
static STARTED_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)started\s+(?:server\s+)?process\s*\[(\d+)\]")
        .expect("started-process regex is valid")
});

static ERROR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bERROR:|(?i:address already in use)|:\s*command not found\s*$")
        .expect("error signature regex is valid")
});

/// What a single log line means for the owning process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogClassification {
    /// Server reported startup with its pid
    Started { pid: u32 },
    /// Explicit error signature; `detail` is the cleaned line
    Error { detail: String },
    /// First line of a Python traceback
    TracebackStart,
    Ordinary,
}

impl LogClassification {
    pub fn is_ordinary(&self) -> bool {
        matches!(self, LogClassification::Ordinary)
    }
}

/// Classify one raw output line
pub fn classify_line(line: &str) -> LogClassification {
    let clean = strip_ansi_codes(line);

    if is_traceback_start(&clean) {
        return LogClassification::TracebackStart;
    }

    if ERROR_PATTERN.is_match(&clean) {
        return LogClassification::Error {
            detail: clean.trim().to_string(),
        };
    }

    if let Some(pid) = extract_started_pid(&clean) {
        return LogClassification::Started { pid };
    }

    LogClassification::Ordinary
}

/// Check whether a line opens a Python traceback
pub fn is_traceback_start(line: &str) -> bool {
    line.contains("Traceback")
}

/// Extract the bracketed pid from a "server started" line
pub fn extract_started_pid(line: &str) -> Option<u32> {
    STARTED_PATTERN
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_started_line_extracts_pid() {
        assert_eq!(
            classify_line("INFO:     Started server process [48213]"),
            LogClassification::Started { pid: 48213 }
        );
    }

    #[test]
    fn test_started_line_with_ansi() {
        assert_eq!(
            classify_line("\x1b[32mINFO\x1b[0m:     Started server process [7]"),
            LogClassification::Started { pid: 7 }
        );
    }

    #[test]
    fn test_error_prefix() {
        let line = "ERROR:    [Errno 98] error while attempting to bind on address";
        assert_eq!(
            classify_line(line),
            LogClassification::Error {
                detail: line.to_string()
            }
        );
    }

    #[test]
    fn test_address_in_use_is_case_insensitive() {
        assert!(matches!(
            classify_line("OSError: [Errno 48] Address already in use"),
            LogClassification::Error { .. }
        ));
    }

    #[test]
    fn test_command_not_found() {
        assert!(matches!(
            classify_line("bash: openbb-apii: command not found"),
            LogClassification::Error { .. }
        ));
    }

    #[test]
    fn test_traceback_start() {
        assert_eq!(
            classify_line("Traceback (most recent call last):"),
            LogClassification::TracebackStart
        );
    }

    #[test]
    fn test_ordinary_lines() {
        assert!(classify_line("INFO:     Waiting for application startup.").is_ordinary());
        assert!(classify_line("").is_ordinary());
        assert!(classify_line("an error occurred somewhere").is_ordinary());
    }

    #[test]
    fn test_started_without_pid_is_ordinary() {
        assert!(classify_line("Started server process").is_ordinary());
    }
}
