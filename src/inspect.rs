//! Offline inspection commands: command validation and log classification

use std::io::{BufRead, Write};
use std::time::Instant;

use envpilot_core::prelude::*;
use envpilot_core::{
    classify_line, validate_command, CollectorConfig, CommandValidation, FeedResult, HostOs,
    LogClassification, Traceback, TracebackCollector,
};

/// Validate a backend command and describe the verdict
pub fn validate(command: &str, os: HostOs) -> (CommandValidation, String) {
    let verdict = validate_command(command, os);
    let text = match verdict.reason() {
        None => format!("valid: {}", command),
        Some(reason) => format!("invalid: {}", reason),
    };
    (verdict, text)
}

/// Counts reported at the end of a classify run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClassifySummary {
    pub lines: usize,
    pub errors: usize,
    pub tracebacks: usize,
    pub started_pids: Vec<u32>,
}

/// Classify every line of `input`, writing one verdict per line and each
/// traceback block once it completes
pub fn classify<R: BufRead, W: Write>(
    input: R,
    out: &mut W,
    config: CollectorConfig,
) -> Result<ClassifySummary> {
    let mut collector = TracebackCollector::new(config);
    let mut summary = ClassifySummary::default();

    for (index, line) in input.lines().enumerate() {
        let line = line?;
        let number = index + 1;
        summary.lines += 1;

        match collector.feed_line(&line, Instant::now()) {
            FeedResult::Buffered => writeln!(out, "{:>5} traceback  {}", number, line)?,
            FeedResult::Complete {
                traceback,
                line_consumed,
            } => {
                if line_consumed {
                    writeln!(out, "{:>5} traceback  {}", number, line)?;
                }
                write_traceback(out, &traceback)?;
                summary.tracebacks += 1;
                if !line_consumed {
                    classify_one(out, number, &line, &mut summary)?;
                }
            }
            FeedResult::NotConsumed => classify_one(out, number, &line, &mut summary)?,
        }
    }

    // Input ended mid-block
    if let Some(traceback) = collector.flush() {
        write_traceback(out, &traceback)?;
        summary.tracebacks += 1;
    }

    writeln!(
        out,
        "{} lines, {} errors, {} tracebacks",
        summary.lines, summary.errors, summary.tracebacks
    )?;
    Ok(summary)
}

fn classify_one<W: Write>(
    out: &mut W,
    number: usize,
    line: &str,
    summary: &mut ClassifySummary,
) -> Result<()> {
    match classify_line(line) {
        LogClassification::Started { pid } => {
            summary.started_pids.push(pid);
            writeln!(out, "{:>5} started    pid {}", number, pid)?;
        }
        LogClassification::Error { detail } => {
            summary.errors += 1;
            writeln!(out, "{:>5} error      {}", number, detail)?;
        }
        // Only reachable when the collector refused the line
        LogClassification::TracebackStart => {
            writeln!(out, "{:>5} traceback  {}", number, line)?;
        }
        LogClassification::Ordinary => {
            writeln!(out, "{:>5} ok         {}", number, line)?;
        }
    }
    Ok(())
}

fn write_traceback<W: Write>(out: &mut W, traceback: &Traceback) -> Result<()> {
    writeln!(
        out,
        "----- traceback ({} lines): {}",
        traceback.lines.len(),
        traceback.summary().unwrap_or("<empty>")
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &str) -> (ClassifySummary, String) {
        let mut out = Vec::new();
        let summary = classify(input.as_bytes(), &mut out, CollectorConfig::default()).unwrap();
        (summary, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_validate_reports_reason() {
        let (verdict, text) = validate("openbb-api --port 6900", HostOs::Linux);
        assert!(verdict.is_valid());
        assert!(text.starts_with("valid:"));

        let (verdict, text) = validate("rm -rf /", HostOs::Linux);
        assert!(!verdict.is_valid());
        assert!(text.starts_with("invalid:"));
    }

    #[test]
    fn test_classify_counts_errors_and_pids() {
        let (summary, out) = run(
            "INFO:     Started server process [4242]\n\
             ERROR:    [Errno 98] address already in use\n\
             hello\n",
        );
        assert_eq!(summary.lines, 3);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.started_pids, vec![4242]);
        assert!(out.contains("started    pid 4242"));
        assert!(out.ends_with("3 lines, 1 errors, 0 tracebacks\n"));
    }

    #[test]
    fn test_classify_blank_terminated_traceback() {
        let (summary, out) = run(
            "Traceback (most recent call last):\n\
             \x20 File \"app.py\", line 1, in <module>\n\
             ModuleNotFoundError: No module named 'openbb'\n\
             \n\
             after\n",
        );
        assert_eq!(summary.tracebacks, 1);
        assert!(out.contains("ModuleNotFoundError: No module named 'openbb'"));
        assert!(out.contains("    5 ok         after"));
    }

    #[test]
    fn test_classify_flushes_unterminated_traceback() {
        let (summary, _) = run("Traceback (most recent call last):\nValueError: bad\n");
        assert_eq!(summary.tracebacks, 1);
    }
}
