//! ANSI escape code handling for streamed process output
//!
//! Uvicorn, pip and conda colour their output and redraw progress bars with
//! carriage returns. Pattern matching runs on the cleaned text.

use regex::Regex;
use std::sync::LazyLock;

/// Regex pattern for ANSI escape sequences.
///
/// Covers CSI sequences (colours, cursor movement), OSC sequences
/// (hyperlinks, titles) and simple two-byte escapes.
static ANSI_ESCAPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \x1b\[[0-9;?]*[A-Za-z]               # CSI sequences
        | \x1b\][^\x07\x1b]*(?:\x07|\x1b\\)  # OSC sequences
        | \x1b[A-Za-z]                       # Simple escapes
        ",
    )
    .expect("ANSI regex pattern is valid")
});

/// Strip ANSI escape sequences and progress-bar redraws from a line.
///
/// When a line contains carriage returns only the text after the last one
/// is kept, which is what a terminal would show.
///
/// # Examples
///
/// ```
/// use envpilot_core::strip_ansi_codes;
///
/// let input = "\x1b[32mINFO\x1b[0m:     Application startup complete.";
/// assert_eq!(strip_ansi_codes(input), "INFO:     Application startup complete.");
/// ```
pub fn strip_ansi_codes(input: &str) -> String {
    let without_ansi = ANSI_ESCAPE_PATTERN.replace_all(input, "");
    let trimmed = without_ansi.trim_end_matches(['\r', '\n']);
    match trimmed.rfind('\r') {
        Some(idx) => trimmed[idx + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

/// Check if a string contains ANSI escape sequences.
pub fn contains_ansi_codes(input: &str) -> bool {
    ANSI_ESCAPE_PATTERN.is_match(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_simple_color_codes() {
        let input = "\x1b[31mERROR\x1b[0m: boom";
        assert_eq!(strip_ansi_codes(input), "ERROR: boom");
    }

    #[test]
    fn test_strip_256_color_codes() {
        let input = "\x1b[38;5;244mINFO:     Waiting for application startup.\x1b[0m";
        assert_eq!(
            strip_ansi_codes(input),
            "INFO:     Waiting for application startup."
        );
    }

    #[test]
    fn test_progress_bar_redraw_keeps_last_frame() {
        let input = "Downloading  10%\rDownloading  55%\rDownloading 100%";
        assert_eq!(strip_ansi_codes(input), "Downloading 100%");
    }

    #[test]
    fn test_trailing_newline_removed() {
        assert_eq!(strip_ansi_codes("hello\r\n"), "hello");
    }

    #[test]
    fn test_no_codes() {
        let input = "Plain text with no codes";
        assert_eq!(strip_ansi_codes(input), input);
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(strip_ansi_codes(""), "");
    }

    #[test]
    fn test_contains_ansi_codes() {
        assert!(contains_ansi_codes("\x1b[31mred\x1b[0m"));
        assert!(!contains_ansi_codes("plain text"));
    }
}
