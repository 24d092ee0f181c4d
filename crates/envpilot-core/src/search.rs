//! Search within a process log view

use std::collections::VecDeque;

use regex::{Regex, RegexBuilder};

use crate::types::LogEntry;

/// A single match within a log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    /// Index of the entry in the log buffer
    pub entry_index: usize,
    /// Byte offset of match start within the entry content
    pub start: usize,
    /// Byte offset of match end within the entry content
    pub end: usize,
}

/// Query, options and results of a log search
#[derive(Debug, Clone, Default)]
pub struct SearchState {
    pub query: String,
    /// Off by default: `BAR` finds `bar`
    pub case_sensitive: bool,
    /// Treat the query as a regular expression instead of literal text
    pub use_regex: bool,
    pub matches: Vec<SearchMatch>,
    /// Current match index for next/previous navigation
    pub current_match: Option<usize>,
    /// Compilation error for an invalid regex query
    pub error: Option<String>,
    /// Pattern compiled by the last `execute_search`, reused for appended lines
    compiled: Option<Regex>,
}

impl SearchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.query.clear();
        self.matches.clear();
        self.current_match = None;
        self.error = None;
        self.compiled = None;
    }

    /// Set the query; matches are refreshed by the next `execute_search`
    pub fn set_query(&mut self, query: &str) {
        self.query = query.to_string();
        self.compiled = None;
        if query.is_empty() {
            self.matches.clear();
            self.current_match = None;
            self.error = None;
        }
    }

    pub fn set_case_sensitive(&mut self, case_sensitive: bool) {
        self.case_sensitive = case_sensitive;
        self.compiled = None;
    }

    pub fn toggle_case_sensitive(&mut self) {
        self.case_sensitive = !self.case_sensitive;
        self.compiled = None;
    }

    pub fn set_use_regex(&mut self, use_regex: bool) {
        self.use_regex = use_regex;
        self.compiled = None;
    }

    pub fn has_matches(&self) -> bool {
        !self.matches.is_empty()
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    /// Get the current match
    pub fn current_match(&self) -> Option<&SearchMatch> {
        self.current_match.and_then(|i| self.matches.get(i))
    }

    /// Move to the next match (wraps around)
    pub fn next_match(&mut self) {
        if self.matches.is_empty() {
            self.current_match = None;
            return;
        }

        self.current_match = Some(match self.current_match {
            Some(i) => (i + 1) % self.matches.len(),
            None => 0,
        });
    }

    /// Move to the previous match (wraps around)
    pub fn prev_match(&mut self) {
        if self.matches.is_empty() {
            self.current_match = None;
            return;
        }

        self.current_match = Some(match self.current_match {
            Some(0) | None => self.matches.len() - 1,
            Some(i) => i - 1,
        });
    }

    /// Format the search status for display
    pub fn display_status(&self) -> String {
        if self.query.is_empty() {
            return String::new();
        }
        if let Some(error) = &self.error {
            return format!("[{}]", error);
        }
        if self.matches.is_empty() {
            return "[No matches]".to_string();
        }

        match self.current_match {
            Some(i) => format!("[{}/{} matches]", i + 1, self.matches.len()),
            None => format!("[{} matches]", self.matches.len()),
        }
    }

    /// Matches within one entry, for highlighting
    pub fn matches_for_entry(&self, entry_index: usize) -> impl Iterator<Item = &SearchMatch> {
        self.matches
            .iter()
            .filter(move |m| m.entry_index == entry_index)
    }

    /// Run the search over `logs`. Returns true if the match list changed.
    pub fn execute_search(&mut self, logs: &VecDeque<LogEntry>) -> bool {
        self.compiled = None;
        if self.query.is_empty() {
            let changed = !self.matches.is_empty();
            self.matches.clear();
            self.current_match = None;
            return changed;
        }

        let regex = match self.build_regex() {
            Ok(r) => {
                self.error = None;
                r
            }
            Err(e) => {
                self.error = Some(format!("Invalid regex: {}", e));
                let changed = !self.matches.is_empty();
                self.matches.clear();
                self.current_match = None;
                return changed;
            }
        };

        let new_matches: Vec<SearchMatch> = logs
            .iter()
            .enumerate()
            .flat_map(|(entry_index, entry)| find_in_entry(&regex, entry, entry_index))
            .collect();
        self.compiled = Some(regex);

        let changed = new_matches != self.matches;
        self.matches = new_matches;
        if let Some(i) = self.current_match {
            if i >= self.matches.len() {
                self.current_match = if self.matches.is_empty() {
                    None
                } else {
                    Some(0)
                };
            }
        }
        changed
    }

    /// Search one entry appended at `entry_index` without rescanning the
    /// rest. `evicted` means the oldest entry was dropped to make room, so
    /// every earlier match moves down by one. Returns true if the match
    /// list changed.
    pub fn search_appended(&mut self, entry: &LogEntry, entry_index: usize, evicted: bool) -> bool {
        let mut changed = false;

        if evicted && !self.matches.is_empty() {
            let before = self.matches.len();
            self.matches.retain(|m| m.entry_index > 0);
            for m in &mut self.matches {
                m.entry_index -= 1;
            }
            let dropped = before - self.matches.len();
            self.current_match = match self.current_match {
                Some(i) if i >= dropped => Some(i - dropped),
                Some(_) if !self.matches.is_empty() => Some(0),
                _ => None,
            };
            changed = true;
        }

        let Some(regex) = &self.compiled else {
            return changed;
        };
        let found = find_in_entry(regex, entry, entry_index);
        changed |= !found.is_empty();
        self.matches.extend(found);
        changed
    }

    fn build_regex(&self) -> std::result::Result<Regex, regex::Error> {
        let pattern = if self.use_regex {
            self.query.clone()
        } else {
            regex::escape(&self.query)
        };
        RegexBuilder::new(&pattern)
            .case_insensitive(!self.case_sensitive)
            .build()
    }
}

fn find_in_entry(regex: &Regex, entry: &LogEntry, entry_index: usize) -> Vec<SearchMatch> {
    regex
        .find_iter(&entry.content)
        .filter(|m| !m.is_empty())
        .map(|m| SearchMatch {
            entry_index,
            start: m.start(),
            end: m.end(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logs(lines: &[&str]) -> VecDeque<LogEntry> {
        lines
            .iter()
            .enumerate()
            .map(|(i, l)| LogEntry::new("backend-1", *l, i as i64))
            .collect()
    }

    #[test]
    fn test_plain_query_finds_both_entries() {
        let logs = logs(&["foo bar", "bar baz"]);
        let mut search = SearchState::new();
        search.set_query("bar");
        assert!(search.execute_search(&logs));
        assert_eq!(search.match_count(), 2);
        assert_eq!(
            search.matches[0],
            SearchMatch {
                entry_index: 0,
                start: 4,
                end: 7
            }
        );
    }

    #[test]
    fn test_case_sensitivity_toggle() {
        let logs = logs(&["foo bar", "bar baz"]);
        let mut search = SearchState::new();
        search.set_query("BAR");

        search.execute_search(&logs);
        assert_eq!(search.match_count(), 2);

        search.toggle_case_sensitive();
        search.execute_search(&logs);
        assert_eq!(search.match_count(), 0);
        assert_eq!(search.display_status(), "[No matches]");
    }

    #[test]
    fn test_literal_query_is_escaped() {
        let logs = logs(&["GET /api (200)", "GET /api 200"]);
        let mut search = SearchState::new();
        search.set_query("(200)");
        search.execute_search(&logs);
        assert_eq!(search.match_count(), 1);
        assert_eq!(search.matches[0].entry_index, 0);
    }

    #[test]
    fn test_regex_mode() {
        let logs = logs(&["port 8000", "port 8080", "no port"]);
        let mut search = SearchState::new();
        search.set_use_regex(true);
        search.set_query(r"port \d+");
        search.execute_search(&logs);
        assert_eq!(search.match_count(), 2);
    }

    #[test]
    fn test_invalid_regex_sets_error() {
        let logs = logs(&["anything"]);
        let mut search = SearchState::new();
        search.set_use_regex(true);
        search.set_query("[unclosed");
        search.execute_search(&logs);
        assert!(search.error.is_some());
        assert!(!search.has_matches());
        assert!(search.display_status().starts_with("[Invalid regex"));
    }

    #[test]
    fn test_navigation_wraps() {
        let logs = logs(&["a", "a", "a"]);
        let mut search = SearchState::new();
        search.set_query("a");
        search.execute_search(&logs);

        search.next_match();
        assert_eq!(search.current_match, Some(0));
        search.prev_match();
        assert_eq!(search.current_match, Some(2));
        search.next_match();
        assert_eq!(search.current_match, Some(0));
        assert_eq!(search.display_status(), "[1/3 matches]");
    }

    #[test]
    fn test_appended_entry_matches_full_rescan() {
        let mut logs = logs(&["error one", "fine", "error two"]);
        let mut search = SearchState::new();
        search.set_query("error");
        search.execute_search(&logs);
        search.next_match();
        search.next_match();
        assert_eq!(search.current_match, Some(1));

        // Buffer of three: the oldest entry is evicted
        let appended = LogEntry::new("backend-1", "error three", 3);
        logs.pop_front();
        logs.push_back(appended.clone());
        assert!(search.search_appended(&appended, 2, true));

        let incremental = search.matches.clone();
        assert_eq!(search.current_match, Some(0));
        assert_eq!(search.matches[0].entry_index, 1);

        let mut rescan = SearchState::new();
        rescan.set_query("error");
        rescan.execute_search(&logs);
        assert_eq!(incremental, rescan.matches);
    }

    #[test]
    fn test_appended_entry_needs_a_compiled_query() {
        let mut search = SearchState::new();
        search.set_query("error");
        let entry = LogEntry::new("backend-1", "error", 0);
        assert!(!search.search_appended(&entry, 0, false));
        assert!(!search.has_matches());
    }

    #[test]
    fn test_empty_query_clears() {
        let logs = logs(&["a"]);
        let mut search = SearchState::new();
        search.set_query("a");
        search.execute_search(&logs);
        search.set_query("");
        assert!(!search.has_matches());
        assert_eq!(search.display_status(), "");
    }

    #[test]
    fn test_multiple_matches_in_one_entry() {
        let logs = logs(&["bar bar"]);
        let mut search = SearchState::new();
        search.set_query("bar");
        search.execute_search(&logs);
        assert_eq!(search.matches_for_entry(0).count(), 2);
    }
}
