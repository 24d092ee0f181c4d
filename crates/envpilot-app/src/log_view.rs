//! Per-process log views with search

use std::collections::HashMap;

use envpilot_core::{LogBuffer, LogEntry, SearchState};

/// Log history and search for one process id
#[derive(Debug, Clone)]
pub struct LogView {
    pub process_id: String,
    pub buffer: LogBuffer,
    pub search: SearchState,
    /// Host-side monitoring was requested for this view
    pub open: bool,
    pub history_loaded: bool,
    pub history_error: Option<String>,
    /// Live lines appended since the view was created
    pub received: u64,
}

impl LogView {
    pub fn new(process_id: impl Into<String>, max_lines: usize) -> Self {
        Self {
            process_id: process_id.into(),
            buffer: LogBuffer::new(max_lines),
            search: SearchState::new(),
            open: false,
            history_loaded: false,
            history_error: None,
            received: 0,
        }
    }

    /// Append a live line and keep search results current
    pub fn push(&mut self, entry: LogEntry) {
        let evicted = self.buffer.push(entry);
        self.received += 1;
        if self.search.query.is_empty() {
            return;
        }
        let index = self.buffer.len() - 1;
        if let Some(entry) = self.buffer.entries().back() {
            self.search.search_appended(entry, index, evicted);
        }
    }

    /// Merge the host's history in front of the live lines.
    ///
    /// Live lines already received that are not newer than the last history
    /// entry are duplicates of it and are dropped.
    pub fn merge_history(&mut self, history: Vec<LogEntry>) {
        let cutoff = history.last().map(|e| e.timestamp).unwrap_or(i64::MIN);
        let live: Vec<LogEntry> = self
            .buffer
            .entries()
            .iter()
            .filter(|e| e.timestamp > cutoff)
            .cloned()
            .collect();

        self.buffer.clear();
        for entry in history.into_iter().chain(live) {
            self.buffer.push(entry);
        }
        self.history_loaded = true;
        self.history_error = None;
        self.refresh_search();
    }

    pub fn set_query(&mut self, query: &str) {
        self.search.set_query(query);
        self.refresh_search();
    }

    pub fn toggle_case_sensitive(&mut self) {
        self.search.toggle_case_sensitive();
        self.refresh_search();
    }

    pub fn set_use_regex(&mut self, use_regex: bool) {
        self.search.set_use_regex(use_regex);
        self.refresh_search();
    }

    pub fn clear_search(&mut self) {
        self.search.clear();
    }

    fn refresh_search(&mut self) {
        self.search.execute_search(self.buffer.entries());
    }
}

/// All log views, keyed by process id
#[derive(Debug, Clone)]
pub struct LogViews {
    views: HashMap<String, LogView>,
    max_lines: usize,
}

impl LogViews {
    pub fn new(max_lines: usize) -> Self {
        Self {
            views: HashMap::new(),
            max_lines,
        }
    }

    pub fn get(&self, process_id: &str) -> Option<&LogView> {
        self.views.get(process_id)
    }

    pub fn get_mut(&mut self, process_id: &str) -> Option<&mut LogView> {
        self.views.get_mut(process_id)
    }

    pub fn get_or_create(&mut self, process_id: &str) -> &mut LogView {
        let max = self.max_lines;
        self.views
            .entry(process_id.to_string())
            .or_insert_with(|| LogView::new(process_id, max))
    }

    pub fn remove(&mut self, process_id: &str) -> Option<LogView> {
        self.views.remove(process_id)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogView> {
        self.views.values()
    }

    pub fn total_lines(&self) -> usize {
        self.views.values().map(|v| v.buffer.len()).sum()
    }
}
