//! Process output routing, log views and search

use envpilot_bridge::BridgeCommand;
use envpilot_core::prelude::*;
use envpilot_core::{LogEntry, ProcessId, ProcessOutput};

use crate::handler::{backends, environments, jupyter, UpdateAction, UpdateResult};
use crate::message::CommandPurpose;
use crate::state::AppState;

/// Route one `process-output` event: append it to the log view, then let
/// the owning monitor inspect every line
pub fn handle_process_output(state: &mut AppState, output: ProcessOutput) -> UpdateResult {
    let now = state.now();
    let process_id = output.process_id;

    let lines: Vec<&str> = if output.output.is_empty() {
        vec![""]
    } else {
        output.output.lines().collect()
    };

    let mut actions = Vec::new();
    for line in lines {
        let entry = if output.timestamp > 0 {
            LogEntry::new(&process_id, line, output.timestamp)
        } else {
            LogEntry::now(&process_id, line)
        };
        state.log_views.get_or_create(&process_id).push(entry);

        if let Some(id) = ProcessId::backend_id(&process_id) {
            actions.extend(backends::handle_output(state, id, line, now));
        } else if let Some(environment) = ProcessId::jupyter_environment(&process_id) {
            actions.extend(jupyter::handle_output(state, environment, line, now));
        } else if let Some(name) = ProcessId::environment_name(&process_id) {
            environments::handle_output(state, name, line, now);
        } else {
            trace!("Output for unmonitored process {}", process_id);
        }
    }

    UpdateResult::maybe_action(UpdateAction::batch(actions))
}

pub fn handle_open(state: &mut AppState, process_id: String) -> UpdateResult {
    let view = state.log_views.get_or_create(&process_id);
    view.open = true;
    view.history_error = None;

    UpdateResult::action(UpdateAction::Batch(vec![
        UpdateAction::run(
            BridgeCommand::RegisterProcessMonitoring {
                process_id: process_id.clone(),
            },
            CommandPurpose::BestEffort,
        ),
        UpdateAction::FetchLogHistory {
            process_id,
            count: None,
        },
    ]))
}

pub fn handle_close(state: &mut AppState, process_id: String) -> UpdateResult {
    let Some(view) = state.log_views.get_mut(&process_id) else {
        return UpdateResult::none();
    };
    if !view.open {
        return UpdateResult::none();
    }
    view.open = false;
    view.search.clear();

    // A running monitor still needs the stream
    if is_monitored(state, &process_id) {
        return UpdateResult::none();
    }

    UpdateResult::action(UpdateAction::run(
        BridgeCommand::UnregisterProcessMonitoring { process_id },
        CommandPurpose::BestEffort,
    ))
}

pub fn handle_history_loaded(
    state: &mut AppState,
    process_id: String,
    entries: Vec<LogEntry>,
) -> UpdateResult {
    debug!("Loaded {} history line(s) for {}", entries.len(), process_id);
    state.log_views.get_or_create(&process_id).merge_history(entries);
    UpdateResult::none()
}

pub fn handle_history_failed(state: &mut AppState, process_id: String, error: String) -> UpdateResult {
    warn!("Loading history for {} failed: {}", process_id, error);
    state.log_views.get_or_create(&process_id).history_error = Some(error);
    UpdateResult::none()
}

// ─────────────────────────────────────────────────────────────────────────────
// Search
// ─────────────────────────────────────────────────────────────────────────────

pub fn handle_search(state: &mut AppState, process_id: String, query: String) -> UpdateResult {
    state.log_views.get_or_create(&process_id).set_query(&query);
    UpdateResult::none()
}

pub fn handle_toggle_case(state: &mut AppState, process_id: String) -> UpdateResult {
    if let Some(view) = state.log_views.get_mut(&process_id) {
        view.toggle_case_sensitive();
    }
    UpdateResult::none()
}

pub fn handle_set_regex(state: &mut AppState, process_id: String, enabled: bool) -> UpdateResult {
    if let Some(view) = state.log_views.get_mut(&process_id) {
        view.set_use_regex(enabled);
    }
    UpdateResult::none()
}

pub fn handle_next_match(state: &mut AppState, process_id: String) -> UpdateResult {
    if let Some(view) = state.log_views.get_mut(&process_id) {
        view.search.next_match();
    }
    UpdateResult::none()
}

pub fn handle_prev_match(state: &mut AppState, process_id: String) -> UpdateResult {
    if let Some(view) = state.log_views.get_mut(&process_id) {
        view.search.prev_match();
    }
    UpdateResult::none()
}

pub fn handle_clear_search(state: &mut AppState, process_id: String) -> UpdateResult {
    if let Some(view) = state.log_views.get_mut(&process_id) {
        view.clear_search();
    }
    UpdateResult::none()
}

fn is_monitored(state: &AppState, process_id: &str) -> bool {
    if let Some(id) = ProcessId::backend_id(process_id) {
        return state
            .backends
            .status(id)
            .is_some_and(|status| status.is_active());
    }
    if let Some(environment) = ProcessId::jupyter_environment(process_id) {
        return state.jupyter.monitors.contains_key(environment)
            && state.jupyter.status(environment) != envpilot_core::JupyterStatus::Stopped;
    }
    if let Some(name) = ProcessId::environment_name(process_id) {
        return state.environments.monitors.contains_key(name);
    }
    false
}
