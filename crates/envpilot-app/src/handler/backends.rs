//! Backend service lifecycle and monitor outcomes

use std::time::Instant;

use serde_json::Value;

use envpilot_bridge::BridgeCommand;
use envpilot_core::prelude::*;
use envpilot_core::{
    validate_backend_name, validate_command, validate_path, BackendService, BackendStatus, HostOs,
    ProcessId,
};

use crate::backends::BackendOperation;
use crate::handler::{UpdateAction, UpdateResult};
use crate::message::CommandPurpose;
use crate::monitor::{BackendMonitor, MonitorOutcome};
use crate::state::AppState;

pub fn handle_refresh(state: &mut AppState) -> UpdateResult {
    state.backends.loading = true;
    UpdateResult::action(UpdateAction::FetchBackends)
}

pub fn handle_loaded(state: &mut AppState, backends: Vec<BackendService>) -> UpdateResult {
    debug!("Host listed {} backend(s)", backends.len());
    let mut backends = backends;

    // Keep the local view of a backend whose start is still unconfirmed;
    // a listing taken before the host saw the start would reset it
    for backend in &mut backends {
        if backend.status == BackendStatus::Stopped
            && state.backends.is_awaiting_confirmation(&backend.id)
        {
            if let Some(local) = state.backends.get(&backend.id) {
                backend.status = local.status;
            }
        }
    }

    state.backends.set_items(backends);
    watch_active(state)
}

/// Give every backend the host reports as active a monitor, including ones
/// started outside this session, and resume monitors left standing down
fn watch_active(state: &mut AppState) -> UpdateResult {
    let config = state.collector_config();
    let failsafe = state.settings.monitor.confirmation_failsafe();

    let active: Vec<String> = state
        .backends
        .items
        .iter()
        .filter(|b| matches!(b.status, BackendStatus::Starting | BackendStatus::Running))
        .filter(|b| state.backends.pending.get(&b.id) != Some(&BackendOperation::Stop))
        .map(|b| b.id.clone())
        .collect();

    let mut commands = Vec::new();
    for id in active {
        let monitor = state.backends.monitors.get(&id);
        if monitor.is_some_and(|m| !m.process.is_standing_down()) {
            continue;
        }
        debug!("Watching output of active backend {}", id);
        state
            .backends
            .monitors
            .entry(id.clone())
            .or_insert_with(|| BackendMonitor::new(&id, config.clone(), failsafe))
            .process
            .watch();
        commands.push(BridgeCommand::RegisterProcessMonitoring {
            process_id: ProcessId::backend(&id),
        });
    }

    if commands.is_empty() {
        return UpdateResult::none();
    }
    UpdateResult::action(UpdateAction::RunCommands {
        commands,
        purpose: CommandPurpose::BestEffort,
    })
}

pub fn handle_load_failed(state: &mut AppState, error: String) -> UpdateResult {
    warn!("Listing backends failed: {}", error);
    state.backends.loading = false;
    state.backends.error = Some(error);
    UpdateResult::none()
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Create or update a backend definition
pub fn handle_save(
    state: &mut AppState,
    backend: BackendService,
    operation: BackendOperation,
) -> UpdateResult {
    let mut backend = backend;
    if let Err(e) = validate_backend(&backend) {
        return reject(state, e);
    }

    let command = match operation {
        BackendOperation::Create => {
            if backend.id.is_empty() {
                backend.id = format!("{:016x}", rand::random::<u64>());
            }
            if state.backends.get(&backend.id).is_some() {
                return reject(
                    state,
                    Error::validation("id", format!("Backend '{}' already exists", backend.id)),
                );
            }
            BridgeCommand::CreateBackend {
                backend: backend.clone(),
            }
        }
        _ => {
            let Some(existing) = state.backends.get(&backend.id) else {
                return reject(
                    state,
                    Error::validation("id", format!("Unknown backend '{}'", backend.id)),
                );
            };
            if existing.status.is_active() {
                return reject(
                    state,
                    Error::validation("backend", "Stop the backend before editing it"),
                );
            }
            BridgeCommand::UpdateBackend {
                backend: backend.clone(),
            }
        }
    };

    let id = backend.id.clone();
    state.backends.pending.insert(id.clone(), operation);
    state.backends.action_errors.remove(&id);
    UpdateResult::action(UpdateAction::run(
        command,
        CommandPurpose::Backend { id, operation },
    ))
}

pub fn handle_delete(state: &mut AppState, id: String) -> UpdateResult {
    match state.backends.status(&id) {
        None => {
            return reject(
                state,
                Error::validation("id", format!("Unknown backend '{}'", id)),
            )
        }
        Some(status) if status.is_active() => {
            return reject(
                state,
                Error::validation("backend", "Stop the backend before deleting it"),
            )
        }
        Some(_) => {}
    }

    state
        .backends
        .pending
        .insert(id.clone(), BackendOperation::Delete);
    UpdateResult::action(UpdateAction::run(
        BridgeCommand::DeleteBackend { id: id.clone() },
        CommandPurpose::Backend {
            id,
            operation: BackendOperation::Delete,
        },
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Start / Stop
// ─────────────────────────────────────────────────────────────────────────────

pub fn handle_start(state: &mut AppState, id: String) -> UpdateResult {
    let now = state.now();
    let config = state.collector_config();
    let failsafe = state.settings.monitor.confirmation_failsafe();

    let Some(backend) = state.backends.get_mut(&id) else {
        return reject(
            state,
            Error::validation("id", format!("Unknown backend '{}'", id)),
        );
    };
    if backend.status.is_active() {
        debug!("Backend {} already {}", id, backend.status);
        return UpdateResult::none();
    }

    backend.status = BackendStatus::Starting;
    backend.error = None;
    backend.url = None;
    backend.pid = None;

    state
        .backends
        .monitors
        .entry(id.clone())
        .or_insert_with(|| BackendMonitor::new(&id, config, failsafe))
        .process
        .arm(now);
    state
        .backends
        .pending
        .insert(id.clone(), BackendOperation::Start);
    state.backends.action_errors.remove(&id);

    info!("Starting backend {}", id);
    UpdateResult::action(UpdateAction::RunCommands {
        commands: vec![
            BridgeCommand::RegisterProcessMonitoring {
                process_id: ProcessId::backend(&id),
            },
            BridgeCommand::StartBackend { id: id.clone() },
        ],
        purpose: CommandPurpose::Backend {
            id,
            operation: BackendOperation::Start,
        },
    })
}

pub fn handle_stop(state: &mut AppState, id: String) -> UpdateResult {
    let Some(backend) = state.backends.get_mut(&id) else {
        return reject(
            state,
            Error::validation("id", format!("Unknown backend '{}'", id)),
        );
    };
    if matches!(
        backend.status,
        BackendStatus::Stopped | BackendStatus::Stopping
    ) {
        return UpdateResult::none();
    }

    backend.status = BackendStatus::Stopping;
    if let Some(monitor) = state.backends.monitors.get_mut(&id) {
        monitor.process.stand_down();
    }
    state
        .backends
        .pending
        .insert(id.clone(), BackendOperation::Stop);

    info!("Stopping backend {}", id);
    UpdateResult::action(UpdateAction::run(
        BridgeCommand::StopBackend { id: id.clone() },
        CommandPurpose::Backend {
            id,
            operation: BackendOperation::Stop,
        },
    ))
}

pub fn handle_url_discovered(state: &mut AppState, id: String, url: String) -> UpdateResult {
    let Some(backend) = state.backends.get_mut(&id) else {
        debug!("URL for unknown backend {}: {}", id, url);
        return UpdateResult::none();
    };
    info!("Backend {} serving at {}", id, url);
    backend.url = Some(url);
    if backend.status == BackendStatus::Starting {
        backend.status = BackendStatus::Running;
    }
    if let Some(monitor) = state.backends.monitors.get_mut(&id) {
        monitor.process.disarm();
    }
    UpdateResult::none()
}

// ─────────────────────────────────────────────────────────────────────────────
// Output monitoring
// ─────────────────────────────────────────────────────────────────────────────

pub fn handle_output(
    state: &mut AppState,
    id: &str,
    line: &str,
    now: Instant,
) -> Option<UpdateAction> {
    let outcome = state.backends.monitors.get_mut(id)?.process.feed_line(line, now)?;
    apply_outcome(state, id, outcome)
}

pub fn handle_tick(state: &mut AppState, now: Instant) -> Vec<UpdateAction> {
    let outcomes: Vec<(String, MonitorOutcome)> = state
        .backends
        .monitors
        .iter_mut()
        .filter_map(|(id, m)| m.process.tick(now).map(|o| (id.clone(), o)))
        .collect();

    outcomes
        .into_iter()
        .filter_map(|(id, outcome)| apply_outcome(state, &id, outcome))
        .collect()
}

fn apply_outcome(state: &mut AppState, id: &str, outcome: MonitorOutcome) -> Option<UpdateAction> {
    match outcome {
        MonitorOutcome::Failed { detail } => {
            let backend = state.backends.get_mut(id)?;
            if matches!(
                backend.status,
                BackendStatus::Stopping | BackendStatus::Stopped
            ) {
                debug!("Ignoring output of stopping backend {}: {}", id, detail);
                return None;
            }
            error!("Backend {} failed: {}", id, detail);
            backend.status = BackendStatus::Error;
            backend.error = Some(detail);
            let updated = backend.clone();

            state
                .backends
                .pending
                .insert(id.to_string(), BackendOperation::MonitorStop);

            // Stop the process and persist the error so a refresh keeps it
            Some(UpdateAction::RunCommands {
                commands: vec![
                    BridgeCommand::StopBackend { id: id.to_string() },
                    BridgeCommand::UpdateBackend { backend: updated },
                ],
                purpose: CommandPurpose::Backend {
                    id: id.to_string(),
                    operation: BackendOperation::MonitorStop,
                },
            })
        }
        MonitorOutcome::PidDiscovered { pid } => {
            let backend = state.backends.get_mut(id)?;
            backend.pid = Some(pid);
            if backend.status == BackendStatus::Starting {
                backend.status = BackendStatus::Running;
            }
            None
        }
        MonitorOutcome::ConfirmationExpired => {
            debug!("Backend {} never confirmed startup", id);
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host results
// ─────────────────────────────────────────────────────────────────────────────

pub fn handle_command_result(
    state: &mut AppState,
    id: &str,
    operation: BackendOperation,
    result: std::result::Result<Value, String>,
) -> UpdateResult {
    state.backends.pending.remove(id);

    match (operation, result) {
        (BackendOperation::MonitorStop, Ok(_)) => {
            info!("Stopped failed backend {}", id);
            refresh(state)
        }
        (BackendOperation::MonitorStop, Err(error)) => {
            // Local error state stays; the next refresh reconciles
            warn!("Stopping failed backend {} failed: {}", id, error);
            UpdateResult::none()
        }

        (BackendOperation::Stop, Ok(_)) => {
            let unregister = UpdateAction::run(
                BridgeCommand::UnregisterProcessMonitoring {
                    process_id: ProcessId::backend(id),
                },
                CommandPurpose::BestEffort,
            );
            state.backends.loading = true;
            UpdateResult::action(UpdateAction::Batch(vec![
                UpdateAction::FetchBackends,
                unregister,
            ]))
        }

        (BackendOperation::Start, Err(error)) => {
            if let Some(backend) = state.backends.get_mut(id) {
                backend.status = BackendStatus::Error;
                backend.error = Some(error.clone());
            }
            if let Some(monitor) = state.backends.monitors.get_mut(id) {
                monitor.process.disarm();
            }
            record_error(state, id, operation, error);
            UpdateResult::none()
        }

        (BackendOperation::Stop, Err(error)) => {
            // Unknown state after a failed stop; ask the host
            record_error(state, id, operation, error);
            refresh(state)
        }

        (_, Ok(_)) => {
            debug!("Backend {} {} done", id, operation.as_str());
            refresh(state)
        }

        (_, Err(error)) => {
            record_error(state, id, operation, error);
            UpdateResult::none()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn validate_backend(backend: &BackendService) -> Result<()> {
    validate_backend_name(&backend.name)?;
    validate_command(&backend.command, HostOs::current()).into_result()?;
    if let Some(dir) = &backend.working_directory {
        validate_path(dir)?;
    }
    if let Some(file) = &backend.env_file {
        validate_path(file)?;
    }
    Ok(())
}

fn refresh(state: &mut AppState) -> UpdateResult {
    state.backends.loading = true;
    UpdateResult::action(UpdateAction::FetchBackends)
}

fn record_error(state: &mut AppState, id: &str, operation: BackendOperation, error: String) {
    warn!("Backend {} {} failed: {}", id, operation.as_str(), error);
    state
        .backends
        .action_errors
        .insert(id.to_string(), error.clone());
    state.set_error(error);
}

fn reject(state: &mut AppState, error: Error) -> UpdateResult {
    debug!("Rejected: {}", error);
    state.set_error(error.to_string());
    UpdateResult::none()
}
