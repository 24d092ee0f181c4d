//! Environment and extension handlers

use std::time::Instant;

use serde_json::Value;

use envpilot_bridge::BridgeCommand;
use envpilot_core::prelude::*;
use envpilot_core::{
    is_benign_warning, validate_environment_name, validate_package_spec, validate_path,
    Environment, Extension, ProcessId,
};

use crate::environments::{EnvironmentOperation, ExtensionOperation};
use crate::handler::{UpdateAction, UpdateResult};
use crate::message::CommandPurpose;
use crate::monitor::{EnvironmentMonitor, MonitorOutcome};
use crate::state::AppState;

pub fn handle_refresh(state: &mut AppState) -> UpdateResult {
    state.environments.loading = true;
    UpdateResult::action(UpdateAction::FetchEnvironments)
}

pub fn handle_loaded(state: &mut AppState, environments: Vec<Environment>) -> UpdateResult {
    debug!("Host listed {} environment(s)", environments.len());
    state.cache.settle_pending_deletions(&environments);
    let visible: Vec<Environment> = environments
        .iter()
        .filter(|e| !state.cache.is_pending_deletion(&e.name))
        .cloned()
        .collect();
    state.cache.put_environments(&visible);
    state.environments.set_items(environments, &state.cache);
    UpdateResult::none()
}

pub fn handle_load_failed(state: &mut AppState, error: String) -> UpdateResult {
    warn!("Listing environments failed: {}", error);
    state.environments.loading = false;
    state.environments.error = Some(error);
    UpdateResult::none()
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment operations
// ─────────────────────────────────────────────────────────────────────────────

pub fn handle_create(
    state: &mut AppState,
    name: String,
    python_version: String,
    extensions: Vec<String>,
) -> UpdateResult {
    let checked = validate_new_name(state, &name).and_then(|_| {
        extensions
            .iter()
            .try_for_each(|spec| validate_package_spec(spec))
    });
    if let Err(e) = checked {
        return reject(state, e);
    }

    let process_id = begin_operation(state, &name, EnvironmentOperation::Create);
    UpdateResult::action(UpdateAction::RunCommands {
        commands: vec![
            BridgeCommand::RegisterProcessMonitoring {
                process_id: process_id.clone(),
            },
            BridgeCommand::CreateEnvironment {
                name: name.clone(),
                python_version,
                extensions,
                process_id,
            },
        ],
        purpose: CommandPurpose::Environment {
            name,
            operation: EnvironmentOperation::Create,
        },
    })
}

pub fn handle_create_from_requirements(
    state: &mut AppState,
    name: String,
    file_path: String,
    directory: String,
) -> UpdateResult {
    let checked = validate_new_name(state, &name)
        .and_then(|_| validate_path(&file_path))
        .and_then(|_| validate_path(&directory));
    if let Err(e) = checked {
        return reject(state, e);
    }

    let operation = EnvironmentOperation::CreateFromRequirements;
    let process_id = begin_operation(state, &name, operation);
    UpdateResult::action(UpdateAction::RunCommands {
        commands: vec![
            BridgeCommand::RegisterProcessMonitoring {
                process_id: process_id.clone(),
            },
            BridgeCommand::CreateEnvironmentFromRequirements {
                name: name.clone(),
                file_path,
                directory,
                process_id,
            },
        ],
        purpose: CommandPurpose::Environment { name, operation },
    })
}

pub fn handle_update(state: &mut AppState, name: String, directory: String) -> UpdateResult {
    let checked = validate_existing(state, &name).and_then(|_| validate_path(&directory));
    if let Err(e) = checked {
        return reject(state, e);
    }

    let operation = EnvironmentOperation::Update;
    let process_id = begin_operation(state, &name, operation);
    UpdateResult::action(UpdateAction::RunCommands {
        commands: vec![
            BridgeCommand::RegisterProcessMonitoring { process_id },
            BridgeCommand::UpdateEnvironment {
                environment: name.clone(),
                directory,
            },
        ],
        purpose: CommandPurpose::Environment { name, operation },
    })
}

pub fn handle_remove(state: &mut AppState, name: String) -> UpdateResult {
    if let Err(e) = validate_existing(state, &name) {
        return reject(state, e);
    }
    if state
        .environments
        .get(&name)
        .is_some_and(Environment::is_base)
    {
        return reject(
            state,
            Error::validation("name", "The base environment cannot be removed"),
        );
    }

    // Hidden until the host stops listing it, so an in-flight refresh
    // cannot bring it back
    state.cache.mark_pending_deletion(&name);
    state.environments.items.retain(|e| e.name != name);
    state
        .environments
        .operations
        .insert(name.clone(), EnvironmentOperation::Remove);

    UpdateResult::action(UpdateAction::run(
        BridgeCommand::RemoveEnvironment { name: name.clone() },
        CommandPurpose::Environment {
            name,
            operation: EnvironmentOperation::Remove,
        },
    ))
}

pub fn handle_operation_result(
    state: &mut AppState,
    name: &str,
    operation: EnvironmentOperation,
    result: std::result::Result<Value, String>,
) -> UpdateResult {
    state.environments.operations.remove(name);
    let monitored = state.environments.monitors.remove(name).is_some();

    match result {
        Ok(_) => {
            info!("Environment {} {} finished", name, operation.as_str());
            state.environments.operation_errors.remove(name);
            if operation == EnvironmentOperation::Remove {
                state.cache.remove_environment(name);
            }
        }
        Err(error) => {
            warn!("Environment {} {} failed: {}", name, operation.as_str(), error);
            if operation == EnvironmentOperation::Remove {
                state.cache.clear_pending_deletion(name);
            }
            state
                .environments
                .operation_errors
                .insert(name.to_string(), error.clone());
            state.set_error(error);
        }
    }

    // Ground truth either way
    state.environments.loading = true;
    let mut actions = vec![UpdateAction::FetchEnvironments];
    if monitored {
        actions.push(UpdateAction::run(
            BridgeCommand::UnregisterProcessMonitoring {
                process_id: ProcessId::environment(name),
            },
            CommandPurpose::BestEffort,
        ));
    }
    UpdateResult::maybe_action(UpdateAction::batch(actions))
}

/// Output line from an environment operation
pub fn handle_output(state: &mut AppState, name: &str, line: &str, now: Instant) {
    let Some(monitor) = state.environments.monitors.get_mut(name) else {
        return;
    };
    if let Some(outcome) = monitor.feed_line(line, now) {
        apply_outcome(state, name, outcome);
    }
}

pub fn handle_tick(state: &mut AppState, now: Instant) {
    let outcomes: Vec<(String, MonitorOutcome)> = state
        .environments
        .monitors
        .iter_mut()
        .filter_map(|(name, m)| m.process.tick(now).map(|o| (name.clone(), o)))
        .collect();
    for (name, outcome) in outcomes {
        apply_outcome(state, &name, outcome);
    }
}

fn apply_outcome(state: &mut AppState, name: &str, outcome: MonitorOutcome) {
    if let MonitorOutcome::Failed { detail } = outcome {
        // The host rejects the operation itself; keep the detail for display
        state
            .environments
            .operation_errors
            .insert(name.to_string(), detail);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extensions
// ─────────────────────────────────────────────────────────────────────────────

pub fn handle_load_extensions(state: &mut AppState, environment: String) -> UpdateResult {
    state.environments.extensions_mut(&environment).loading = true;
    UpdateResult::action(UpdateAction::FetchExtensions { environment })
}

pub fn handle_extensions_loaded(
    state: &mut AppState,
    environment: String,
    extensions: Vec<Extension>,
) -> UpdateResult {
    let list = state.environments.extensions_mut(&environment);
    list.items = extensions.clone();
    list.loading = false;
    list.error = None;
    state.cache.put_extensions(&environment, extensions);
    UpdateResult::none()
}

pub fn handle_extensions_load_failed(
    state: &mut AppState,
    environment: String,
    error: String,
) -> UpdateResult {
    warn!("Listing extensions of {} failed: {}", environment, error);
    let list = state.environments.extensions_mut(&environment);
    list.loading = false;
    list.error = Some(error);
    UpdateResult::none()
}

pub fn handle_install_extensions(
    state: &mut AppState,
    environment: String,
    packages: Vec<String>,
) -> UpdateResult {
    let checked = validate_existing(state, &environment).and_then(|_| {
        packages
            .iter()
            .try_for_each(|spec| validate_package_spec(spec))
    });
    if let Err(e) = checked {
        return reject(state, e);
    }
    if packages.is_empty() {
        return UpdateResult::none();
    }

    state.environments.extensions_mut(&environment).busy = true;
    UpdateResult::action(UpdateAction::run(
        BridgeCommand::InstallExtensions {
            environment: environment.clone(),
            extensions: packages,
        },
        CommandPurpose::Extension {
            environment,
            operation: ExtensionOperation::Install,
        },
    ))
}

pub fn handle_change_extension(
    state: &mut AppState,
    environment: String,
    package: String,
    directory: String,
    operation: ExtensionOperation,
) -> UpdateResult {
    let checked = validate_existing(state, &environment)
        .and_then(|_| validate_package_spec(&package))
        .and_then(|_| validate_path(&directory));
    if let Err(e) = checked {
        return reject(state, e);
    }

    let command = match operation {
        ExtensionOperation::Remove => BridgeCommand::RemoveExtension {
            environment: environment.clone(),
            package,
            directory,
        },
        ExtensionOperation::Update => BridgeCommand::UpdateExtension {
            environment: environment.clone(),
            package,
            directory,
        },
        ExtensionOperation::Install => BridgeCommand::InstallExtensions {
            environment: environment.clone(),
            extensions: vec![package],
        },
    };

    state.environments.extensions_mut(&environment).busy = true;
    UpdateResult::action(UpdateAction::run(
        command,
        CommandPurpose::Extension {
            environment,
            operation,
        },
    ))
}

pub fn handle_extension_result(
    state: &mut AppState,
    environment: &str,
    operation: ExtensionOperation,
    result: std::result::Result<Value, String>,
) -> UpdateResult {
    let patterns = state.settings.installer.benign_warning_patterns.clone();
    let list = state.environments.extensions_mut(environment);
    list.busy = false;

    match result {
        Ok(_) => list.error = None,
        Err(error) if is_benign_warning(&error, &patterns) => {
            warn!(
                "Extension {} in {} reported a warning only: {}",
                operation.as_str(),
                environment,
                error
            );
            list.error = None;
        }
        Err(error) => {
            warn!(
                "Extension {} in {} failed: {}",
                operation.as_str(),
                environment,
                error
            );
            list.error = Some(error.clone());
            state.set_error(error);
        }
    }

    // Confirm by re-fetching the list
    state.environments.extensions_mut(environment).loading = true;
    UpdateResult::action(UpdateAction::FetchExtensions {
        environment: environment.to_string(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn validate_new_name(state: &AppState, name: &str) -> Result<()> {
    validate_environment_name(name)?;
    if state.environments.contains(name) {
        return Err(Error::validation(
            "name",
            format!("Environment '{}' already exists", name),
        ));
    }
    Ok(())
}

fn validate_existing(state: &AppState, name: &str) -> Result<()> {
    if !state.environments.contains(name) {
        return Err(Error::validation(
            "environment",
            format!("Unknown environment '{}'", name),
        ));
    }
    if state.environments.is_busy(name) {
        return Err(Error::validation(
            "environment",
            format!("Environment '{}' is busy", name),
        ));
    }
    Ok(())
}

/// Record the operation and start watching its output
fn begin_operation(state: &mut AppState, name: &str, operation: EnvironmentOperation) -> String {
    let config = state.collector_config();
    let monitor = EnvironmentMonitor::new(name, config);
    let process_id = monitor.process.process_id().to_string();
    state.environments.monitors.insert(name.to_string(), monitor);
    state
        .environments
        .operations
        .insert(name.to_string(), operation);
    state.environments.operation_errors.remove(name);
    process_id
}

fn reject(state: &mut AppState, error: Error) -> UpdateResult {
    debug!("Rejected: {}", error);
    state.set_error(error.to_string());
    UpdateResult::none()
}
