//! Installer phase transitions

use std::time::Instant;

use serde_json::Value;

use envpilot_bridge::BridgeCommand;
use envpilot_core::prelude::*;
use envpilot_core::{is_benign_warning, validate_path, InstallPhase, InstallProgress, InstallationStatus};

use crate::handler::{UpdateAction, UpdateResult};
use crate::installer::{phase_from_progress, phase_from_status, InstallOutcome, DEFAULT_ENVIRONMENT};
use crate::message::{CommandPurpose, Message};
use crate::state::AppState;

/// Begin installing into `directory`
pub fn handle_start(state: &mut AppState, directory: String) -> UpdateResult {
    let installer = &state.installer;
    if installer.is_started() && !installer.phase.is_terminal() {
        debug!("Installer already running in {:?}", installer.directory);
        return UpdateResult::none();
    }

    if let Err(e) = validate_path(&directory) {
        state.installer.error = Some(e.to_string());
        state.set_error(e.to_string());
        return UpdateResult::none();
    }

    let now = state.now();
    let interval = state.settings.installer.poll_interval();
    let installer = &mut state.installer;
    installer.reset();
    installer.directory = Some(directory.clone());
    installer.phase = InstallPhase::Downloading;
    installer.message = "Starting installation".to_string();
    installer.next_poll = Some(now + interval);

    info!("Installer started in {}", directory);
    UpdateResult::action(UpdateAction::run(
        BridgeCommand::InstallConda { directory },
        CommandPurpose::InstallerStart,
    ))
}

/// The host announced where it is installing
pub fn handle_installation_directory(state: &mut AppState, directory: String) -> UpdateResult {
    let installer = &mut state.installer;
    if installer.cancelled {
        return UpdateResult::none();
    }
    if installer.directory.is_none() && installer.phase == InstallPhase::Preparing {
        return UpdateResult::message(Message::StartInstallation { directory });
    }
    if installer.directory.is_none() {
        installer.directory = Some(directory);
    }
    UpdateResult::none()
}

pub fn handle_progress(state: &mut AppState, progress: InstallProgress) -> UpdateResult {
    let installer = &mut state.installer;
    if !installer.accepts_events() {
        debug!("Ignoring installer event after cancel: {}", progress.message);
        return UpdateResult::none();
    }

    if !progress.message.is_empty() {
        installer.push_log(progress.message.clone());
        installer.message = progress.message.clone();
    }
    installer.progress = progress.progress;

    if let Some(candidate) = phase_from_progress(&progress) {
        let before = installer.phase;
        if installer.apply_candidate(candidate) {
            info!("Installer phase {} -> {}", before.as_str(), installer.phase.as_str());
            if installer.phase == InstallPhase::Failed {
                installer.error = Some(progress.message);
            }
        }
    }

    UpdateResult::none()
}

/// Periodic work: status polling and the cancel fallback
pub fn handle_tick(state: &mut AppState, now: Instant) -> Option<UpdateAction> {
    let interval = state.settings.installer.poll_interval();
    let installer = &mut state.installer;

    if installer.phase == InstallPhase::Cancelling {
        if let Some(deadline) = installer.cancel_deadline {
            if now >= deadline {
                info!("No abort confirmation, treating installation as cancelled");
                installer.phase = InstallPhase::Cancelled;
                installer.cancel_deadline = None;
            }
        }
        return None;
    }

    if !installer.wants_polling() {
        installer.next_poll = None;
        return None;
    }

    match installer.next_poll {
        None => {
            installer.next_poll = Some(now + interval);
            None
        }
        Some(due) if now >= due => {
            installer.next_poll = Some(now + interval);
            Some(UpdateAction::PollInstallation)
        }
        Some(_) => None,
    }
}

pub fn handle_status(state: &mut AppState, status: InstallationStatus) -> UpdateResult {
    let installer = &mut state.installer;
    if !installer.accepts_events() {
        return UpdateResult::none();
    }

    if let Some(candidate) = phase_from_status(&status) {
        let before = installer.phase;
        if installer.apply_candidate(candidate) {
            info!(
                "Installer phase {} -> {} (from status poll)",
                before.as_str(),
                installer.phase.as_str()
            );
            if !status.message.is_empty() {
                installer.message = status.message;
            }
        }
    }
    UpdateResult::none()
}

pub fn handle_status_failed(_state: &mut AppState, error: String) -> UpdateResult {
    // The poll is a fallback for missed events; the next tick retries
    debug!("Installer status poll failed: {}", error);
    UpdateResult::none()
}

// ─────────────────────────────────────────────────────────────────────────────
// User decisions
// ─────────────────────────────────────────────────────────────────────────────

pub fn handle_select_python(state: &mut AppState, version: String) -> UpdateResult {
    let installer = &mut state.installer;
    if installer.phase == InstallPhase::VersionSelect && !installer.busy {
        installer.python_version = version;
    }
    UpdateResult::none()
}

pub fn handle_confirm_python(state: &mut AppState) -> UpdateResult {
    let installer = &mut state.installer;
    if installer.phase != InstallPhase::VersionSelect || installer.busy {
        return UpdateResult::none();
    }
    let Some(directory) = installer.directory.clone() else {
        warn!("Python version confirmed without an install directory");
        return UpdateResult::none();
    };

    installer.busy = true;
    installer.message = format!("Setting up Python {}", installer.python_version);
    UpdateResult::action(UpdateAction::run(
        BridgeCommand::SetupPythonEnvironment {
            directory,
            python_version: installer.python_version.clone(),
        },
        CommandPurpose::PythonSetup,
    ))
}

pub fn handle_toggle_extension(state: &mut AppState, package: String) -> UpdateResult {
    let installer = &mut state.installer;
    if installer.phase != InstallPhase::ExtensionSelect || installer.busy {
        return UpdateResult::none();
    }
    if !installer.selected_extensions.remove(&package) {
        installer.selected_extensions.insert(package);
    }
    UpdateResult::none()
}

/// Confirm the extension selection, or skip it with an empty selection
pub fn handle_confirm_extensions(state: &mut AppState, skip: bool) -> UpdateResult {
    let now = state.now();
    let interval = state.settings.installer.poll_interval();
    let installer = &mut state.installer;
    if installer.phase != InstallPhase::ExtensionSelect || installer.busy {
        return UpdateResult::none();
    }

    let extensions: Vec<String> = if skip {
        Vec::new()
    } else {
        installer.selected_extensions.iter().cloned().collect()
    };

    installer.phase = InstallPhase::Configuring;
    installer.busy = true;
    installer.message = "Configuring environment".to_string();
    installer.next_poll = Some(now + interval);

    UpdateResult::action(UpdateAction::run(
        BridgeCommand::InstallExtensions {
            environment: DEFAULT_ENVIRONMENT.to_string(),
            extensions,
        },
        CommandPurpose::ExtensionInstall,
    ))
}

pub fn handle_cancel(state: &mut AppState) -> UpdateResult {
    let now = state.now();
    let fallback = state.settings.installer.cancel_fallback();
    let installer = &mut state.installer;
    if installer.phase.is_terminal() || installer.phase == InstallPhase::Cancelling {
        return UpdateResult::none();
    }

    info!("Cancelling installation from phase {}", installer.phase.as_str());
    installer.cancelled = true;
    installer.busy = false;
    installer.next_poll = None;
    installer.message = "Cancelling installation".to_string();

    match installer.directory.clone() {
        Some(directory) => {
            installer.phase = InstallPhase::Cancelling;
            installer.cancel_deadline = Some(now + fallback);
            UpdateResult::action(UpdateAction::run(
                BridgeCommand::AbortInstallation { directory },
                CommandPurpose::Abort,
            ))
        }
        None => {
            installer.phase = InstallPhase::Cancelled;
            UpdateResult::none()
        }
    }
}

/// Full restart from a failed or cancelled installation
pub fn handle_retry(state: &mut AppState) -> UpdateResult {
    if !matches!(
        state.installer.phase,
        InstallPhase::Failed | InstallPhase::Cancelled
    ) {
        return UpdateResult::none();
    }

    info!("Retrying installation");
    state.cache.clear();
    state.installer.reset();

    match state.installer.directory.take() {
        Some(directory) => UpdateResult::message(Message::StartInstallation { directory }),
        None => UpdateResult::none(),
    }
}

/// Leave the installer after a failure without marking anything configured
pub fn handle_continue_anyway(state: &mut AppState) -> UpdateResult {
    if !matches!(
        state.installer.phase,
        InstallPhase::Failed | InstallPhase::Cancelled
    ) {
        return UpdateResult::none();
    }
    state.installer.outcome = Some(InstallOutcome::ContinueToEnvironments { configured: false });
    state.environments.loading = true;
    UpdateResult::action(UpdateAction::FetchEnvironments)
}

// ─────────────────────────────────────────────────────────────────────────────
// Host results
// ─────────────────────────────────────────────────────────────────────────────

pub fn handle_command_result(
    state: &mut AppState,
    purpose: &CommandPurpose,
    result: std::result::Result<Value, String>,
) -> UpdateResult {
    match purpose {
        CommandPurpose::InstallerStart => match result {
            // Progress arrives through events and polling
            Ok(_) => {
                debug!("install_conda returned");
                UpdateResult::none()
            }
            Err(error) => {
                if state.installer.accepts_events() {
                    fail(state, error);
                }
                UpdateResult::none()
            }
        },

        CommandPurpose::PythonSetup => {
            state.installer.busy = false;
            if state.installer.phase != InstallPhase::VersionSelect {
                return UpdateResult::none();
            }
            match result {
                Ok(_) => {
                    info!("Python environment ready");
                    state.installer.phase = InstallPhase::ExtensionSelect;
                    state.installer.message = "Choose extensions".to_string();
                }
                Err(error) => fail(state, error),
            }
            UpdateResult::none()
        }

        CommandPurpose::ExtensionInstall => {
            state.installer.busy = false;
            // Completion already announced by the host still needs the
            // default backends and the onboarding flag
            let announced = state.installer.phase == InstallPhase::Complete
                && !state.cache.onboarding.installation_complete;
            if announced {
                return complete(state);
            }
            if state.installer.phase != InstallPhase::Configuring {
                debug!(
                    "Ignoring extension install result in phase {}",
                    state.installer.phase.as_str()
                );
                return UpdateResult::none();
            }
            match result {
                Ok(_) => complete(state),
                Err(error) => {
                    let patterns = &state.settings.installer.benign_warning_patterns;
                    if is_benign_warning(&error, patterns) {
                        warn!("Extension install reported a warning only: {}", error);
                        state.installer.push_log(error);
                        complete(state)
                    } else {
                        fail(state, error);
                        UpdateResult::none()
                    }
                }
            }
        }

        CommandPurpose::Abort => {
            match result {
                Ok(_) => {
                    if state.installer.phase == InstallPhase::Cancelling {
                        info!("Installation aborted");
                        state.installer.phase = InstallPhase::Cancelled;
                        state.installer.cancel_deadline = None;
                    }
                }
                // The fallback deadline still moves us to cancelled
                Err(error) => warn!("Abort failed: {}", error),
            }
            UpdateResult::none()
        }

        CommandPurpose::DefaultBackends => {
            let configured = match result {
                Ok(_) => {
                    state.cache.set_onboarding(|f| f.backends_configured = true);
                    true
                }
                Err(error) => {
                    warn!("Creating default backends failed: {}", error);
                    state.set_error(format!("Could not create default backends: {}", error));
                    false
                }
            };
            state.installer.outcome = Some(InstallOutcome::ContinueToEnvironments { configured });
            state.environments.loading = true;
            state.backends.loading = true;
            UpdateResult::action(UpdateAction::Batch(vec![
                UpdateAction::FetchEnvironments,
                UpdateAction::FetchBackends,
            ]))
        }

        _ => UpdateResult::none(),
    }
}

fn fail(state: &mut AppState, error: String) {
    error!("Installation failed: {}", error);
    let installer = &mut state.installer;
    installer.phase = InstallPhase::Failed;
    installer.busy = false;
    installer.next_poll = None;
    installer.push_log(error.clone());
    installer.error = Some(error);
}

fn complete(state: &mut AppState) -> UpdateResult {
    info!("Installation complete");
    let installer = &mut state.installer;
    installer.phase = InstallPhase::Complete;
    installer.next_poll = None;
    installer.progress = 1.0;
    installer.message = "Installation complete".to_string();
    state
        .cache
        .set_onboarding(|f| f.installation_complete = true);

    UpdateResult::action(UpdateAction::run(
        BridgeCommand::CreateDefaultBackends,
        CommandPurpose::DefaultBackends,
    ))
}
