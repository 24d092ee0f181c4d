//! Main update function - handles state transitions (TEA pattern)

use envpilot_core::prelude::*;
use envpilot_core::BridgeEvent;

use super::{
    backends, credentials, environments, installer, jupyter, log_view, UpdateAction, UpdateResult,
};
use crate::backends::BackendOperation;
use crate::environments::ExtensionOperation;
use crate::message::{CommandPurpose, Message};
use crate::state::AppState;
use envpilot_bridge::BridgeCommand;

/// Process a message and update state
/// Returns optional follow-up message and/or action
pub fn update(state: &mut AppState, message: Message) -> UpdateResult {
    match message {
        Message::Bridge(event) => handle_bridge_event(state, event),

        Message::HostExited { code } => {
            error!("Host process exited (code {:?})", code);
            state.host_connected = false;
            state.set_error(match code {
                Some(code) => format!("Host process exited with code {}", code),
                None => "Host process exited".to_string(),
            });
            UpdateResult::none()
        }

        Message::Tick { now } => {
            state.clock = now;
            let mut actions = Vec::new();
            actions.extend(installer::handle_tick(state, now));
            actions.extend(backends::handle_tick(state, now));
            actions.extend(jupyter::handle_tick(state, now));
            environments::handle_tick(state, now);
            UpdateResult::maybe_action(UpdateAction::batch(actions))
        }

        Message::Quit => {
            state.request_quit();
            UpdateResult::none()
        }

        Message::DismissError => {
            state.error = None;
            UpdateResult::none()
        }

        // ─────────────────────────────────────────────────────────
        // Environments
        // ─────────────────────────────────────────────────────────
        Message::RefreshEnvironments => environments::handle_refresh(state),
        Message::EnvironmentsLoaded { environments: envs } => {
            environments::handle_loaded(state, envs)
        }
        Message::EnvironmentsLoadFailed { error } => environments::handle_load_failed(state, error),
        Message::CreateEnvironment {
            name,
            python_version,
            extensions,
        } => environments::handle_create(state, name, python_version, extensions),
        Message::CreateEnvironmentFromRequirements {
            name,
            file_path,
            directory,
        } => environments::handle_create_from_requirements(state, name, file_path, directory),
        Message::UpdateEnvironment { name, directory } => {
            environments::handle_update(state, name, directory)
        }
        Message::RemoveEnvironment { name } => environments::handle_remove(state, name),

        Message::LoadExtensions { environment } => {
            environments::handle_load_extensions(state, environment)
        }
        Message::ExtensionsLoaded {
            environment,
            extensions,
        } => environments::handle_extensions_loaded(state, environment, extensions),
        Message::ExtensionsLoadFailed { environment, error } => {
            environments::handle_extensions_load_failed(state, environment, error)
        }
        Message::InstallExtensions {
            environment,
            packages,
        } => environments::handle_install_extensions(state, environment, packages),
        Message::RemoveExtension {
            environment,
            package,
            directory,
        } => environments::handle_change_extension(
            state,
            environment,
            package,
            directory,
            ExtensionOperation::Remove,
        ),
        Message::UpdateExtension {
            environment,
            package,
            directory,
        } => environments::handle_change_extension(
            state,
            environment,
            package,
            directory,
            ExtensionOperation::Update,
        ),

        // ─────────────────────────────────────────────────────────
        // Backends
        // ─────────────────────────────────────────────────────────
        Message::RefreshBackends => backends::handle_refresh(state),
        Message::BackendsLoaded { backends: list } => backends::handle_loaded(state, list),
        Message::BackendsLoadFailed { error } => backends::handle_load_failed(state, error),
        Message::CreateBackend { backend } => {
            backends::handle_save(state, backend, BackendOperation::Create)
        }
        Message::UpdateBackend { backend } => {
            backends::handle_save(state, backend, BackendOperation::Update)
        }
        Message::DeleteBackend { id } => backends::handle_delete(state, id),
        Message::StartBackend { id } => backends::handle_start(state, id),
        Message::StopBackend { id } => backends::handle_stop(state, id),

        // ─────────────────────────────────────────────────────────
        // Jupyter
        // ─────────────────────────────────────────────────────────
        Message::StartJupyter {
            environment,
            directory,
        } => jupyter::handle_start(state, environment, directory),
        Message::StopJupyter { environment } => jupyter::handle_stop(state, environment),
        Message::CheckJupyter { environment } => jupyter::handle_check(state, environment),
        Message::JupyterChecked { environment, check } => {
            jupyter::handle_checked(state, environment, check)
        }
        Message::JupyterCheckFailed { environment, error } => {
            jupyter::handle_check_failed(state, environment, error)
        }

        // ─────────────────────────────────────────────────────────
        // Installer
        // ─────────────────────────────────────────────────────────
        Message::StartInstallation { directory } => installer::handle_start(state, directory),
        Message::InstallerStatusReceived { status } => installer::handle_status(state, status),
        Message::InstallerStatusFailed { error } => installer::handle_status_failed(state, error),
        Message::SelectPythonVersion { version } => installer::handle_select_python(state, version),
        Message::ConfirmPythonVersion => installer::handle_confirm_python(state),
        Message::ToggleExtension { package } => installer::handle_toggle_extension(state, package),
        Message::ConfirmExtensions => installer::handle_confirm_extensions(state, false),
        Message::SkipExtensions => installer::handle_confirm_extensions(state, true),
        Message::CancelInstallation => installer::handle_cancel(state),
        Message::RetryInstallation => installer::handle_retry(state),
        Message::ContinueAnyway => installer::handle_continue_anyway(state),

        // ─────────────────────────────────────────────────────────
        // Log Views
        // ─────────────────────────────────────────────────────────
        Message::OpenLogView { process_id } => log_view::handle_open(state, process_id),
        Message::CloseLogView { process_id } => log_view::handle_close(state, process_id),
        Message::LogHistoryLoaded {
            process_id,
            entries,
        } => log_view::handle_history_loaded(state, process_id, entries),
        Message::LogHistoryFailed { process_id, error } => {
            log_view::handle_history_failed(state, process_id, error)
        }
        Message::SearchLogs { process_id, query } => {
            log_view::handle_search(state, process_id, query)
        }
        Message::ToggleSearchCase { process_id } => log_view::handle_toggle_case(state, process_id),
        Message::SetSearchRegex {
            process_id,
            enabled,
        } => log_view::handle_set_regex(state, process_id, enabled),
        Message::NextMatch { process_id } => log_view::handle_next_match(state, process_id),
        Message::PrevMatch { process_id } => log_view::handle_prev_match(state, process_id),
        Message::ClearSearch { process_id } => log_view::handle_clear_search(state, process_id),

        // ─────────────────────────────────────────────────────────
        // Credentials
        // ─────────────────────────────────────────────────────────
        Message::LoadCredentials => credentials::handle_load(state),
        Message::CredentialsLoaded { credentials: creds } => {
            credentials::handle_loaded(state, creds)
        }
        Message::CredentialsLoadFailed { error } => credentials::handle_load_failed(state, error),
        Message::SaveCredentials { credentials: creds } => credentials::handle_save(state, creds),

        // ─────────────────────────────────────────────────────────
        // Host Helpers
        // ─────────────────────────────────────────────────────────
        Message::PickDirectory { title } => UpdateResult::action(UpdateAction::run(
            BridgeCommand::SelectDirectory { title },
            CommandPurpose::PickPath,
        )),
        Message::PickFile { title, extensions } => UpdateResult::action(UpdateAction::run(
            BridgeCommand::SelectFile { title, extensions },
            CommandPurpose::PickPath,
        )),
        Message::GenerateCertificate => UpdateResult::action(UpdateAction::run(
            BridgeCommand::GenerateSelfSignedCert,
            CommandPurpose::GenerateCertificate,
        )),

        // ─────────────────────────────────────────────────────────
        // Command Results
        // ─────────────────────────────────────────────────────────
        Message::CommandSucceeded { purpose, result } => {
            handle_command_result(state, purpose, Ok(result))
        }
        Message::CommandFailed { purpose, error } => {
            handle_command_result(state, purpose, Err(error))
        }
    }
}

fn handle_bridge_event(state: &mut AppState, event: BridgeEvent) -> UpdateResult {
    match event {
        BridgeEvent::ProcessOutput(output) => log_view::handle_process_output(state, output),
        BridgeEvent::InstallProgress(progress) => installer::handle_progress(state, progress),
        BridgeEvent::InstallationDirectory(directory) => {
            installer::handle_installation_directory(state, directory)
        }
        BridgeEvent::BackendUrlDiscovered(found) => {
            backends::handle_url_discovered(state, found.id, found.url)
        }
        BridgeEvent::JupyterStatusUpdate(update) => {
            jupyter::handle_status_update(state, update.environment_name, &update.status)
        }
        BridgeEvent::Unknown { name, .. } => {
            trace!("Ignoring host event '{}'", name);
            UpdateResult::none()
        }
    }
}

/// Route a host command result to the handler that issued it
fn handle_command_result(
    state: &mut AppState,
    purpose: CommandPurpose,
    result: std::result::Result<serde_json::Value, String>,
) -> UpdateResult {
    match purpose {
        CommandPurpose::Environment { name, operation } => {
            environments::handle_operation_result(state, &name, operation, result)
        }
        CommandPurpose::Extension {
            environment,
            operation,
        } => environments::handle_extension_result(state, &environment, operation, result),
        CommandPurpose::Backend { id, operation } => {
            backends::handle_command_result(state, &id, operation, result)
        }
        CommandPurpose::Jupyter {
            environment,
            operation,
        } => jupyter::handle_command_result(state, &environment, operation, result),
        CommandPurpose::InstallerStart
        | CommandPurpose::PythonSetup
        | CommandPurpose::ExtensionInstall
        | CommandPurpose::Abort
        | CommandPurpose::DefaultBackends => {
            installer::handle_command_result(state, &purpose, result)
        }
        CommandPurpose::SaveCredentials => credentials::handle_save_result(state, result),
        CommandPurpose::PickPath => {
            match result {
                Ok(value) => {
                    // Cancelled dialogs come back as null
                    state.picked_path = value.as_str().map(str::to_string);
                }
                Err(error) => state.set_error(error),
            }
            UpdateResult::none()
        }
        CommandPurpose::GenerateCertificate => {
            match result {
                Ok(value) => state.certificate = Some(value),
                Err(error) => state.set_error(error),
            }
            UpdateResult::none()
        }
        CommandPurpose::BestEffort => {
            if let Err(error) = result {
                debug!("Host bookkeeping call failed: {}", error);
            }
            UpdateResult::none()
        }
    }
}
