//! Jupyter server lifecycle and status polling

use std::time::Instant;

use serde_json::Value;
use url::Url;

use envpilot_bridge::{BridgeCommand, JupyterCheck};
use envpilot_core::prelude::*;
use envpilot_core::{strip_ansi_codes, validate_path, JupyterStatus, ProcessId};

use crate::handler::{UpdateAction, UpdateResult};
use crate::jupyter::JupyterOperation;
use crate::message::CommandPurpose;
use crate::monitor::{JupyterMonitor, JupyterTick, MonitorOutcome};
use crate::state::AppState;

pub fn handle_start(state: &mut AppState, environment: String, directory: String) -> UpdateResult {
    if state.environments.loaded && !state.environments.contains(&environment) {
        return reject(
            state,
            Error::validation("environment", format!("Unknown environment '{}'", environment)),
        );
    }
    if let Err(e) = validate_path(&directory) {
        return reject(state, e);
    }
    if matches!(
        state.jupyter.status(&environment),
        JupyterStatus::Running | JupyterStatus::Starting
    ) {
        debug!("Jupyter for {} already running", environment);
        return UpdateResult::none();
    }

    let now = state.now();
    let server = state.jupyter.server_mut(&environment);
    server.status = JupyterStatus::Starting;
    server.error = None;
    server.url = None;
    server.pid = None;

    let monitor = monitor_entry(state, &environment);
    monitor.process.arm(now);
    monitor.observe_status(JupyterStatus::Starting, now);

    info!("Starting Jupyter for {}", environment);
    UpdateResult::action(UpdateAction::RunCommands {
        commands: vec![
            BridgeCommand::RegisterProcessMonitoring {
                process_id: ProcessId::jupyter(&environment),
            },
            BridgeCommand::StartJupyter {
                environment: environment.clone(),
                directory,
            },
        ],
        purpose: CommandPurpose::Jupyter {
            environment,
            operation: JupyterOperation::Start,
        },
    })
}

pub fn handle_stop(state: &mut AppState, environment: String) -> UpdateResult {
    if matches!(
        state.jupyter.status(&environment),
        JupyterStatus::Stopped | JupyterStatus::Stopping
    ) {
        return UpdateResult::none();
    }

    let now = state.now();
    state.jupyter.server_mut(&environment).status = JupyterStatus::Stopping;
    let monitor = monitor_entry(state, &environment);
    monitor.process.stand_down();
    monitor.observe_status(JupyterStatus::Stopping, now);

    info!("Stopping Jupyter for {}", environment);
    UpdateResult::action(UpdateAction::run(
        BridgeCommand::StopJupyter {
            environment: environment.clone(),
        },
        CommandPurpose::Jupyter {
            environment,
            operation: JupyterOperation::Stop,
        },
    ))
}

pub fn handle_check(_state: &mut AppState, environment: String) -> UpdateResult {
    UpdateResult::action(UpdateAction::CheckJupyter { environment })
}

pub fn handle_checked(state: &mut AppState, environment: String, check: JupyterCheck) -> UpdateResult {
    let now = state.now();
    let server = state.jupyter.server_mut(&environment);

    if check.running {
        server.status = JupyterStatus::Running;
        server.error = None;
        if check.url.is_some() {
            server.url = check.url;
        }
    } else {
        server.status = match server.status {
            // Still coming up; keep polling until the timeout
            JupyterStatus::Starting => JupyterStatus::Starting,
            JupyterStatus::Error => JupyterStatus::Error,
            _ => JupyterStatus::Stopped,
        };
        if server.status == JupyterStatus::Stopped {
            server.url = None;
            server.pid = None;
        }
    }

    let status = server.status;
    observe(state, &environment, status, now);
    UpdateResult::none()
}

pub fn handle_check_failed(_state: &mut AppState, environment: String, error: String) -> UpdateResult {
    // Polling retries on the next interval
    debug!("Jupyter check for {} failed: {}", environment, error);
    UpdateResult::none()
}

/// Status pushed by the host
pub fn handle_status_update(state: &mut AppState, environment: String, status: &str) -> UpdateResult {
    let now = state.now();
    let status = JupyterStatus::from_host(status);
    let server = state.jupyter.server_mut(&environment);
    server.status = status;
    if status == JupyterStatus::Stopped {
        server.url = None;
        server.pid = None;
    }
    observe(state, &environment, status, now);
    UpdateResult::none()
}

// ─────────────────────────────────────────────────────────────────────────────
// Output monitoring
// ─────────────────────────────────────────────────────────────────────────────

pub fn handle_output(
    state: &mut AppState,
    environment: &str,
    line: &str,
    now: Instant,
) -> Option<UpdateAction> {
    if let Some(url) = find_server_url(line) {
        let server = state.jupyter.server_mut(environment);
        if server.url.is_none() && server.status == JupyterStatus::Starting {
            info!("Jupyter for {} serving at {}", environment, url);
            server.url = Some(url);
            server.status = JupyterStatus::Running;
            observe(state, environment, JupyterStatus::Running, now);
        }
    }

    let outcome = state
        .jupyter
        .monitors
        .get_mut(environment)?
        .process
        .feed_line(line, now)?;
    apply_outcome(state, environment, outcome)
}

pub fn handle_tick(state: &mut AppState, now: Instant) -> Vec<UpdateAction> {
    let mut outcomes = Vec::new();
    let mut ticks = Vec::new();
    for (environment, monitor) in state.jupyter.monitors.iter_mut() {
        if let Some(outcome) = monitor.process.tick(now) {
            outcomes.push((environment.clone(), outcome));
        }
        ticks.push((environment.clone(), monitor.tick(now)));
    }

    let mut actions: Vec<UpdateAction> = outcomes
        .into_iter()
        .filter_map(|(environment, outcome)| apply_outcome(state, &environment, outcome))
        .collect();

    for (environment, tick) in ticks {
        match tick {
            JupyterTick::Idle => {}
            JupyterTick::Poll => actions.push(UpdateAction::CheckJupyter { environment }),
            JupyterTick::TimedOut => {
                let server = state.jupyter.server_mut(&environment);
                let message = match server.status {
                    JupyterStatus::Stopping => "Jupyter server did not stop in time",
                    _ => "Jupyter server did not start in time",
                };
                warn!("{} ({})", message, environment);
                server.status = JupyterStatus::Error;
                server.error = Some(message.to_string());
                if let Some(monitor) = state.jupyter.monitors.get_mut(&environment) {
                    monitor.process.disarm();
                }
            }
        }
    }

    actions
}

fn apply_outcome(
    state: &mut AppState,
    environment: &str,
    outcome: MonitorOutcome,
) -> Option<UpdateAction> {
    let now = state.now();
    match outcome {
        MonitorOutcome::Failed { detail } => {
            error!("Jupyter for {} failed: {}", environment, detail);
            let server = state.jupyter.server_mut(environment);
            server.status = JupyterStatus::Error;
            server.error = Some(detail);
            observe(state, environment, JupyterStatus::Error, now);

            Some(UpdateAction::run(
                BridgeCommand::StopJupyter {
                    environment: environment.to_string(),
                },
                CommandPurpose::Jupyter {
                    environment: environment.to_string(),
                    operation: JupyterOperation::MonitorStop,
                },
            ))
        }
        MonitorOutcome::PidDiscovered { pid } => {
            state.jupyter.server_mut(environment).pid = Some(pid);
            None
        }
        MonitorOutcome::ConfirmationExpired => {
            debug!("Jupyter for {} never confirmed startup", environment);
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host results
// ─────────────────────────────────────────────────────────────────────────────

pub fn handle_command_result(
    state: &mut AppState,
    environment: &str,
    operation: JupyterOperation,
    result: std::result::Result<Value, String>,
) -> UpdateResult {
    let now = state.now();
    let check = UpdateAction::CheckJupyter {
        environment: environment.to_string(),
    };

    match (operation, result) {
        (JupyterOperation::Start, Ok(_)) => UpdateResult::action(check),
        (JupyterOperation::Start, Err(error)) => {
            warn!("Starting Jupyter for {} failed: {}", environment, error);
            let server = state.jupyter.server_mut(environment);
            server.status = JupyterStatus::Error;
            server.error = Some(error.clone());
            if let Some(monitor) = state.jupyter.monitors.get_mut(environment) {
                monitor.process.disarm();
            }
            observe(state, environment, JupyterStatus::Error, now);
            state.set_error(error);
            UpdateResult::none()
        }
        (JupyterOperation::Stop, Ok(_)) => {
            let unregister = UpdateAction::run(
                BridgeCommand::UnregisterProcessMonitoring {
                    process_id: ProcessId::jupyter(environment),
                },
                CommandPurpose::BestEffort,
            );
            UpdateResult::action(UpdateAction::Batch(vec![check, unregister]))
        }
        (JupyterOperation::Stop, Err(error)) => {
            warn!("Stopping Jupyter for {} failed: {}", environment, error);
            state.jupyter.server_mut(environment).error = Some(error.clone());
            state.set_error(error);
            UpdateResult::action(check)
        }
        (JupyterOperation::MonitorStop, Ok(_)) => {
            info!("Stopped failed Jupyter for {}", environment);
            UpdateResult::none()
        }
        (JupyterOperation::MonitorStop, Err(error)) => {
            warn!("Stopping failed Jupyter for {} failed: {}", environment, error);
            UpdateResult::none()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// First http(s) URL in a line of server output
pub fn find_server_url(line: &str) -> Option<String> {
    let clean = strip_ansi_codes(line);
    clean
        .split_whitespace()
        .filter(|token| token.starts_with("http"))
        .map(|token| token.trim_end_matches(|c: char| matches!(c, ',' | '.' | ')' | ']')))
        .find_map(|token| {
            let url = Url::parse(token).ok()?;
            matches!(url.scheme(), "http" | "https").then(|| url.to_string())
        })
}

fn monitor_entry<'a>(state: &'a mut AppState, environment: &str) -> &'a mut JupyterMonitor {
    let config = state.collector_config();
    let failsafe = state.settings.monitor.confirmation_failsafe();
    let poll_interval = state.settings.jupyter.poll_interval();
    let start_timeout = state.settings.jupyter.start_timeout();
    state
        .jupyter
        .monitors
        .entry(environment.to_string())
        .or_insert_with(|| {
            JupyterMonitor::new(environment, config, failsafe, poll_interval, start_timeout)
        })
}

fn observe(state: &mut AppState, environment: &str, status: JupyterStatus, now: Instant) {
    if let Some(monitor) = state.jupyter.monitors.get_mut(environment) {
        monitor.observe_status(status, now);
        if status == JupyterStatus::Running {
            monitor.process.disarm();
        }
    }
}

fn reject(state: &mut AppState, error: Error) -> UpdateResult {
    debug!("Rejected: {}", error);
    state.set_error(error.to_string());
    UpdateResult::none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_server_url() {
        let line = "[I 10:00:00 ServerApp] Jupyter Server is running at: http://127.0.0.1:8888/lab?token=abc";
        assert_eq!(
            find_server_url(line).as_deref(),
            Some("http://127.0.0.1:8888/lab?token=abc")
        );
    }

    #[test]
    fn test_find_server_url_ignores_plain_text() {
        assert!(find_server_url("Serving notebooks from local directory").is_none());
        assert!(find_server_url("httpx is installed").is_none());
    }
}
