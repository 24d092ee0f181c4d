//! Action handlers: UpdateAction dispatch and background task spawning
//!
//! Every action runs as a tokio task that talks to the host through
//! [`HostBridge`] and reports back with a [`Message`]. Nothing here touches
//! application state.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use envpilot_bridge::{BridgeCommand, HostBridge};

use crate::handler::UpdateAction;
use crate::message::{CommandPurpose, Message};

/// Execute an action by spawning a background task
pub fn handle_action<B>(action: UpdateAction, msg_tx: mpsc::Sender<Message>, bridge: Arc<B>)
where
    B: HostBridge + Send + Sync + 'static,
{
    match action {
        UpdateAction::Batch(actions) => {
            for action in actions {
                handle_action(action, msg_tx.clone(), bridge.clone());
            }
        }

        UpdateAction::FetchEnvironments => {
            tokio::spawn(async move {
                let msg = match bridge.list_environments().await {
                    Ok(environments) => Message::EnvironmentsLoaded { environments },
                    Err(e) => Message::EnvironmentsLoadFailed {
                        error: e.to_string(),
                    },
                };
                send(&msg_tx, msg).await;
            });
        }

        UpdateAction::FetchExtensions { environment } => {
            tokio::spawn(async move {
                let msg = match bridge.environment_extensions(&environment).await {
                    Ok(extensions) => Message::ExtensionsLoaded {
                        environment,
                        extensions,
                    },
                    Err(e) => Message::ExtensionsLoadFailed {
                        environment,
                        error: e.to_string(),
                    },
                };
                send(&msg_tx, msg).await;
            });
        }

        UpdateAction::FetchBackends => {
            tokio::spawn(async move {
                let msg = match bridge.list_backends().await {
                    Ok(backends) => Message::BackendsLoaded { backends },
                    Err(e) => Message::BackendsLoadFailed {
                        error: e.to_string(),
                    },
                };
                send(&msg_tx, msg).await;
            });
        }

        UpdateAction::CheckJupyter { environment } => {
            tokio::spawn(async move {
                let msg = match bridge.check_jupyter(&environment).await {
                    Ok(check) => Message::JupyterChecked { environment, check },
                    Err(e) => Message::JupyterCheckFailed {
                        environment,
                        error: e.to_string(),
                    },
                };
                send(&msg_tx, msg).await;
            });
        }

        UpdateAction::PollInstallation => {
            tokio::spawn(async move {
                let msg = match bridge.installation_status().await {
                    Ok(status) => Message::InstallerStatusReceived { status },
                    Err(e) => Message::InstallerStatusFailed {
                        error: e.to_string(),
                    },
                };
                send(&msg_tx, msg).await;
            });
        }

        UpdateAction::FetchLogHistory { process_id, count } => {
            tokio::spawn(async move {
                let msg = match bridge.process_logs(&process_id, count).await {
                    Ok(entries) => Message::LogHistoryLoaded {
                        process_id,
                        entries,
                    },
                    Err(e) => Message::LogHistoryFailed {
                        process_id,
                        error: e.to_string(),
                    },
                };
                send(&msg_tx, msg).await;
            });
        }

        UpdateAction::FetchCredentials => {
            tokio::spawn(async move {
                let msg = match bridge.user_credentials().await {
                    Ok(credentials) => Message::CredentialsLoaded { credentials },
                    Err(e) => Message::CredentialsLoadFailed {
                        error: e.to_string(),
                    },
                };
                send(&msg_tx, msg).await;
            });
        }

        UpdateAction::RunCommands { commands, purpose } => {
            tokio::spawn(async move {
                let msg = run_commands(bridge.as_ref(), commands, purpose).await;
                send(&msg_tx, msg).await;
            });
        }
    }
}

/// Run commands in order; the first failure ends the sequence
async fn run_commands<B>(bridge: &B, commands: Vec<BridgeCommand>, purpose: CommandPurpose) -> Message
where
    B: HostBridge + Send + Sync,
{
    let mut result = serde_json::Value::Null;
    for command in commands {
        let method = command.method();
        match bridge.invoke(command).await {
            Ok(value) => result = value,
            Err(e) => {
                debug!("{} failed: {}", method, e);
                return Message::CommandFailed {
                    purpose,
                    error: e.to_string(),
                };
            }
        }
    }
    Message::CommandSucceeded { purpose, result }
}

async fn send(msg_tx: &mpsc::Sender<Message>, msg: Message) {
    if msg_tx.send(msg).await.is_err() {
        warn!("Engine stopped before an action result was delivered");
    }
}
