//! Host bridge event definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::InstallPhase;

// ─────────────────────────────────────────────────────────
// Event names
// ─────────────────────────────────────────────────────────

pub const PROCESS_OUTPUT: &str = "process-output";
pub const INSTALL_PROGRESS: &str = "install-progress";
pub const BACKEND_URL_DISCOVERED: &str = "backend-url-discovered";
pub const JUPYTER_STATUS_UPDATE: &str = "jupyter-status-update";
pub const INSTALLATION_DIRECTORY: &str = "installation-directory";

// ─────────────────────────────────────────────────────────
// Event Structs
// ─────────────────────────────────────────────────────────

/// One line of output from a host-managed process
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutput {
    pub process_id: String,
    pub output: String,
    /// Milliseconds since the Unix epoch
    #[serde(default)]
    pub timestamp: i64,
    /// `stdout` or `stderr`
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
}

/// Installer progress notification
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InstallProgress {
    pub step: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub message: String,
}

impl InstallProgress {
    pub fn new(step: impl Into<String>, progress: f64, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            progress,
            message: message.into(),
        }
    }
}

/// API URL found in a backend's startup output
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackendUrlDiscovered {
    pub id: String,
    pub url: String,
}

/// Jupyter status broadcast from another window or the host
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JupyterStatusUpdate {
    #[serde(alias = "environment")]
    pub environment_name: String,
    pub status: String,
}

/// Result of the `get_installation_status` query
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationStatus {
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub is_downloading: bool,
    #[serde(default)]
    pub is_installing: bool,
    #[serde(default)]
    pub is_configuring: bool,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub message: String,
}

impl InstallationStatus {
    /// Phase the host believes it is in.
    ///
    /// The host's "complete" means Miniforge itself finished, which is the
    /// point where the user picks a Python version.
    pub fn reported_phase(&self) -> Option<InstallPhase> {
        match self.phase.as_str() {
            "preparing" => Some(InstallPhase::Preparing),
            "downloading" => Some(InstallPhase::Downloading),
            "installing" => Some(InstallPhase::Installing),
            "configuring" => Some(InstallPhase::Configuring),
            "complete" => Some(InstallPhase::VersionSelect),
            _ if self.is_complete => Some(InstallPhase::VersionSelect),
            _ if self.is_configuring => Some(InstallPhase::Configuring),
            _ if self.is_installing => Some(InstallPhase::Installing),
            _ if self.is_downloading => Some(InstallPhase::Downloading),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────
// BridgeEvent
// ─────────────────────────────────────────────────────────

/// A named event pushed by the host
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    ProcessOutput(ProcessOutput),
    InstallProgress(InstallProgress),
    BackendUrlDiscovered(BackendUrlDiscovered),
    JupyterStatusUpdate(JupyterStatusUpdate),
    InstallationDirectory(String),
    /// Event with an unrecognized name or a payload that failed to parse
    Unknown { name: String, payload: Value },
}

impl BridgeEvent {
    /// Decode an event from its channel name and JSON payload
    pub fn from_named(name: &str, payload: Value) -> Self {
        let parsed = match name {
            PROCESS_OUTPUT => serde_json::from_value(payload.clone()).map(Self::ProcessOutput),
            INSTALL_PROGRESS => serde_json::from_value(payload.clone()).map(Self::InstallProgress),
            BACKEND_URL_DISCOVERED => {
                serde_json::from_value(payload.clone()).map(Self::BackendUrlDiscovered)
            }
            JUPYTER_STATUS_UPDATE => {
                serde_json::from_value(payload.clone()).map(Self::JupyterStatusUpdate)
            }
            INSTALLATION_DIRECTORY => {
                serde_json::from_value(payload.clone()).map(Self::InstallationDirectory)
            }
            _ => {
                return Self::Unknown {
                    name: name.to_string(),
                    payload,
                }
            }
        };

        match parsed {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Malformed '{}' event payload: {}", name, e);
                Self::Unknown {
                    name: name.to_string(),
                    payload,
                }
            }
        }
    }

    /// Channel name of this event
    pub fn name(&self) -> &str {
        match self {
            Self::ProcessOutput(_) => PROCESS_OUTPUT,
            Self::InstallProgress(_) => INSTALL_PROGRESS,
            Self::BackendUrlDiscovered(_) => BACKEND_URL_DISCOVERED,
            Self::JupyterStatusUpdate(_) => JUPYTER_STATUS_UPDATE,
            Self::InstallationDirectory(_) => INSTALLATION_DIRECTORY,
            Self::Unknown { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_process_output_event() {
        let event = BridgeEvent::from_named(
            "process-output",
            json!({"processId": "backend-b1", "output": "INFO: ok", "timestamp": 12, "type": "stdout"}),
        );
        match event {
            BridgeEvent::ProcessOutput(out) => {
                assert_eq!(out.process_id, "backend-b1");
                assert_eq!(out.output, "INFO: ok");
                assert_eq!(out.timestamp, 12);
                assert_eq!(out.stream.as_deref(), Some("stdout"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_install_progress_event() {
        let event = BridgeEvent::from_named(
            "install-progress",
            json!({"step": "download", "progress": 0.5, "message": "Downloading Miniforge"}),
        );
        assert_eq!(
            event,
            BridgeEvent::InstallProgress(InstallProgress::new(
                "download",
                0.5,
                "Downloading Miniforge"
            ))
        );
    }

    #[test]
    fn test_installation_directory_event() {
        let event = BridgeEvent::from_named("installation-directory", json!("/opt/envs"));
        assert_eq!(event, BridgeEvent::InstallationDirectory("/opt/envs".into()));
    }

    #[test]
    fn test_jupyter_status_accepts_both_field_names() {
        let a = BridgeEvent::from_named(
            "jupyter-status-update",
            json!({"environmentName": "base", "status": "running"}),
        );
        let b = BridgeEvent::from_named(
            "jupyter-status-update",
            json!({"environment": "base", "status": "running"}),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_event_name() {
        let event = BridgeEvent::from_named("boolean-message", json!({"message": "true"}));
        assert!(matches!(event, BridgeEvent::Unknown { ref name, .. } if name == "boolean-message"));
        assert_eq!(event.name(), "boolean-message");
    }

    #[test]
    fn test_malformed_payload_becomes_unknown() {
        let event = BridgeEvent::from_named("backend-url-discovered", json!({"id": 3}));
        assert!(matches!(event, BridgeEvent::Unknown { .. }));
    }

    #[test]
    fn test_installation_status_host_complete_is_version_select() {
        let status: InstallationStatus =
            serde_json::from_value(json!({"phase": "complete", "isComplete": true, "message": "done"}))
                .unwrap();
        assert_eq!(status.reported_phase(), Some(InstallPhase::VersionSelect));
    }

    #[test]
    fn test_installation_status_flags_fallback() {
        let status = InstallationStatus {
            is_installing: true,
            ..Default::default()
        };
        assert_eq!(status.reported_phase(), Some(InstallPhase::Installing));
        assert_eq!(InstallationStatus::default().reported_phase(), None);
    }
}
