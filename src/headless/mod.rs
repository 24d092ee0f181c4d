//! Headless mode - NDJSON intents in, NDJSON events out
//!
//! Headless mode drives the engine without any UI. Each stdin line is one
//! JSON intent; each stdout line is one JSON event.
//!
//! # Example session
//!
//! ```json
//! {"intent":"refresh_backends"}
//! {"intent":"start_backend","id":"b1"}
//! ```
//!
//! ```json
//! {"event":"backend_status_changed","id":"b1","old_status":"stopped","new_status":"starting","error":null,"timestamp":1704700001000}
//! {"event":"log_entry","entry":{"timestamp":1704700002000,"content":"Uvicorn running","processId":"backend-b1"},"timestamp":1704700002001}
//! ```

pub mod runner;

use std::collections::BTreeMap;
use std::io::{self, Write};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::error;

use envpilot_app::{EngineEvent, Message};
use envpilot_core::BackendService;

/// One stdout line: an engine event stamped with wall-clock time
#[derive(Debug, Clone, Serialize)]
pub struct HeadlessEvent {
    #[serde(flatten)]
    pub event: EngineEvent,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl HeadlessEvent {
    pub fn new(event: EngineEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EngineEvent::Error {
            message: message.into(),
        })
    }

    /// Write this event to `out` as one JSON line
    pub fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        let json = serde_json::to_string(self).map_err(io::Error::other)?;
        writeln!(out, "{}", json)?;
        out.flush()
    }

    /// Emit this event to stdout
    pub fn emit(&self) {
        let mut stdout = io::stdout().lock();
        if let Err(e) = self.write_to(&mut stdout) {
            error!("Failed to write headless event to stdout: {}", e);
        }
    }
}

/// One stdin line: what the user wants to happen
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum HeadlessIntent {
    Quit,
    DismissError,

    // Environments
    RefreshEnvironments,
    CreateEnvironment {
        name: String,
        #[serde(default = "default_python_version")]
        python_version: String,
        #[serde(default)]
        extensions: Vec<String>,
    },
    CreateEnvironmentFromRequirements {
        name: String,
        file_path: String,
        directory: String,
    },
    UpdateEnvironment {
        name: String,
        directory: String,
    },
    RemoveEnvironment {
        name: String,
    },
    LoadExtensions {
        environment: String,
    },
    InstallExtensions {
        environment: String,
        packages: Vec<String>,
    },
    RemoveExtension {
        environment: String,
        package: String,
        directory: String,
    },
    UpdateExtension {
        environment: String,
        package: String,
        directory: String,
    },

    // Backends
    RefreshBackends,
    CreateBackend {
        backend: BackendService,
    },
    UpdateBackend {
        backend: BackendService,
    },
    DeleteBackend {
        id: String,
    },
    StartBackend {
        id: String,
    },
    StopBackend {
        id: String,
    },

    // Jupyter
    StartJupyter {
        environment: String,
        directory: String,
    },
    StopJupyter {
        environment: String,
    },
    CheckJupyter {
        environment: String,
    },

    // Installer
    StartInstallation {
        directory: String,
    },
    SelectPythonVersion {
        version: String,
    },
    ConfirmPythonVersion,
    ToggleExtension {
        package: String,
    },
    ConfirmExtensions,
    SkipExtensions,
    CancelInstallation,
    RetryInstallation,
    ContinueAnyway,

    // Logs
    OpenLogView {
        process_id: String,
    },
    CloseLogView {
        process_id: String,
    },
    SearchLogs {
        process_id: String,
        query: String,
    },

    // Credentials and helpers
    LoadCredentials,
    SaveCredentials {
        credentials: BTreeMap<String, String>,
    },
    PickDirectory {
        #[serde(default)]
        title: Option<String>,
    },
    PickFile {
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        extensions: Vec<String>,
    },
    GenerateCertificate,
}

fn default_python_version() -> String {
    "3.12".to_string()
}

impl HeadlessIntent {
    /// Parse one stdin line. `q` and `quit` are accepted as shorthand.
    pub fn parse(line: &str) -> Result<Option<Self>, serde_json::Error> {
        match line.trim() {
            "" => Ok(None),
            "q" | "quit" => Ok(Some(HeadlessIntent::Quit)),
            json => serde_json::from_str(json).map(Some),
        }
    }
}

impl From<HeadlessIntent> for Message {
    fn from(intent: HeadlessIntent) -> Self {
        use HeadlessIntent as I;

        match intent {
            I::Quit => Message::Quit,
            I::DismissError => Message::DismissError,

            I::RefreshEnvironments => Message::RefreshEnvironments,
            I::CreateEnvironment {
                name,
                python_version,
                extensions,
            } => Message::CreateEnvironment {
                name,
                python_version,
                extensions,
            },
            I::CreateEnvironmentFromRequirements {
                name,
                file_path,
                directory,
            } => Message::CreateEnvironmentFromRequirements {
                name,
                file_path,
                directory,
            },
            I::UpdateEnvironment { name, directory } => {
                Message::UpdateEnvironment { name, directory }
            }
            I::RemoveEnvironment { name } => Message::RemoveEnvironment { name },
            I::LoadExtensions { environment } => Message::LoadExtensions { environment },
            I::InstallExtensions {
                environment,
                packages,
            } => Message::InstallExtensions {
                environment,
                packages,
            },
            I::RemoveExtension {
                environment,
                package,
                directory,
            } => Message::RemoveExtension {
                environment,
                package,
                directory,
            },
            I::UpdateExtension {
                environment,
                package,
                directory,
            } => Message::UpdateExtension {
                environment,
                package,
                directory,
            },

            I::RefreshBackends => Message::RefreshBackends,
            I::CreateBackend { backend } => Message::CreateBackend { backend },
            I::UpdateBackend { backend } => Message::UpdateBackend { backend },
            I::DeleteBackend { id } => Message::DeleteBackend { id },
            I::StartBackend { id } => Message::StartBackend { id },
            I::StopBackend { id } => Message::StopBackend { id },

            I::StartJupyter {
                environment,
                directory,
            } => Message::StartJupyter {
                environment,
                directory,
            },
            I::StopJupyter { environment } => Message::StopJupyter { environment },
            I::CheckJupyter { environment } => Message::CheckJupyter { environment },

            I::StartInstallation { directory } => Message::StartInstallation { directory },
            I::SelectPythonVersion { version } => Message::SelectPythonVersion { version },
            I::ConfirmPythonVersion => Message::ConfirmPythonVersion,
            I::ToggleExtension { package } => Message::ToggleExtension { package },
            I::ConfirmExtensions => Message::ConfirmExtensions,
            I::SkipExtensions => Message::SkipExtensions,
            I::CancelInstallation => Message::CancelInstallation,
            I::RetryInstallation => Message::RetryInstallation,
            I::ContinueAnyway => Message::ContinueAnyway,

            I::OpenLogView { process_id } => Message::OpenLogView { process_id },
            I::CloseLogView { process_id } => Message::CloseLogView { process_id },
            I::SearchLogs { process_id, query } => Message::SearchLogs { process_id, query },

            I::LoadCredentials => Message::LoadCredentials,
            I::SaveCredentials { credentials } => Message::SaveCredentials { credentials },
            I::PickDirectory { title } => Message::PickDirectory { title },
            I::PickFile { title, extensions } => Message::PickFile { title, extensions },
            I::GenerateCertificate => Message::GenerateCertificate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shorthand_and_blank() {
        assert_eq!(HeadlessIntent::parse("  ").unwrap(), None);
        assert_eq!(HeadlessIntent::parse("q").unwrap(), Some(HeadlessIntent::Quit));
        assert_eq!(
            HeadlessIntent::parse(r#"{"intent":"quit"}"#).unwrap(),
            Some(HeadlessIntent::Quit)
        );
    }

    #[test]
    fn test_parse_rejects_unknown_intent() {
        assert!(HeadlessIntent::parse(r#"{"intent":"reboot"}"#).is_err());
        assert!(HeadlessIntent::parse("not json").is_err());
    }

    #[test]
    fn test_create_environment_defaults() {
        let intent = HeadlessIntent::parse(r#"{"intent":"create_environment","name":"ml"}"#)
            .unwrap()
            .unwrap();
        match Message::from(intent) {
            Message::CreateEnvironment {
                name,
                python_version,
                extensions,
            } => {
                assert_eq!(name, "ml");
                assert_eq!(python_version, "3.12");
                assert!(extensions.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_event_line_is_flat() {
        let mut out = Vec::new();
        HeadlessEvent::error("boom").write_to(&mut out).unwrap();

        let line = String::from_utf8(out).unwrap();
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["event"], "error");
        assert_eq!(value["message"], "boom");
        assert!(value["timestamp"].as_i64().unwrap() > 0);
    }
}
