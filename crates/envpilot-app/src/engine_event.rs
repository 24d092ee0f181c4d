//! Domain events emitted by the Engine for external consumers
//!
//! Events are broadcast after each message processing cycle via
//! `Engine::subscribe()`. The headless runner turns them into NDJSON.

use serde::Serialize;

use envpilot_core::{BackendStatus, InstallPhase, JupyterStatus, LogEntry};

/// Domain events emitted by the Engine for external consumers.
///
/// Subscribers see a consistent view: events are computed from state
/// snapshots taken before and after a whole message cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    // ─────────────────────────────────────────────────────────
    // Installer
    // ─────────────────────────────────────────────────────────
    InstallerPhaseChanged {
        old_phase: InstallPhase,
        new_phase: InstallPhase,
    },

    /// The installer finished and the app should move on
    InstallerFinished { configured: bool },

    // ─────────────────────────────────────────────────────────
    // Lists
    // ─────────────────────────────────────────────────────────
    EnvironmentsChanged { names: Vec<String> },

    BackendStatusChanged {
        id: String,
        old_status: Option<BackendStatus>,
        new_status: BackendStatus,
        error: Option<String>,
    },

    /// A backend disappeared from the list
    BackendRemoved { id: String },

    JupyterStatusChanged {
        environment: String,
        old_status: JupyterStatus,
        new_status: JupyterStatus,
        url: Option<String>,
    },

    // ─────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────
    LogEntry { entry: LogEntry },

    /// Batch of log entries (for high-volume output)
    LogBatch {
        process_id: String,
        entries: Vec<LogEntry>,
    },

    // ─────────────────────────────────────────────────────────
    // Errors and Lifecycle
    // ─────────────────────────────────────────────────────────
    /// A new user-visible error
    Error { message: String },

    HostDisconnected,

    /// Engine is shutting down
    Shutdown,
}

impl EngineEvent {
    /// Returns a short string label for this event type (for logging/debugging).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::InstallerPhaseChanged { .. } => "installer_phase_changed",
            Self::InstallerFinished { .. } => "installer_finished",
            Self::EnvironmentsChanged { .. } => "environments_changed",
            Self::BackendStatusChanged { .. } => "backend_status_changed",
            Self::BackendRemoved { .. } => "backend_removed",
            Self::JupyterStatusChanged { .. } => "jupyter_status_changed",
            Self::LogEntry { .. } => "log_entry",
            Self::LogBatch { .. } => "log_batch",
            Self::Error { .. } => "error",
            Self::HostDisconnected => "host_disconnected",
            Self::Shutdown => "shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_event_type_labels() {
        assert_eq!(EngineEvent::Shutdown.event_type(), "shutdown");

        let event = EngineEvent::InstallerPhaseChanged {
            old_phase: InstallPhase::Downloading,
            new_phase: InstallPhase::Installing,
        };
        assert_eq!(event.event_type(), "installer_phase_changed");
    }

    #[test]
    fn test_event_tag_matches_label() {
        let events = vec![
            EngineEvent::InstallerFinished { configured: true },
            EngineEvent::EnvironmentsChanged {
                names: vec!["base".into()],
            },
            EngineEvent::BackendStatusChanged {
                id: "b1".into(),
                old_status: None,
                new_status: BackendStatus::Running,
                error: None,
            },
            EngineEvent::BackendRemoved { id: "b1".into() },
            EngineEvent::JupyterStatusChanged {
                environment: "base".into(),
                old_status: JupyterStatus::Starting,
                new_status: JupyterStatus::Running,
                url: None,
            },
            EngineEvent::LogEntry {
                entry: LogEntry::new("backend-b1", "hello", 1),
            },
            EngineEvent::Error {
                message: "boom".into(),
            },
            EngineEvent::HostDisconnected,
            EngineEvent::Shutdown,
        ];

        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["event"], event.event_type());
        }
    }
}
