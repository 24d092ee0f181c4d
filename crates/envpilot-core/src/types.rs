//! Core domain type definitions
//!
//! Everything here mirrors state owned by the host process. These values are
//! UI-local snapshots; ground truth is always re-fetched through the bridge.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};

/// Default number of log lines retained per monitored process
pub const DEFAULT_LOG_BUFFER_SIZE: usize = 10_000;

// ─────────────────────────────────────────────────────────────────────────────
// Environments & Extensions
// ─────────────────────────────────────────────────────────────────────────────

/// An isolated Python installation, identified by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub name: String,
    #[serde(default, alias = "python_version")]
    pub python_version: String,
    #[serde(default)]
    pub path: String,
}

impl Environment {
    pub fn new(
        name: impl Into<String>,
        python_version: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            python_version: python_version.into(),
            path: path.into(),
        }
    }

    /// The conda base environment cannot be removed or renamed
    pub fn is_base(&self) -> bool {
        self.name == "base"
    }
}

/// How an extension was installed into its environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMethod {
    #[default]
    Pip,
    Conda,
}

impl fmt::Display for InstallMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallMethod::Pip => write!(f, "pip"),
            InstallMethod::Conda => write!(f, "conda"),
        }
    }
}

/// An installable package belonging to exactly one environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub package: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub install_method: InstallMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl Extension {
    pub fn pip(package: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            version: version.into(),
            install_method: InstallMethod::Pip,
            channel: None,
        }
    }

    pub fn conda(
        package: impl Into<String>,
        version: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            package: package.into(),
            version: version.into(),
            install_method: InstallMethod::Conda,
            channel: Some(channel.into()),
        }
    }

    /// Package name lowercased with `_` folded into `-` (PEP 503 style)
    pub fn normalized_name(&self) -> String {
        normalize_package_name(&self.package)
    }
}

/// Normalize a package name for comparisons
pub fn normalize_package_name(name: &str) -> String {
    name.trim().to_lowercase().replace(['_', '.'], "-")
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Services
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle status of a backend service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl BackendStatus {
    /// Starting or stopping: a confirmation is still pending
    pub fn is_transitional(&self) -> bool {
        matches!(self, BackendStatus::Starting | BackendStatus::Stopping)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, BackendStatus::Starting | BackendStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendStatus::Stopped => "stopped",
            BackendStatus::Starting => "starting",
            BackendStatus::Running => "running",
            BackendStatus::Stopping => "stopping",
            BackendStatus::Error => "error",
        }
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A long-running server process managed by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BackendService {
    pub id: String,
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub environment: String,
    /// The host starts this backend on its own launch; the app adopts it
    /// from the next listing
    #[serde(default, alias = "auto_start")]
    pub auto_start: bool,
    #[serde(default)]
    pub status: BackendStatus,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "env_file")]
    pub env_file: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", alias = "env_vars")]
    pub env_vars: BTreeMap<String, String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "working_directory"
    )]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "started_at")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackendService {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        command: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            command: command.into(),
            environment: environment.into(),
            ..Default::default()
        }
    }

    /// Log stream id used by the host for this backend
    pub fn process_id(&self) -> String {
        ProcessId::backend(&self.id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Jupyter
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle status of a per-environment Jupyter server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JupyterStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl JupyterStatus {
    pub fn is_transitional(&self) -> bool {
        matches!(self, JupyterStatus::Starting | JupyterStatus::Stopping)
    }

    /// Parse the host's status string (`running`, `not_found`, ...)
    pub fn from_host(status: &str) -> Self {
        match status.to_lowercase().as_str() {
            "running" => JupyterStatus::Running,
            "starting" => JupyterStatus::Starting,
            "stopping" => JupyterStatus::Stopping,
            "error" | "failed" => JupyterStatus::Error,
            _ => JupyterStatus::Stopped,
        }
    }
}

/// Jupyter server attached to one environment
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JupyterServer {
    pub environment: String,
    pub status: JupyterStatus,
    pub url: Option<String>,
    pub pid: Option<u32>,
    pub error: Option<String>,
}

impl JupyterServer {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            ..Default::default()
        }
    }

    pub fn process_id(&self) -> String {
        ProcessId::jupyter(&self.environment)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Installer
// ─────────────────────────────────────────────────────────────────────────────

/// Current step of the installer state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallPhase {
    #[default]
    Preparing,
    Downloading,
    Installing,
    VersionSelect,
    ExtensionSelect,
    Configuring,
    Complete,
    Failed,
    Cancelling,
    Cancelled,
}

impl InstallPhase {
    /// Position in the forward-progressing sequence.
    ///
    /// `None` for the phases only reachable through an explicit failure or
    /// cancel transition.
    pub fn rank(&self) -> Option<u8> {
        match self {
            InstallPhase::Preparing => Some(0),
            InstallPhase::Downloading => Some(1),
            InstallPhase::Installing => Some(2),
            InstallPhase::VersionSelect => Some(3),
            InstallPhase::ExtensionSelect => Some(4),
            InstallPhase::Configuring => Some(5),
            InstallPhase::Complete => Some(6),
            InstallPhase::Failed | InstallPhase::Cancelling | InstallPhase::Cancelled => None,
        }
    }

    /// Phases where the installer waits for a user decision
    pub fn is_waiting_for_user(&self) -> bool {
        matches!(
            self,
            InstallPhase::VersionSelect | InstallPhase::ExtensionSelect
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstallPhase::Complete | InstallPhase::Failed | InstallPhase::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstallPhase::Preparing => "preparing",
            InstallPhase::Downloading => "downloading",
            InstallPhase::Installing => "installing",
            InstallPhase::VersionSelect => "version_select",
            InstallPhase::ExtensionSelect => "extension_select",
            InstallPhase::Configuring => "configuring",
            InstallPhase::Complete => "complete",
            InstallPhase::Failed => "failed",
            InstallPhase::Cancelling => "cancelling",
            InstallPhase::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Process logs
// ─────────────────────────────────────────────────────────────────────────────

/// Helpers for the host's log stream identifiers
pub struct ProcessId;

impl ProcessId {
    pub fn backend(id: &str) -> String {
        format!("backend-{id}")
    }

    pub fn jupyter(environment: &str) -> String {
        format!("jupyter-{environment}")
    }

    pub fn environment(name: &str) -> String {
        format!("env-{name}")
    }

    /// Extract the backend id from a `backend-{id}` stream id
    pub fn backend_id(process_id: &str) -> Option<&str> {
        process_id.strip_prefix("backend-")
    }

    pub fn jupyter_environment(process_id: &str) -> Option<&str> {
        process_id.strip_prefix("jupyter-")
    }

    pub fn environment_name(process_id: &str) -> Option<&str> {
        process_id.strip_prefix("env-")
    }
}

/// A single line of process output. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub content: String,
    #[serde(alias = "process_id")]
    pub process_id: String,
}

impl LogEntry {
    pub fn new(process_id: impl Into<String>, content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            timestamp,
            content: content.into(),
            process_id: process_id.into(),
        }
    }

    /// Create an entry stamped with the current time
    pub fn now(process_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(process_id, content, Local::now().timestamp_millis())
    }

    /// Format timestamp for display
    pub fn formatted_time(&self) -> String {
        match Local.timestamp_millis_opt(self.timestamp).single() {
            Some(time) => {
                let time: DateTime<Local> = time;
                time.format("%H:%M:%S").to_string()
            }
            None => "--:--:--".to_string(),
        }
    }
}

/// Bounded, append-only log history for one process
#[derive(Debug, Clone)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    max_size: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_BUFFER_SIZE)
    }
}

impl LogBuffer {
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            entries: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Append an entry, evicting the oldest when full. Returns true if an
    /// entry was evicted.
    pub fn push(&mut self, entry: LogEntry) -> bool {
        let evicted = self.entries.len() >= self.max_size;
        if evicted {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
        evicted
    }

    /// Most recent `count` entries in arrival order, or all of them
    pub fn get_logs(&self, count: Option<usize>) -> Vec<LogEntry> {
        match count {
            Some(n) if n < self.entries.len() => self
                .entries
                .iter()
                .skip(self.entries.len() - n)
                .cloned()
                .collect(),
            _ => self.entries.iter().cloned().collect(),
        }
    }

    pub fn entries(&self) -> &VecDeque<LogEntry> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
