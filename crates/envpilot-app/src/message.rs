//! Message types for the application (TEA pattern)

use std::collections::BTreeMap;
use std::time::Instant;

use serde_json::Value;

use envpilot_bridge::JupyterCheck;
use envpilot_core::{
    BackendService, BridgeEvent, Environment, Extension, InstallationStatus, LogEntry,
};

use crate::backends::BackendOperation;
use crate::environments::{EnvironmentOperation, ExtensionOperation};
use crate::jupyter::JupyterOperation;

/// Why a host command was run, so its result reaches the right handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandPurpose {
    Environment {
        name: String,
        operation: EnvironmentOperation,
    },
    Extension {
        environment: String,
        operation: ExtensionOperation,
    },
    Backend {
        id: String,
        operation: BackendOperation,
    },
    Jupyter {
        environment: String,
        operation: JupyterOperation,
    },
    InstallerStart,
    PythonSetup,
    ExtensionInstall,
    Abort,
    DefaultBackends,
    SaveCredentials,
    PickPath,
    GenerateCertificate,
    /// Listener registration and cleanup; a failure is only logged
    BestEffort,
}

/// All possible messages/actions in the application
#[derive(Debug, Clone)]
pub enum Message {
    /// Named event pushed by the host
    Bridge(BridgeEvent),

    /// The host process exited
    HostExited { code: Option<i32> },

    /// Timer tick; drives polls, failsafes and traceback timeouts
    Tick { now: Instant },

    Quit,

    /// Dismiss the current error banner
    DismissError,

    // ─────────────────────────────────────────────────────────
    // Environments
    // ─────────────────────────────────────────────────────────
    RefreshEnvironments,
    EnvironmentsLoaded {
        environments: Vec<Environment>,
    },
    EnvironmentsLoadFailed {
        error: String,
    },
    CreateEnvironment {
        name: String,
        python_version: String,
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
    ExtensionsLoaded {
        environment: String,
        extensions: Vec<Extension>,
    },
    ExtensionsLoadFailed {
        environment: String,
        error: String,
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

    // ─────────────────────────────────────────────────────────
    // Backends
    // ─────────────────────────────────────────────────────────
    RefreshBackends,
    BackendsLoaded {
        backends: Vec<BackendService>,
    },
    BackendsLoadFailed {
        error: String,
    },
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

    // ─────────────────────────────────────────────────────────
    // Jupyter
    // ─────────────────────────────────────────────────────────
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
    JupyterChecked {
        environment: String,
        check: JupyterCheck,
    },
    JupyterCheckFailed {
        environment: String,
        error: String,
    },

    // ─────────────────────────────────────────────────────────
    // Installer
    // ─────────────────────────────────────────────────────────
    StartInstallation {
        directory: String,
    },
    InstallerStatusReceived {
        status: InstallationStatus,
    },
    InstallerStatusFailed {
        error: String,
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

    // ─────────────────────────────────────────────────────────
    // Log Views
    // ─────────────────────────────────────────────────────────
    OpenLogView {
        process_id: String,
    },
    CloseLogView {
        process_id: String,
    },
    LogHistoryLoaded {
        process_id: String,
        entries: Vec<LogEntry>,
    },
    LogHistoryFailed {
        process_id: String,
        error: String,
    },
    SearchLogs {
        process_id: String,
        query: String,
    },
    ToggleSearchCase {
        process_id: String,
    },
    SetSearchRegex {
        process_id: String,
        enabled: bool,
    },
    NextMatch {
        process_id: String,
    },
    PrevMatch {
        process_id: String,
    },
    ClearSearch {
        process_id: String,
    },

    // ─────────────────────────────────────────────────────────
    // Credentials
    // ─────────────────────────────────────────────────────────
    LoadCredentials,
    CredentialsLoaded {
        credentials: BTreeMap<String, String>,
    },
    CredentialsLoadFailed {
        error: String,
    },
    SaveCredentials {
        credentials: BTreeMap<String, String>,
    },

    // ─────────────────────────────────────────────────────────
    // Host Helpers
    // ─────────────────────────────────────────────────────────
    PickDirectory {
        title: Option<String>,
    },
    PickFile {
        title: Option<String>,
        extensions: Vec<String>,
    },
    GenerateCertificate,

    // ─────────────────────────────────────────────────────────
    // Command Results
    // ─────────────────────────────────────────────────────────
    CommandSucceeded {
        purpose: CommandPurpose,
        result: Value,
    },
    CommandFailed {
        purpose: CommandPurpose,
        error: String,
    },
}
