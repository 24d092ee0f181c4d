//! Command building and request tracking for host bridge communication
//!
//! This module provides:
//! - Request ID tracking for matching responses
//! - Command building for the NDJSON request format
//! - Timeout handling for stalled commands

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, RwLock};

use envpilot_core::prelude::*;
use envpilot_core::BackendService;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Global request ID counter
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID
pub fn next_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// A pending request awaiting response
struct PendingRequest {
    response_tx: oneshot::Sender<CommandResponse>,
    created_at: Instant,
    description: String,
}

/// Response from the host
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    pub id: u64,
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl CommandResponse {
    /// Build from the raw wire fields. String errors are taken verbatim.
    pub fn from_host_response(id: u64, result: Option<Value>, error: Option<Value>) -> Self {
        let error = error.filter(|e| !e.is_null()).map(|e| match e {
            Value::String(s) => s,
            other => other.to_string(),
        });
        Self {
            id,
            success: error.is_none(),
            result,
            error,
        }
    }

    pub fn success(id: u64, result: Option<Value>) -> Self {
        Self {
            id,
            success: true,
            result,
            error: None,
        }
    }

    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(message.into()),
        }
    }

    /// The result value, or the host's rejection as `Error::Bridge`
    pub fn into_result(self) -> Result<Value> {
        if self.success {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(Error::bridge(
                self.error.unwrap_or_else(|| "Unknown host error".to_string()),
            ))
        }
    }
}

/// Tracks pending requests and matches responses
pub struct RequestTracker {
    pending: Arc<RwLock<HashMap<u64, PendingRequest>>>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a new pending request
    /// Returns (request_id, receiver for response)
    pub async fn register(&self, description: &str) -> (u64, oneshot::Receiver<CommandResponse>) {
        let id = next_request_id();
        let (tx, rx) = oneshot::channel();

        let pending = PendingRequest {
            response_tx: tx,
            created_at: Instant::now(),
            description: description.to_string(),
        };

        self.pending.write().await.insert(id, pending);

        (id, rx)
    }

    /// Handle an incoming response from the host
    /// Returns true if the response was matched to a pending request
    pub async fn handle_response(
        &self,
        id: u64,
        result: Option<Value>,
        error: Option<Value>,
    ) -> bool {
        if let Some(pending) = self.pending.write().await.remove(&id) {
            trace!("Response #{} matched '{}'", id, pending.description);
            let response = CommandResponse::from_host_response(id, result, error);
            let _ = pending.response_tx.send(response);
            true
        } else {
            false
        }
    }

    /// Drop one pending request without answering it
    pub async fn forget(&self, id: u64) {
        self.pending.write().await.remove(&id);
    }

    /// Cancel all pending requests (e.g., on shutdown)
    pub async fn cancel_all(&self) {
        let mut pending = self.pending.write().await;
        for (id, req) in pending.drain() {
            let _ = req
                .response_tx
                .send(CommandResponse::error(id, "Request cancelled"));
        }
    }

    /// Remove stale requests that have timed out
    pub async fn cleanup_stale(&self, timeout: Duration) -> Vec<u64> {
        let mut pending = self.pending.write().await;
        let now = Instant::now();

        let stale: Vec<u64> = pending
            .iter()
            .filter(|(_, req)| now.duration_since(req.created_at) > timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            if let Some(req) = pending.remove(id) {
                warn!("Request #{} '{}' went stale", id, req.description);
                let _ = req
                    .response_tx
                    .send(CommandResponse::error(*id, "Request timed out"));
            }
        }

        stale
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Every operation the host exposes
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeCommand {
    // Environments
    ListEnvironments,
    CreateEnvironment {
        name: String,
        python_version: String,
        extensions: Vec<String>,
        process_id: String,
    },
    CreateEnvironmentFromRequirements {
        name: String,
        file_path: String,
        directory: String,
        process_id: String,
    },
    UpdateEnvironment {
        environment: String,
        directory: String,
    },
    RemoveEnvironment {
        name: String,
    },
    GetEnvironmentExtensions {
        environment: String,
    },
    InstallExtensions {
        environment: String,
        extensions: Vec<String>,
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
    ListBackends,
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
    ListJupyterServers,

    // Installer
    InstallConda {
        directory: String,
    },
    GetInstallationStatus,
    AbortInstallation {
        directory: String,
    },
    SetupPythonEnvironment {
        directory: String,
        python_version: String,
    },
    CreateDefaultBackends,

    // Process logs
    RegisterProcessMonitoring {
        process_id: String,
    },
    UnregisterProcessMonitoring {
        process_id: String,
    },
    GetProcessLogsHistory {
        process_id: String,
        count: Option<usize>,
    },

    // Credentials
    GetUserCredentials,
    UpdateUserCredentials {
        credentials: BTreeMap<String, String>,
    },

    // Helpers
    SelectDirectory {
        title: Option<String>,
    },
    SelectFile {
        title: Option<String>,
        extensions: Vec<String>,
    },
    GenerateSelfSignedCert,
}

impl BridgeCommand {
    /// Host method name
    pub fn method(&self) -> &'static str {
        match self {
            BridgeCommand::ListEnvironments => "list_conda_environments",
            BridgeCommand::CreateEnvironment { .. } => "create_environment",
            BridgeCommand::CreateEnvironmentFromRequirements { .. } => {
                "create_environment_from_requirements"
            }
            BridgeCommand::UpdateEnvironment { .. } => "update_environment",
            BridgeCommand::RemoveEnvironment { .. } => "remove_environment",
            BridgeCommand::GetEnvironmentExtensions { .. } => "get_environment_extensions",
            BridgeCommand::InstallExtensions { .. } => "install_extensions",
            BridgeCommand::RemoveExtension { .. } => "remove_extension",
            BridgeCommand::UpdateExtension { .. } => "update_extension",
            BridgeCommand::ListBackends => "list_backend_services",
            BridgeCommand::CreateBackend { .. } => "create_backend_service",
            BridgeCommand::UpdateBackend { .. } => "update_backend_service",
            BridgeCommand::DeleteBackend { .. } => "delete_backend_service",
            BridgeCommand::StartBackend { .. } => "start_backend_service",
            BridgeCommand::StopBackend { .. } => "stop_backend_service",
            BridgeCommand::StartJupyter { .. } => "start_jupyter_server",
            BridgeCommand::StopJupyter { .. } => "stop_jupyter_server",
            BridgeCommand::CheckJupyter { .. } => "check_jupyter_server",
            BridgeCommand::ListJupyterServers => "list_jupyter_servers",
            BridgeCommand::InstallConda { .. } => "install_conda",
            BridgeCommand::GetInstallationStatus => "get_installation_status",
            BridgeCommand::AbortInstallation { .. } => "abort_installation",
            BridgeCommand::SetupPythonEnvironment { .. } => "setup_python_environment",
            BridgeCommand::CreateDefaultBackends => "create_default_backend_services",
            BridgeCommand::RegisterProcessMonitoring { .. } => "register_process_monitoring",
            BridgeCommand::UnregisterProcessMonitoring { .. } => "unregister_process_monitoring",
            BridgeCommand::GetProcessLogsHistory { .. } => "get_process_logs_history",
            BridgeCommand::GetUserCredentials => "get_user_credentials",
            BridgeCommand::UpdateUserCredentials { .. } => "update_user_credentials",
            BridgeCommand::SelectDirectory { .. } => "select_directory",
            BridgeCommand::SelectFile { .. } => "select_file",
            BridgeCommand::GenerateSelfSignedCert => "generate_self_signed_cert",
        }
    }

    /// Argument object, keys in the host's camelCase convention
    pub fn params(&self) -> Value {
        match self {
            BridgeCommand::ListEnvironments
            | BridgeCommand::ListBackends
            | BridgeCommand::ListJupyterServers
            | BridgeCommand::GetInstallationStatus
            | BridgeCommand::CreateDefaultBackends
            | BridgeCommand::GetUserCredentials
            | BridgeCommand::GenerateSelfSignedCert => json!({}),
            BridgeCommand::CreateEnvironment {
                name,
                python_version,
                extensions,
                process_id,
            } => json!({
                "name": name,
                "pythonVersion": python_version,
                "extensions": extensions,
                "processId": process_id,
            }),
            BridgeCommand::CreateEnvironmentFromRequirements {
                name,
                file_path,
                directory,
                process_id,
            } => json!({
                "name": name,
                "filePath": file_path,
                "directory": directory,
                "processId": process_id,
            }),
            BridgeCommand::UpdateEnvironment {
                environment,
                directory,
            } => json!({ "environment": environment, "directory": directory }),
            BridgeCommand::RemoveEnvironment { name } => json!({ "name": name }),
            BridgeCommand::GetEnvironmentExtensions { environment } => {
                json!({ "name": environment })
            }
            BridgeCommand::InstallExtensions {
                environment,
                extensions,
            } => json!({ "environment": environment, "extensions": extensions }),
            BridgeCommand::RemoveExtension {
                environment,
                package,
                directory,
            }
            | BridgeCommand::UpdateExtension {
                environment,
                package,
                directory,
            } => json!({
                "environment": environment,
                "package": package,
                "directory": directory,
            }),
            BridgeCommand::CreateBackend { backend } | BridgeCommand::UpdateBackend { backend } => {
                json!({ "backend": backend })
            }
            BridgeCommand::DeleteBackend { id }
            | BridgeCommand::StartBackend { id }
            | BridgeCommand::StopBackend { id } => json!({ "id": id }),
            BridgeCommand::StartJupyter {
                environment,
                directory,
            } => json!({ "environment": environment, "directory": directory }),
            BridgeCommand::StopJupyter { environment }
            | BridgeCommand::CheckJupyter { environment } => json!({ "environment": environment }),
            BridgeCommand::InstallConda { directory }
            | BridgeCommand::AbortInstallation { directory } => json!({ "directory": directory }),
            BridgeCommand::SetupPythonEnvironment {
                directory,
                python_version,
            } => json!({ "directory": directory, "pythonVersion": python_version }),
            BridgeCommand::RegisterProcessMonitoring { process_id }
            | BridgeCommand::UnregisterProcessMonitoring { process_id } => {
                json!({ "processId": process_id })
            }
            BridgeCommand::GetProcessLogsHistory { process_id, count } => {
                json!({ "processId": process_id, "count": count })
            }
            BridgeCommand::UpdateUserCredentials { credentials } => {
                json!({ "credentials": credentials })
            }
            BridgeCommand::SelectDirectory { title } => json!({ "title": title }),
            BridgeCommand::SelectFile { title, extensions } => {
                json!({ "title": title, "extensions": extensions })
            }
        }
    }

    /// Build the NDJSON request line
    pub fn build(&self, id: u64) -> String {
        json!({
            "id": id,
            "method": self.method(),
            "params": self.params(),
        })
        .to_string()
    }

    /// Get a human-readable description
    pub fn description(&self) -> String {
        match self {
            BridgeCommand::ListEnvironments => "list environments".to_string(),
            BridgeCommand::CreateEnvironment { name, .. }
            | BridgeCommand::CreateEnvironmentFromRequirements { name, .. } => {
                format!("create environment '{name}'")
            }
            BridgeCommand::UpdateEnvironment { environment, .. } => {
                format!("update environment '{environment}'")
            }
            BridgeCommand::RemoveEnvironment { name } => format!("remove environment '{name}'"),
            BridgeCommand::GetEnvironmentExtensions { environment } => {
                format!("list extensions of '{environment}'")
            }
            BridgeCommand::InstallExtensions {
                environment,
                extensions,
            } => format!(
                "install {} extension(s) into '{environment}'",
                extensions.len()
            ),
            BridgeCommand::RemoveExtension {
                environment,
                package,
                ..
            } => format!("remove '{package}' from '{environment}'"),
            BridgeCommand::UpdateExtension {
                environment,
                package,
                ..
            } => format!("update '{package}' in '{environment}'"),
            BridgeCommand::ListBackends => "list backends".to_string(),
            BridgeCommand::CreateBackend { backend } => format!("create backend '{}'", backend.name),
            BridgeCommand::UpdateBackend { backend } => format!("update backend '{}'", backend.name),
            BridgeCommand::DeleteBackend { id } => format!("delete backend {id}"),
            BridgeCommand::StartBackend { id } => format!("start backend {id}"),
            BridgeCommand::StopBackend { id } => format!("stop backend {id}"),
            BridgeCommand::StartJupyter { environment, .. } => {
                format!("start jupyter in '{environment}'")
            }
            BridgeCommand::StopJupyter { environment } => {
                format!("stop jupyter in '{environment}'")
            }
            BridgeCommand::CheckJupyter { environment } => {
                format!("check jupyter in '{environment}'")
            }
            BridgeCommand::ListJupyterServers => "list jupyter servers".to_string(),
            BridgeCommand::InstallConda { .. } => "install conda".to_string(),
            BridgeCommand::GetInstallationStatus => "installation status".to_string(),
            BridgeCommand::AbortInstallation { .. } => "abort installation".to_string(),
            BridgeCommand::SetupPythonEnvironment { python_version, .. } => {
                format!("set up python {python_version}")
            }
            BridgeCommand::CreateDefaultBackends => "create default backends".to_string(),
            BridgeCommand::RegisterProcessMonitoring { process_id } => {
                format!("monitor {process_id}")
            }
            BridgeCommand::UnregisterProcessMonitoring { process_id } => {
                format!("stop monitoring {process_id}")
            }
            BridgeCommand::GetProcessLogsHistory { process_id, .. } => {
                format!("log history of {process_id}")
            }
            BridgeCommand::GetUserCredentials => "get credentials".to_string(),
            BridgeCommand::UpdateUserCredentials { .. } => "update credentials".to_string(),
            BridgeCommand::SelectDirectory { .. } => "select directory".to_string(),
            BridgeCommand::SelectFile { .. } => "select file".to_string(),
            BridgeCommand::GenerateSelfSignedCert => "generate certificate".to_string(),
        }
    }
}

/// Sends commands to the host process with request tracking
#[derive(Clone)]
pub struct BridgeSender {
    /// Channel to send raw JSON lines to the host's stdin
    stdin_tx: mpsc::Sender<String>,
    tracker: Arc<RequestTracker>,
    timeout: Duration,
}

impl std::fmt::Debug for BridgeSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSender")
            .field("stdin_tx", &"<channel>")
            .field("tracker", &"<tracker>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl BridgeSender {
    pub fn new(stdin_tx: mpsc::Sender<String>, tracker: Arc<RequestTracker>) -> Self {
        Self {
            stdin_tx,
            tracker,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the default request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send a command and wait for response
    pub async fn send(&self, command: &BridgeCommand) -> Result<CommandResponse> {
        self.send_with_timeout(command, self.timeout).await
    }

    /// Send a command with custom timeout
    pub async fn send_with_timeout(
        &self,
        command: &BridgeCommand,
        timeout: Duration,
    ) -> Result<CommandResponse> {
        let description = command.description();
        let (id, response_rx) = self.tracker.register(&description).await;

        debug!("Sending command #{}: {}", id, description);

        if self.stdin_tx.send(command.build(id)).await.is_err() {
            self.tracker.forget(id).await;
            return Err(Error::channel_send("host stdin"));
        }

        match tokio::time::timeout(timeout, response_rx).await {
            Ok(Ok(response)) => {
                debug!("Command #{} completed: success={}", id, response.success);
                Ok(response)
            }
            Ok(Err(_)) => Err(Error::ChannelClosed),
            Err(_) => {
                self.tracker.forget(id).await;
                Err(Error::bridge_timeout(
                    command.method(),
                    timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Send a fire-and-forget command (no response expected)
    pub async fn send_fire_and_forget(&self, command: &BridgeCommand) -> Result<()> {
        let id = next_request_id();
        debug!("Sending fire-and-forget #{}: {}", id, command.description());

        self.stdin_tx
            .send(command.build(id))
            .await
            .map_err(|_| Error::channel_send("host stdin"))
    }

    /// Get the request tracker (for response handling)
    pub fn tracker(&self) -> &Arc<RequestTracker> {
        &self.tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_uniqueness() {
        let id1 = next_request_id();
        let id2 = next_request_id();
        assert!(id2 > id1);
    }

    #[tokio::test]
    async fn test_request_tracker_register() {
        let tracker = RequestTracker::default();

        let (id1, _rx1) = tracker.register("test1").await;
        let (id2, _rx2) = tracker.register("test2").await;

        assert_ne!(id1, id2);
        assert_eq!(tracker.pending_count().await, 2);
    }

    #[tokio::test]
    async fn test_request_tracker_handle_response() {
        let tracker = RequestTracker::default();
        let (id, rx) = tracker.register("test").await;

        let matched = tracker
            .handle_response(id, Some(json!({"ok": true})), None)
            .await;
        assert!(matched);

        let response = rx.await.unwrap();
        assert!(response.success);
        assert_eq!(response.result, Some(json!({"ok": true})));
        assert_eq!(tracker.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_response_id_not_matched() {
        let tracker = RequestTracker::default();
        assert!(!tracker.handle_response(999_999, None, None).await);
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let tracker = RequestTracker::default();
        let (_, rx) = tracker.register("pending").await;
        tracker.cancel_all().await;

        let response = rx.await.unwrap();
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("Request cancelled"));
    }

    #[tokio::test]
    async fn test_cleanup_stale() {
        let tracker = RequestTracker::default();
        let (id, rx) = tracker.register("old").await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let stale = tracker.cleanup_stale(Duration::from_millis(1)).await;
        assert_eq!(stale, vec![id]);
        assert_eq!(rx.await.unwrap().error.as_deref(), Some("Request timed out"));
    }

    #[test]
    fn test_string_error_taken_verbatim() {
        let response =
            CommandResponse::from_host_response(1, None, Some(json!("Port 6900 is in use")));
        assert!(!response.success);
        let err = response.into_result().unwrap_err();
        assert_eq!(err.to_string(), "Port 6900 is in use");
    }

    #[test]
    fn test_null_error_is_success() {
        let response = CommandResponse::from_host_response(1, Some(json!(true)), Some(Value::Null));
        assert!(response.success);
        assert_eq!(response.into_result().unwrap(), json!(true));
    }

    #[test]
    fn test_build_request_line() {
        let cmd = BridgeCommand::SetupPythonEnvironment {
            directory: "/opt/envpilot".into(),
            python_version: "3.12".into(),
        };
        let line: Value = serde_json::from_str(&cmd.build(7)).unwrap();
        assert_eq!(line["id"], 7);
        assert_eq!(line["method"], "setup_python_environment");
        assert_eq!(line["params"]["pythonVersion"], "3.12");
    }

    #[test]
    fn test_install_extensions_params() {
        let cmd = BridgeCommand::InstallExtensions {
            environment: "openbb".into(),
            extensions: vec!["openbb-cli".into()],
        };
        assert_eq!(
            cmd.params(),
            json!({"environment": "openbb", "extensions": ["openbb-cli"]})
        );
        assert!(cmd.description().contains("1 extension"));
    }

    #[tokio::test]
    async fn test_sender_times_out() {
        let (tx, _rx) = mpsc::channel(4);
        let tracker = Arc::new(RequestTracker::default());
        let sender = BridgeSender::new(tx, tracker.clone());

        let err = sender
            .send_with_timeout(&BridgeCommand::ListBackends, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BridgeTimeout { ref command, .. } if command == "list_backend_services"));
        assert_eq!(tracker.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_sender_receives_response() {
        let (tx, mut rx) = mpsc::channel(4);
        let tracker = Arc::new(RequestTracker::default());
        let sender = BridgeSender::new(tx, tracker.clone());

        let responder = tokio::spawn(async move {
            let line = rx.recv().await.unwrap();
            let request: Value = serde_json::from_str(&line).unwrap();
            let id = request["id"].as_u64().unwrap();
            tracker.handle_response(id, Some(json!([])), None).await;
        });

        let response = sender.send(&BridgeCommand::ListEnvironments).await.unwrap();
        assert!(response.success);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_stdin_is_channel_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = BridgeSender::new(tx, Arc::new(RequestTracker::default()));
        let err = sender.send(&BridgeCommand::ListBackends).await.unwrap_err();
        assert!(matches!(err, Error::ChannelSend { .. }));
    }
}
