//! Typed access to host operations
//!
//! [`HostBridge`] is the seam between the application and the host. The
//! production implementation is [`BridgeClient`]; tests use
//! `test_utils::FakeBridge`.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use envpilot_core::prelude::*;
use envpilot_core::{BackendService, Environment, Extension, InstallationStatus, LogEntry};

use crate::commands::{BridgeCommand, BridgeSender};

/// Result of `check_jupyter_server`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JupyterCheck {
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub url: Option<String>,
    /// `running` or `not_found`
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default, alias = "processId")]
    pub process_id: Option<String>,
}

/// Host operations, typed where the application reads the result
#[trait_variant::make(HostBridge: Send)]
pub trait LocalHostBridge {
    /// Invoke any host operation and return its raw result
    async fn invoke(&self, command: BridgeCommand) -> Result<Value>;

    async fn list_environments(&self) -> Result<Vec<Environment>>;

    async fn environment_extensions(&self, environment: &str) -> Result<Vec<Extension>>;

    async fn list_backends(&self) -> Result<Vec<BackendService>>;

    async fn check_jupyter(&self, environment: &str) -> Result<JupyterCheck>;

    async fn installation_status(&self) -> Result<InstallationStatus>;

    async fn process_logs(&self, process_id: &str, count: Option<usize>) -> Result<Vec<LogEntry>>;

    async fn user_credentials(&self) -> Result<BTreeMap<String, String>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Response decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Deserialize a host result, naming the method in the error
pub fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::protocol(format!("unexpected result for {method}: {e}")))
}

/// `get_environment_extensions` answers `{"extensions": [...]}`
pub fn decode_extensions(value: Value) -> Result<Vec<Extension>> {
    let list = match value {
        Value::Object(mut map) => map.remove("extensions").unwrap_or(Value::Array(vec![])),
        other => other,
    };
    decode("get_environment_extensions", list)
}

/// `get_user_credentials` answers `{"credentials": {...}}` with arbitrary
/// JSON values; they are flattened to strings.
pub fn decode_credentials(value: Value) -> Result<BTreeMap<String, String>> {
    let creds = match value {
        Value::Object(mut map) if map.contains_key("credentials") => map
            .remove("credentials")
            .unwrap_or(Value::Object(Default::default())),
        other => other,
    };
    match creds {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s,
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (k, v)
            })
            .collect()),
        Value::Null => Ok(BTreeMap::new()),
        other => Err(Error::protocol(format!(
            "unexpected result for get_user_credentials: {other}"
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BridgeClient
// ─────────────────────────────────────────────────────────────────────────────

/// [`HostBridge`] over a live host process
#[derive(Debug, Clone)]
pub struct BridgeClient {
    sender: BridgeSender,
}

impl BridgeClient {
    pub fn new(sender: BridgeSender) -> Self {
        Self { sender }
    }

    pub fn sender(&self) -> &BridgeSender {
        &self.sender
    }

    async fn call(&self, command: BridgeCommand) -> Result<Value> {
        self.sender.send(&command).await?.into_result()
    }
}

impl HostBridge for BridgeClient {
    async fn invoke(&self, command: BridgeCommand) -> Result<Value> {
        self.call(command).await
    }

    async fn list_environments(&self) -> Result<Vec<Environment>> {
        let value = self.call(BridgeCommand::ListEnvironments).await?;
        decode("list_conda_environments", value)
    }

    async fn environment_extensions(&self, environment: &str) -> Result<Vec<Extension>> {
        let value = self
            .call(BridgeCommand::GetEnvironmentExtensions {
                environment: environment.to_string(),
            })
            .await?;
        decode_extensions(value)
    }

    async fn list_backends(&self) -> Result<Vec<BackendService>> {
        let value = self.call(BridgeCommand::ListBackends).await?;
        decode("list_backend_services", value)
    }

    async fn check_jupyter(&self, environment: &str) -> Result<JupyterCheck> {
        let value = self
            .call(BridgeCommand::CheckJupyter {
                environment: environment.to_string(),
            })
            .await?;
        decode("check_jupyter_server", value)
    }

    async fn installation_status(&self) -> Result<InstallationStatus> {
        let value = self.call(BridgeCommand::GetInstallationStatus).await?;
        decode("get_installation_status", value)
    }

    async fn process_logs(&self, process_id: &str, count: Option<usize>) -> Result<Vec<LogEntry>> {
        let value = self
            .call(BridgeCommand::GetProcessLogsHistory {
                process_id: process_id.to_string(),
                count,
            })
            .await?;
        decode("get_process_logs_history", value)
    }

    async fn user_credentials(&self) -> Result<BTreeMap<String, String>> {
        let value = self.call(BridgeCommand::GetUserCredentials).await?;
        decode_credentials(value)
    }
}
