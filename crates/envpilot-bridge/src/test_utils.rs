//! Test utilities for code that talks to the host
//!
//! [`FakeBridge`] records every invoked command and answers with scripted
//! results, falling back to an empty-but-valid result per method.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use envpilot_core::prelude::*;
use envpilot_core::{BackendService, Environment, Extension, InstallationStatus, LogEntry};

use crate::client::{decode, decode_credentials, decode_extensions, HostBridge, JupyterCheck};
use crate::commands::BridgeCommand;

type Scripted = std::result::Result<Value, String>;

#[derive(Default)]
struct FakeState {
    invoked: Vec<BridgeCommand>,
    queued: HashMap<String, VecDeque<Scripted>>,
    sticky: HashMap<String, Scripted>,
}

/// In-memory [`HostBridge`]
#[derive(Clone, Default)]
pub struct FakeBridge {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next call to `method` with `value`
    pub fn respond(&self, method: &str, value: Value) -> &Self {
        self.lock()
            .queued
            .entry(method.to_string())
            .or_default()
            .push_back(Ok(value));
        self
    }

    /// Reject the next call to `method` with `message`
    pub fn fail(&self, method: &str, message: &str) -> &Self {
        self.lock()
            .queued
            .entry(method.to_string())
            .or_default()
            .push_back(Err(message.to_string()));
        self
    }

    /// Answer every call to `method` with `value` once the queue is empty
    pub fn respond_always(&self, method: &str, value: Value) -> &Self {
        self.lock().sticky.insert(method.to_string(), Ok(value));
        self
    }

    /// Reject every call to `method` once the queue is empty
    pub fn fail_always(&self, method: &str, message: &str) -> &Self {
        self.lock()
            .sticky
            .insert(method.to_string(), Err(message.to_string()));
        self
    }

    /// Every command invoked so far, in order
    pub fn commands(&self) -> Vec<BridgeCommand> {
        self.lock().invoked.clone()
    }

    /// Method names invoked so far, in order
    pub fn methods(&self) -> Vec<&'static str> {
        self.lock().invoked.iter().map(|c| c.method()).collect()
    }

    /// How many times `method` was invoked
    pub fn count(&self, method: &str) -> usize {
        self.lock()
            .invoked
            .iter()
            .filter(|c| c.method() == method)
            .count()
    }

    pub fn clear_commands(&self) {
        self.lock().invoked.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        // A panicking test thread must not poison the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn call(&self, command: BridgeCommand) -> Result<Value> {
        let method = command.method();
        let scripted = {
            let mut state = self.lock();
            state.invoked.push(command);
            state
                .queued
                .get_mut(method)
                .and_then(VecDeque::pop_front)
                .or_else(|| state.sticky.get(method).cloned())
        };

        match scripted.unwrap_or_else(|| Ok(default_result(method))) {
            Ok(value) => Ok(value),
            Err(message) => Err(Error::bridge(message)),
        }
    }
}

impl std::fmt::Debug for FakeBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeBridge")
            .field("invoked", &self.methods())
            .finish()
    }
}

fn default_result(method: &str) -> Value {
    match method {
        "list_conda_environments" | "list_backend_services" | "get_process_logs_history" => {
            json!([])
        }
        "get_environment_extensions" => json!({ "extensions": [] }),
        "check_jupyter_server" => json!({ "running": false, "url": null, "status": "not_found" }),
        "list_jupyter_servers" => json!({ "servers": [] }),
        "get_installation_status" => json!({}),
        "get_user_credentials" => json!({ "credentials": {} }),
        _ => json!(true),
    }
}

impl HostBridge for FakeBridge {
    async fn invoke(&self, command: BridgeCommand) -> Result<Value> {
        self.call(command)
    }

    async fn list_environments(&self) -> Result<Vec<Environment>> {
        decode(
            "list_conda_environments",
            self.call(BridgeCommand::ListEnvironments)?,
        )
    }

    async fn environment_extensions(&self, environment: &str) -> Result<Vec<Extension>> {
        decode_extensions(self.call(BridgeCommand::GetEnvironmentExtensions {
            environment: environment.to_string(),
        })?)
    }

    async fn list_backends(&self) -> Result<Vec<BackendService>> {
        decode("list_backend_services", self.call(BridgeCommand::ListBackends)?)
    }

    async fn check_jupyter(&self, environment: &str) -> Result<JupyterCheck> {
        decode(
            "check_jupyter_server",
            self.call(BridgeCommand::CheckJupyter {
                environment: environment.to_string(),
            })?,
        )
    }

    async fn installation_status(&self) -> Result<InstallationStatus> {
        decode(
            "get_installation_status",
            self.call(BridgeCommand::GetInstallationStatus)?,
        )
    }

    async fn process_logs(&self, process_id: &str, count: Option<usize>) -> Result<Vec<LogEntry>> {
        decode(
            "get_process_logs_history",
            self.call(BridgeCommand::GetProcessLogsHistory {
                process_id: process_id.to_string(),
                count,
            })?,
        )
    }

    async fn user_credentials(&self) -> Result<BTreeMap<String, String>> {
        decode_credentials(self.call(BridgeCommand::GetUserCredentials)?)
    }
}

/// A backend with the given id, named after it
pub fn test_backend(id: &str) -> BackendService {
    BackendService::new(
        id,
        format!("Backend {id}"),
        "openbb-api --port 6900",
        "openbb",
    )
}

/// An environment rooted under `/envs`
pub fn test_environment(name: &str) -> Environment {
    Environment::new(name, "3.12", format!("/envs/{name}"))
}
