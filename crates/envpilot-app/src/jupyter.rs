//! Jupyter server state, one server per environment

use std::collections::{BTreeMap, HashMap};

use envpilot_core::{JupyterServer, JupyterStatus};

use crate::monitor::JupyterMonitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JupyterOperation {
    Start,
    Stop,
    /// Stop issued by the monitor after an error in the output
    MonitorStop,
}

impl JupyterOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            JupyterOperation::Start => "start",
            JupyterOperation::Stop => "stop",
            JupyterOperation::MonitorStop => "monitor_stop",
        }
    }
}

#[derive(Debug, Default)]
pub struct JupyterList {
    pub servers: BTreeMap<String, JupyterServer>,
    pub monitors: HashMap<String, JupyterMonitor>,
}

impl JupyterList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, environment: &str) -> Option<&JupyterServer> {
        self.servers.get(environment)
    }

    pub fn server_mut(&mut self, environment: &str) -> &mut JupyterServer {
        self.servers
            .entry(environment.to_string())
            .or_insert_with(|| JupyterServer::new(environment))
    }

    pub fn status(&self, environment: &str) -> JupyterStatus {
        self.get(environment)
            .map(|s| s.status)
            .unwrap_or(JupyterStatus::Stopped)
    }
}
