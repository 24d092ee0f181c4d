//! Backend service list state

use std::collections::{BTreeMap, HashMap};

use envpilot_core::{BackendService, BackendStatus};

use crate::monitor::BackendMonitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendOperation {
    Create,
    Update,
    Delete,
    Start,
    Stop,
    /// Stop issued by the monitor after an error in the output
    MonitorStop,
}

impl BackendOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendOperation::Create => "create",
            BackendOperation::Update => "update",
            BackendOperation::Delete => "delete",
            BackendOperation::Start => "start",
            BackendOperation::Stop => "stop",
            BackendOperation::MonitorStop => "monitor_stop",
        }
    }
}

#[derive(Debug, Default)]
pub struct BackendList {
    pub items: Vec<BackendService>,
    pub loading: bool,
    pub loaded: bool,
    pub error: Option<String>,
    pub pending: BTreeMap<String, BackendOperation>,
    /// Last failed host call per backend id
    pub action_errors: BTreeMap<String, String>,
    pub monitors: HashMap<String, BackendMonitor>,
}

impl BackendList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_items(&mut self, backends: Vec<BackendService>) {
        self.items = backends;
        self.monitors
            .retain(|id, _| self.items.iter().any(|b| &b.id == id));
        self.loading = false;
        self.loaded = true;
        self.error = None;
    }

    pub fn get(&self, id: &str) -> Option<&BackendService> {
        self.items.iter().find(|b| b.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut BackendService> {
        self.items.iter_mut().find(|b| b.id == id)
    }

    pub fn status(&self, id: &str) -> Option<BackendStatus> {
        self.get(id).map(|b| b.status)
    }

    /// The start spinner is shown for this backend
    pub fn is_awaiting_confirmation(&self, id: &str) -> bool {
        self.monitors
            .get(id)
            .is_some_and(|m| m.process.is_awaiting_confirmation())
    }

    pub fn running_count(&self) -> usize {
        self.items
            .iter()
            .filter(|b| b.status == BackendStatus::Running)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::DEFAULT_CONFIRMATION_FAILSAFE;
    use envpilot_core::CollectorConfig;

    #[test]
    fn test_set_items_drops_orphan_monitors() {
        let mut list = BackendList::new();
        list.monitors.insert(
            "gone".into(),
            BackendMonitor::new(
                "gone",
                CollectorConfig::default(),
                DEFAULT_CONFIRMATION_FAILSAFE,
            ),
        );
        list.set_items(vec![BackendService::new("b1", "API", "openbb-api", "openbb")]);
        assert!(list.monitors.is_empty());
        assert_eq!(list.status("b1"), Some(BackendStatus::Stopped));
    }
}
