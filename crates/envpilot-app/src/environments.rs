//! Environment list state

use std::collections::{BTreeMap, HashMap};

use envpilot_core::{Environment, EnvironmentCapabilities, Extension};

use crate::cache::AppCache;
use crate::monitor::EnvironmentMonitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentOperation {
    Create,
    CreateFromRequirements,
    Update,
    Remove,
}

impl EnvironmentOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentOperation::Create => "create",
            EnvironmentOperation::CreateFromRequirements => "create_from_requirements",
            EnvironmentOperation::Update => "update",
            EnvironmentOperation::Remove => "remove",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionOperation {
    Install,
    Remove,
    Update,
}

impl ExtensionOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionOperation::Install => "install",
            ExtensionOperation::Remove => "remove",
            ExtensionOperation::Update => "update",
        }
    }
}

/// Extensions of one environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionList {
    pub items: Vec<Extension>,
    pub loading: bool,
    /// An install/remove/update is in flight
    pub busy: bool,
    pub error: Option<String>,
}

impl ExtensionList {
    pub fn capabilities(&self) -> EnvironmentCapabilities {
        EnvironmentCapabilities::from_extensions(&self.items)
    }
}

#[derive(Debug, Default)]
pub struct EnvironmentList {
    pub items: Vec<Environment>,
    pub loading: bool,
    pub loaded: bool,
    pub error: Option<String>,
    /// In-flight operation per environment name
    pub operations: BTreeMap<String, EnvironmentOperation>,
    /// Last failed operation per environment name
    pub operation_errors: BTreeMap<String, String>,
    pub extensions: BTreeMap<String, ExtensionList>,
    pub monitors: HashMap<String, EnvironmentMonitor>,
}

impl EnvironmentList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show cached environments and extension lists before the first fetch
    pub fn hydrate(&mut self, cache: &AppCache) {
        self.items = cache.environments();
        for env in &self.items {
            if let Some(exts) = cache.extensions(&env.name) {
                self.extensions.insert(
                    env.name.clone(),
                    ExtensionList {
                        items: exts.to_vec(),
                        ..Default::default()
                    },
                );
            }
        }
    }

    /// Replace the list with host ground truth, hiding pending deletions
    pub fn set_items(&mut self, environments: Vec<Environment>, cache: &AppCache) {
        self.items = environments
            .into_iter()
            .filter(|e| !cache.is_pending_deletion(&e.name))
            .collect();
        self.items.sort_by(|a, b| a.name.cmp(&b.name));
        self.extensions
            .retain(|name, _| self.items.iter().any(|e| &e.name == name));
        self.loading = false;
        self.loaded = true;
        self.error = None;
    }

    pub fn get(&self, name: &str) -> Option<&Environment> {
        self.items.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_busy(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn extensions_mut(&mut self, name: &str) -> &mut ExtensionList {
        self.extensions.entry(name.to_string()).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Environment {
        Environment::new(name, "3.12", format!("/envs/{name}"))
    }

    #[test]
    fn test_set_items_hides_pending_deletions() {
        let mut cache = AppCache::new();
        cache.mark_pending_deletion("old");

        let mut list = EnvironmentList::new();
        list.loading = true;
        list.set_items(vec![env("zeta"), env("old"), env("base")], &cache);

        let names: Vec<_> = list.items.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["base", "zeta"]);
        assert!(!list.loading);
        assert!(list.loaded);
    }

    #[test]
    fn test_hydrate_from_cache() {
        let mut cache = AppCache::new();
        cache.put_environments(&[env("openbb")]);
        cache.put_extensions("openbb", vec![Extension::pip("jupyterlab", "4.2")]);

        let mut list = EnvironmentList::new();
        list.hydrate(&cache);
        assert!(list.contains("openbb"));
        assert!(list.extensions["openbb"].capabilities().jupyter);
        assert!(!list.loaded);
    }
}
