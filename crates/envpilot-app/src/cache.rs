//! Local hydration cache
//!
//! One JSON file holding what was last seen of each environment, its
//! extension list, environments awaiting deletion, and one-time onboarding
//! flags. The host stays the system of record: everything here can be
//! rebuilt from bridge calls. Reads and writes are whole-file with no
//! locking, so two writers can race.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use envpilot_core::prelude::*;
use envpilot_core::{Environment, EnvironmentCapabilities, Extension};

const CACHE_FILENAME: &str = "cache.json";

/// `<data dir>/envpilot/cache.json`
pub fn default_cache_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("envpilot")
        .join(CACHE_FILENAME)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEnvironment {
    pub environment: Environment,
    /// `None` until the extension list was fetched once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<Extension>>,
    /// Milliseconds since the Unix epoch
    #[serde(default)]
    pub updated_at: i64,
}

/// One-time onboarding markers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingFlags {
    #[serde(default)]
    pub installation_complete: bool,
    #[serde(default)]
    pub backends_configured: bool,
    #[serde(default)]
    pub credentials_prompted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppCache {
    #[serde(default)]
    pub environments: BTreeMap<String, CachedEnvironment>,
    #[serde(default)]
    pub pending_deletions: BTreeSet<String>,
    #[serde(default)]
    pub onboarding: OnboardingFlags,
    #[serde(skip)]
    dirty: bool,
}

impl AppCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the cache file; a missing file is an empty cache
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No cache at {:?}", path);
            return Ok(Self::default());
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::cache(path, e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| Error::cache(path, e.to_string()))
    }

    /// Like [`load`](Self::load), but a broken cache is discarded
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(cache) => cache,
            Err(e) => {
                warn!("Discarding unreadable cache: {}", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::cache(path, e.to_string()))?;
        }
        let content =
            serde_json::to_string_pretty(self).map_err(|e| Error::cache(path, e.to_string()))?;
        std::fs::write(path, content).map_err(|e| Error::cache(path, e.to_string()))?;
        debug!("Saved cache to {:?}", path);
        Ok(())
    }

    /// Drop every entry and flag
    pub fn clear(&mut self) {
        *self = Self {
            dirty: true,
            ..Self::default()
        };
    }

    /// Returns true once after any mutation
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    // ─────────────────────────────────────────────────────────
    // Environments
    // ─────────────────────────────────────────────────────────

    /// Cached environments in name order, skipping pending deletions
    pub fn environments(&self) -> Vec<Environment> {
        self.environments
            .values()
            .filter(|c| !self.pending_deletions.contains(&c.environment.name))
            .map(|c| c.environment.clone())
            .collect()
    }

    /// Replace the environment set with a fresh host listing.
    ///
    /// Extension lists survive for environments still present.
    pub fn put_environments(&mut self, environments: &[Environment]) {
        let now = chrono::Utc::now().timestamp_millis();
        let mut next = BTreeMap::new();
        for env in environments {
            let extensions = self
                .environments
                .remove(&env.name)
                .and_then(|c| c.extensions);
            next.insert(
                env.name.clone(),
                CachedEnvironment {
                    environment: env.clone(),
                    extensions,
                    updated_at: now,
                },
            );
        }
        self.environments = next;
        self.dirty = true;
    }

    pub fn remove_environment(&mut self, name: &str) {
        if self.environments.remove(name).is_some() {
            self.dirty = true;
        }
    }

    pub fn put_extensions(&mut self, environment: &str, extensions: Vec<Extension>) {
        let now = chrono::Utc::now().timestamp_millis();
        match self.environments.get_mut(environment) {
            Some(cached) => {
                cached.extensions = Some(extensions);
                cached.updated_at = now;
            }
            None => {
                debug!("Caching extensions for unlisted environment {}", environment);
                self.environments.insert(
                    environment.to_string(),
                    CachedEnvironment {
                        environment: Environment::new(environment, "", ""),
                        extensions: Some(extensions),
                        updated_at: now,
                    },
                );
            }
        }
        self.dirty = true;
    }

    pub fn extensions(&self, environment: &str) -> Option<&[Extension]> {
        self.environments
            .get(environment)
            .and_then(|c| c.extensions.as_deref())
    }

    /// Capability check from the cached extension list, without a bridge call
    pub fn capabilities(&self, environment: &str) -> Option<EnvironmentCapabilities> {
        self.extensions(environment)
            .map(EnvironmentCapabilities::from_extensions)
    }

    // ─────────────────────────────────────────────────────────
    // Pending deletions
    // ─────────────────────────────────────────────────────────

    pub fn mark_pending_deletion(&mut self, name: &str) {
        if self.pending_deletions.insert(name.to_string()) {
            self.dirty = true;
        }
    }

    pub fn clear_pending_deletion(&mut self, name: &str) {
        if self.pending_deletions.remove(name) {
            self.dirty = true;
        }
    }

    pub fn is_pending_deletion(&self, name: &str) -> bool {
        self.pending_deletions.contains(name)
    }

    /// Forget pending deletions the host no longer lists
    pub fn settle_pending_deletions(&mut self, listed: &[Environment]) {
        let before = self.pending_deletions.len();
        self.pending_deletions
            .retain(|name| listed.iter().any(|e| &e.name == name));
        if self.pending_deletions.len() != before {
            self.dirty = true;
        }
    }

    // ─────────────────────────────────────────────────────────
    // Onboarding
    // ─────────────────────────────────────────────────────────

    pub fn set_onboarding(&mut self, update: impl FnOnce(&mut OnboardingFlags)) {
        let before = self.onboarding;
        update(&mut self.onboarding);
        if self.onboarding != before {
            self.dirty = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn env(name: &str) -> Environment {
        Environment::new(name, "3.12", format!("/envs/{name}"))
    }

    #[test]
    fn test_load_missing_is_empty() {
        let temp = tempdir().unwrap();
        let cache = AppCache::load(&temp.path().join("cache.json")).unwrap();
        assert!(cache.environments.is_empty());
        assert!(!cache.is_dirty());
    }

    #[test]
    fn test_load_corrupt() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("cache.json");
        std::fs::write(&path, "{ nope").unwrap();

        assert!(matches!(AppCache::load(&path), Err(Error::Cache { .. })));
        assert_eq!(AppCache::load_or_default(&path), AppCache::default());
    }

    #[test]
    fn test_extensions_survive_reload_for_capabilities() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("cache.json");

        let mut cache = AppCache::new();
        cache.put_environments(&[env("openbb")]);
        cache.put_extensions(
            "openbb",
            vec![
                Extension::pip("jupyterlab", "4.2.0"),
                Extension::conda("ipykernel", "6.29.0", "conda-forge"),
                Extension::pip("openbb-cli", "1.1.0"),
            ],
        );
        cache.save(&path).unwrap();

        let reloaded = AppCache::load(&path).unwrap();
        let before: Vec<_> = cache.extensions("openbb").unwrap().to_vec();
        assert_eq!(reloaded.extensions("openbb").unwrap(), before.as_slice());

        let caps = reloaded.capabilities("openbb").unwrap();
        assert!(caps.jupyter);
        assert!(caps.ipython);
        assert!(caps.cli);
        assert_eq!(caps, cache.capabilities("openbb").unwrap());
    }

    #[test]
    fn test_unfetched_extensions_have_no_capabilities() {
        let mut cache = AppCache::new();
        cache.put_environments(&[env("base")]);
        assert!(cache.capabilities("base").is_none());
    }

    #[test]
    fn test_put_environments_keeps_extensions_and_drops_missing() {
        let mut cache = AppCache::new();
        cache.put_environments(&[env("a"), env("b")]);
        cache.put_extensions("a", vec![Extension::pip("numpy", "1.26")]);

        cache.put_environments(&[env("a")]);
        assert_eq!(cache.extensions("a").unwrap().len(), 1);
        assert!(!cache.environments.contains_key("b"));
    }

    #[test]
    fn test_pending_deletions_hidden_and_settled() {
        let mut cache = AppCache::new();
        cache.put_environments(&[env("a"), env("b")]);
        cache.take_dirty();

        cache.mark_pending_deletion("b");
        assert!(cache.take_dirty());
        assert_eq!(cache.environments(), vec![env("a")]);

        // Still listed by the host: deletion not confirmed yet
        cache.settle_pending_deletions(&[env("a"), env("b")]);
        assert!(cache.is_pending_deletion("b"));

        cache.settle_pending_deletions(&[env("a")]);
        assert!(!cache.is_pending_deletion("b"));
    }

    #[test]
    fn test_clear_marks_dirty() {
        let mut cache = AppCache::new();
        cache.set_onboarding(|f| f.installation_complete = true);
        cache.take_dirty();

        cache.clear();
        assert!(cache.take_dirty());
        assert!(!cache.onboarding.installation_complete);
        assert!(!cache.take_dirty());
    }
}
