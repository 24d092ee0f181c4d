//! Application state (Model in TEA pattern)

use std::path::PathBuf;
use std::time::Instant;

use envpilot_core::CollectorConfig;

use crate::backends::BackendList;
use crate::cache::AppCache;
use crate::config::Settings;
use crate::credentials::CredentialsState;
use crate::environments::EnvironmentList;
use crate::installer::InstallerState;
use crate::jupyter::JupyterList;
use crate::log_view::LogViews;

/// Complete application state (the Model in TEA)
#[derive(Debug)]
pub struct AppState {
    pub settings: Settings,

    pub installer: InstallerState,
    pub environments: EnvironmentList,
    pub backends: BackendList,
    pub jupyter: JupyterList,
    pub log_views: LogViews,
    pub credentials: CredentialsState,

    /// Local hydration cache, written back after every message that dirties it
    pub cache: AppCache,
    /// Where the cache is persisted; `None` keeps it in memory only
    pub cache_path: Option<PathBuf>,

    /// Path returned by the last directory/file picker
    pub picked_path: Option<String>,
    /// Result of the last certificate generation
    pub certificate: Option<serde_json::Value>,

    /// Latest user-visible error (host rejection or validation failure)
    pub error: Option<String>,

    pub host_connected: bool,

    /// Time of the last tick; handlers use it for timers
    pub clock: Instant,

    quit: bool,
}

impl AppState {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let log_views = LogViews::new(settings.monitor.log_buffer_size);
        Self {
            settings,
            installer: InstallerState::new(),
            environments: EnvironmentList::new(),
            backends: BackendList::new(),
            jupyter: JupyterList::new(),
            log_views,
            credentials: CredentialsState::new(),
            cache: AppCache::new(),
            cache_path: None,
            picked_path: None,
            certificate: None,
            error: None,
            host_connected: true,
            clock: Instant::now(),
            quit: false,
        }
    }

    /// Attach a loaded cache and hydrate the lists from it
    pub fn with_cache(mut self, cache: AppCache, path: Option<PathBuf>) -> Self {
        self.environments.hydrate(&cache);
        self.cache = cache;
        self.cache_path = path;
        self
    }

    pub fn now(&self) -> Instant {
        self.clock
    }

    pub fn collector_config(&self) -> CollectorConfig {
        self.settings.monitor.collector_config()
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    pub fn request_quit(&mut self) {
        self.quit = true;
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envpilot_core::Environment;

    #[test]
    fn test_with_cache_hydrates_environments() {
        let mut cache = AppCache::new();
        cache.put_environments(&[Environment::new("base", "3.12", "/envs/base")]);
        let state = AppState::new().with_cache(cache, None);
        assert!(state.environments.contains("base"));
        assert!(state.cache_path.is_none());
    }

    #[test]
    fn test_quit() {
        let mut state = AppState::new();
        assert!(!state.should_quit());
        state.request_quit();
        assert!(state.should_quit());
    }
}
