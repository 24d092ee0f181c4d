//! Configuration types for envpilot
//!
//! Defines:
//! - `Settings` - Global application settings
//! - One sub-struct per `config.toml` section

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use envpilot_core::traceback::{CollectorConfig, DEFAULT_PROMPT_PREFIXES};
use envpilot_core::DEFAULT_LOG_BUFFER_SIZE;

/// Application settings (config.toml)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub bridge: BridgeSettings,

    #[serde(default)]
    pub installer: InstallerSettings,

    #[serde(default)]
    pub monitor: MonitorSettings,

    #[serde(default)]
    pub jupyter: JupyterSettings,

    #[serde(default)]
    pub cache: CacheSettings,
}

/// How to reach the host
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BridgeSettings {
    /// Host executable, resolved through `PATH`
    #[serde(default = "default_bridge_command")]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            command: default_bridge_command(),
            args: Vec::new(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl BridgeSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_bridge_command() -> String {
    "envpilot-host".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

/// Installer settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InstallerSettings {
    /// Status poll interval while the installer is unattended
    #[serde(default = "default_installer_poll_ms")]
    pub poll_interval_ms: u64,

    /// Delay after which a cancel is considered done without host confirmation
    #[serde(default = "default_cancel_fallback_ms")]
    pub cancel_fallback_ms: u64,

    /// Substrings that mark an install error as a harmless warning
    #[serde(default = "default_benign_patterns")]
    pub benign_warning_patterns: Vec<String>,
}

impl Default for InstallerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_installer_poll_ms(),
            cancel_fallback_ms: default_cancel_fallback_ms(),
            benign_warning_patterns: default_benign_patterns(),
        }
    }
}

impl InstallerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cancel_fallback(&self) -> Duration {
        Duration::from_millis(self.cancel_fallback_ms)
    }
}

fn default_installer_poll_ms() -> u64 {
    2_000
}

fn default_cancel_fallback_ms() -> u64 {
    3_000
}

fn default_benign_patterns() -> Vec<String> {
    [
        "FutureWarning",
        "DeprecationWarning",
        "PendingDeprecationWarning",
        "UserWarning",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Process monitor settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MonitorSettings {
    /// Silence after which a collected traceback is considered complete
    #[serde(default = "default_traceback_silence_ms")]
    pub traceback_silence_ms: u64,

    #[serde(default = "default_traceback_max_lines")]
    pub traceback_max_lines: usize,

    /// Line prefixes that look like a shell prompt and end a traceback
    #[serde(default = "default_prompt_prefixes")]
    pub prompt_prefixes: Vec<String>,

    /// Upper bound on the "waiting for confirmation" spinner
    #[serde(default = "default_confirmation_failsafe_ms")]
    pub confirmation_failsafe_ms: u64,

    /// Max lines kept per process log view
    #[serde(default = "default_log_buffer_size")]
    pub log_buffer_size: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            traceback_silence_ms: default_traceback_silence_ms(),
            traceback_max_lines: default_traceback_max_lines(),
            prompt_prefixes: default_prompt_prefixes(),
            confirmation_failsafe_ms: default_confirmation_failsafe_ms(),
            log_buffer_size: default_log_buffer_size(),
        }
    }
}

impl MonitorSettings {
    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            silence_timeout: Duration::from_millis(self.traceback_silence_ms),
            max_lines: self.traceback_max_lines,
            prompt_prefixes: self.prompt_prefixes.clone(),
        }
    }

    pub fn confirmation_failsafe(&self) -> Duration {
        Duration::from_millis(self.confirmation_failsafe_ms)
    }
}

fn default_traceback_silence_ms() -> u64 {
    2_000
}

fn default_traceback_max_lines() -> usize {
    500
}

fn default_prompt_prefixes() -> Vec<String> {
    DEFAULT_PROMPT_PREFIXES
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_confirmation_failsafe_ms() -> u64 {
    45_000
}

fn default_log_buffer_size() -> usize {
    DEFAULT_LOG_BUFFER_SIZE
}

/// Jupyter server tracking
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct JupyterSettings {
    /// Status check interval while a server is starting or stopping
    #[serde(default = "default_jupyter_poll_ms")]
    pub poll_interval_ms: u64,

    /// A server still not running after this long is marked as errored
    #[serde(default = "default_jupyter_start_timeout_ms")]
    pub start_timeout_ms: u64,
}

impl Default for JupyterSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_jupyter_poll_ms(),
            start_timeout_ms: default_jupyter_start_timeout_ms(),
        }
    }
}

impl JupyterSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }
}

fn default_jupyter_poll_ms() -> u64 {
    3_000
}

fn default_jupyter_start_timeout_ms() -> u64 {
    30_000
}

/// Local cache location
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CacheSettings {
    /// Overrides the default `<data dir>/envpilot/cache.json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.bridge.request_timeout(), Duration::from_secs(30));
        assert_eq!(settings.installer.poll_interval(), Duration::from_secs(2));
        assert_eq!(settings.installer.cancel_fallback(), Duration::from_secs(3));
        assert_eq!(
            settings.monitor.confirmation_failsafe(),
            Duration::from_secs(45)
        );
        assert_eq!(settings.jupyter.poll_interval(), Duration::from_secs(3));
        assert_eq!(settings.jupyter.start_timeout(), Duration::from_secs(30));
        assert_eq!(settings.monitor.log_buffer_size, 10_000);
        assert!(settings.cache.path.is_none());
    }

    #[test]
    fn test_collector_config_follows_monitor_settings() {
        let monitor = MonitorSettings {
            traceback_silence_ms: 500,
            traceback_max_lines: 20,
            prompt_prefixes: vec!["~> ".into()],
            ..Default::default()
        };
        let config = monitor.collector_config();
        assert_eq!(config.silence_timeout, Duration::from_millis(500));
        assert_eq!(config.max_lines, 20);
        assert_eq!(config.prompt_prefixes, vec!["~> ".to_string()]);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let settings: Settings = toml::from_str("[installer]\npoll_interval_ms = 500\n").unwrap();
        assert_eq!(settings.installer.poll_interval_ms, 500);
        assert_eq!(settings.installer.cancel_fallback_ms, 3_000);
        assert_eq!(settings.installer.benign_warning_patterns.len(), 4);
    }
}
