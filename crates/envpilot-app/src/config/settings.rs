//! Settings parser for config.toml

use std::path::{Path, PathBuf};

use envpilot_core::prelude::*;

use super::types::Settings;

const CONFIG_FILENAME: &str = "config.toml";
const APP_DIR: &str = "envpilot";

/// `<config dir>/envpilot`, falling back to `./.envpilot`
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".envpilot"))
}

/// Path of the settings file inside `config_dir`
pub fn config_file(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILENAME)
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load settings from `config_dir/config.toml`
///
/// Returns default settings if the file doesn't exist or can't be parsed.
pub fn load_settings(config_dir: &Path) -> Settings {
    load_settings_file(&config_file(config_dir))
}

/// Load settings from an explicit file path
pub fn load_settings_file(config_path: &Path) -> Settings {
    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Create the config directory with a commented default file
pub fn init_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir)
            .map_err(|e| Error::config(format!("Failed to create config dir: {}", e)))?;
    }

    let config_path = config_file(config_dir);
    if !config_path.exists() {
        std::fs::write(&config_path, DEFAULT_CONFIG)
            .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
        info!("Wrote default settings to {:?}", config_path);
    }

    Ok(())
}

/// Save settings to `config_dir/config.toml`
///
/// Writes to a temp file and renames it over the old one.
pub fn save_settings(config_dir: &Path, settings: &Settings) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir)
            .map_err(|e| Error::config(format!("Failed to create config dir: {}", e)))?;
    }

    let config_path = config_file(config_dir);
    let temp_path = config_dir.join(".config.toml.tmp");

    let content = toml::to_string_pretty(settings)
        .map_err(|e| Error::config(format!("Failed to serialize settings: {}", e)))?;

    std::fs::write(&temp_path, format!("{}{}", CONFIG_HEADER, content))
        .map_err(|e| Error::config(format!("Failed to write temp file: {}", e)))?;
    std::fs::rename(&temp_path, &config_path)
        .map_err(|e| Error::config(format!("Failed to rename temp file: {}", e)))?;

    info!("Saved settings to {:?}", config_path);
    Ok(())
}

const CONFIG_HEADER: &str = "# envpilot configuration\n# Generated by envpilot\n\n";

const DEFAULT_CONFIG: &str = r#"# envpilot configuration

[bridge]
command = "envpilot-host"   # Host executable, looked up on PATH
args = []
request_timeout_ms = 30000

[installer]
poll_interval_ms = 2000     # Status poll while the installer runs unattended
cancel_fallback_ms = 3000   # Treat a cancel as done after this long
benign_warning_patterns = ["FutureWarning", "DeprecationWarning", "PendingDeprecationWarning", "UserWarning"]

[monitor]
# A traceback ends on a blank line, a prompt-like line, or this much silence
traceback_silence_ms = 2000
traceback_max_lines = 500
prompt_prefixes = ["$ ", "> ", ">>> ", "% ", "PS "]
confirmation_failsafe_ms = 45000
log_buffer_size = 10000

[jupyter]
poll_interval_ms = 3000
start_timeout_ms = 30000

[cache]
# path = "/path/to/cache.json"
"#;
