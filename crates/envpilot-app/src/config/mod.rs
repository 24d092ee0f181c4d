//! Configuration file parsing for envpilot
//!
//! Settings live in `<config dir>/envpilot/config.toml`.

pub mod settings;
pub mod types;

pub use settings::{
    config_file, default_config_dir, init_config_dir, load_settings, load_settings_file,
    save_settings,
};
pub use types::*;
