//! # envpilot-core - Core Domain Types
//!
//! Foundation crate for envpilot. Provides domain types, error handling,
//! host event definitions, and the pure text-processing pieces the process
//! monitors are built from.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, regex, tracing).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`Environment`], [`Extension`], [`BackendService`], [`JupyterServer`]
//! - [`InstallPhase`] - Installer step with forward rank
//! - [`LogEntry`], [`LogBuffer`] - Process output history
//!
//! ### Events (`events`)
//! - [`BridgeEvent`] - Named events pushed by the host
//! - [`InstallationStatus`] - Result of the installer status query
//!
//! ### Log Processing
//! - [`classify_line()`] / [`LogClassification`] - Pure line classifier
//! - [`TracebackCollector`] - Line-by-line Python traceback collector
//! - [`SearchState`] - Log view search
//!
//! ### Validation (`validation`)
//! - [`validate_command()`] - Deny-list shell command check
//! - Name, path, port and package spec validators
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use envpilot_core::prelude::*;
//! ```

pub mod ansi;
pub mod capabilities;
pub mod classify;
pub mod error;
pub mod events;
pub mod logging;
pub mod prelude;
pub mod search;
pub mod traceback;
pub mod types;
pub mod validation;

// Re-export commonly used types at crate root for convenience
pub use ansi::{contains_ansi_codes, strip_ansi_codes};
pub use capabilities::EnvironmentCapabilities;
pub use classify::{classify_line, LogClassification};
pub use error::{Error, Result, ResultExt};
pub use events::{
    BackendUrlDiscovered, BridgeEvent, InstallProgress, InstallationStatus, JupyterStatusUpdate,
    ProcessOutput,
};
pub use search::{SearchMatch, SearchState};
pub use traceback::{CollectorConfig, FeedResult, Traceback, TracebackCollector};
pub use types::{
    normalize_package_name, BackendService, BackendStatus, Environment, Extension, InstallMethod,
    InstallPhase, JupyterServer, JupyterStatus, LogBuffer, LogEntry, ProcessId,
    DEFAULT_LOG_BUFFER_SIZE,
};
pub use validation::{
    is_benign_warning, validate_backend_name, validate_command, validate_credential_key,
    validate_environment_name, validate_package_spec, validate_path, validate_port,
    CommandValidation, HostOs,
};
