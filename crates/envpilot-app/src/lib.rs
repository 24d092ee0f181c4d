//! envpilot-app - Application state and orchestration for envpilot
//!
//! This crate implements the TEA (The Elm Architecture) pattern for the
//! installer, environment, backend, Jupyter and log-view flows, plus the
//! Engine that drives them against a [`envpilot_bridge::HostBridge`].

pub mod actions;
pub mod backends;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod engine_event;
pub mod environments;
pub mod handler;
pub mod installer;
pub mod jupyter;
pub mod log_view;
pub mod message;
pub mod monitor;
pub mod process;
pub mod signals;
pub mod state;

// Re-export primary types
pub use cache::AppCache;
pub use engine::Engine;
pub use engine_event::EngineEvent;
pub use handler::{UpdateAction, UpdateResult};
pub use installer::InstallOutcome;
pub use message::{CommandPurpose, Message};
pub use state::AppState;
