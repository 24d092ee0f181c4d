//! # envpilot-bridge - Host Command Bridge
//!
//! Talks to the host process that does the real filesystem, process and
//! package work. Requests go out as NDJSON on the host's stdin; responses
//! and named events come back on its stdout.
//!
//! Depends on [`envpilot_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Commands
//! - [`BridgeCommand`] - Every host operation, with wire encoding
//! - [`BridgeSender`] - Send commands with request/response matching
//! - [`RequestTracker`] - Track pending request/response pairs
//!
//! ### Protocol Parsing
//! - [`parse_host_line()`] - Parse one line of host output
//!
//! ### Access
//! - [`HostBridge`] - Async trait the application is written against
//! - [`BridgeClient`] - Production implementation over [`BridgeSender`]
//! - [`HostProcess`] - Spawn and manage the host executable

pub mod client;
pub mod commands;
pub mod process;
pub mod protocol;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

// Public API re-exports
pub use client::{BridgeClient, HostBridge, JupyterCheck, LocalHostBridge};
pub use commands::{
    next_request_id, BridgeCommand, BridgeSender, CommandResponse, RequestTracker,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use process::{HostCommand, HostEvent, HostProcess};
pub use protocol::{encode_event, parse_host_line, HostMessage};
