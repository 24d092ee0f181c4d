//! envpilot library
//!
//! Frontend pieces of the `envpilot` binary: the NDJSON headless runner and
//! the offline inspection commands.

pub mod headless;
pub mod inspect;

pub use headless::runner::run_headless;
