//! Installation phase controller state
//!
//! The installer is driven by two unreliable sources: `install-progress`
//! events and a periodic status poll. Both produce *candidate* phases that
//! go through [`reconcile`] before they touch the current phase. User
//! decisions (python version, extensions, cancel, retry) are explicit
//! transitions handled in `handler::installer`.

use std::collections::BTreeSet;
use std::time::Instant;

use envpilot_core::{InstallPhase, InstallProgress, InstallationStatus};

/// Python version preselected in the version step
pub const DEFAULT_PYTHON_VERSION: &str = "3.12";

/// Environment the installer sets up
pub const DEFAULT_ENVIRONMENT: &str = "openbb";

/// Message the host sends once the whole installation is done
const FULL_COMPLETION_MARKER: &str = "Installation completed successfully";

/// Messages sent when only the conda distribution finished installing
const SUBCOMPONENT_COMPLETION_MARKERS: &[&str] = &[
    "Miniforge installation completed",
    "Conda installation completed",
];

/// How the installer flow ended, for navigation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Proceed to the environment list; `configured` is false when the user
    /// chose to continue past a failure
    ContinueToEnvironments { configured: bool },
}

#[derive(Debug, Clone)]
pub struct InstallerState {
    pub phase: InstallPhase,
    /// Latest human-readable status line
    pub message: String,
    /// 0.0..=1.0 as reported by the host
    pub progress: f64,
    pub logs: Vec<String>,
    pub error: Option<String>,
    pub directory: Option<String>,
    /// Set when the user cancels; later installer events are dropped
    pub cancelled: bool,
    pub python_version: String,
    pub selected_extensions: BTreeSet<String>,
    /// A user-triggered host call is in flight
    pub busy: bool,
    pub outcome: Option<InstallOutcome>,
    pub(crate) next_poll: Option<Instant>,
    pub(crate) cancel_deadline: Option<Instant>,
}

impl Default for InstallerState {
    fn default() -> Self {
        Self {
            phase: InstallPhase::Preparing,
            message: String::new(),
            progress: 0.0,
            logs: Vec::new(),
            error: None,
            directory: None,
            cancelled: false,
            python_version: DEFAULT_PYTHON_VERSION.to_string(),
            selected_extensions: BTreeSet::new(),
            busy: false,
            outcome: None,
            next_poll: None,
            cancel_deadline: None,
        }
    }
}

impl InstallerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.directory.is_some() && self.phase != InstallPhase::Preparing
    }

    /// Whether the status poll should run in the current phase
    pub fn wants_polling(&self) -> bool {
        !self.cancelled
            && self.directory.is_some()
            && !self.phase.is_waiting_for_user()
            && !self.phase.is_terminal()
            && self.phase != InstallPhase::Cancelling
    }

    pub fn is_polling(&self) -> bool {
        self.next_poll.is_some()
    }

    /// Whether incoming installer events may still change the phase
    pub fn accepts_events(&self) -> bool {
        !self.cancelled
            && !matches!(
                self.phase,
                InstallPhase::Cancelling | InstallPhase::Cancelled
            )
    }

    /// Merge a candidate phase into the current one and fix up polling.
    ///
    /// Returns true if the phase changed.
    pub fn apply_candidate(&mut self, candidate: InstallPhase) -> bool {
        let next = reconcile(self.phase, candidate);
        let changed = next != self.phase;
        self.phase = next;
        if !self.wants_polling() {
            self.next_poll = None;
        }
        changed
    }

    pub fn push_log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }

    /// Forget everything except the chosen directory
    pub fn reset(&mut self) {
        let directory = self.directory.take();
        *self = Self {
            directory,
            ..Self::default()
        };
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Phase derivation
// ─────────────────────────────────────────────────────────────────────────────

/// Candidate phase for one `install-progress` event.
///
/// Only the full completion marker yields `Complete`. The conda
/// distribution finishing is the point where the user picks a Python
/// version.
pub fn phase_from_progress(progress: &InstallProgress) -> Option<InstallPhase> {
    let step = progress.step.to_lowercase();
    let message = progress.message.as_str();

    if message.contains(FULL_COMPLETION_MARKER) {
        return Some(InstallPhase::Complete);
    }

    if step.contains("install")
        && SUBCOMPONENT_COMPLETION_MARKERS
            .iter()
            .any(|marker| message.contains(marker))
    {
        return Some(InstallPhase::VersionSelect);
    }

    if step.contains("error") || step.contains("fail") {
        return Some(InstallPhase::Failed);
    }
    if step.contains("download") {
        return Some(InstallPhase::Downloading);
    }
    if step.contains("install") {
        return Some(InstallPhase::Installing);
    }
    if step.contains("config") || step.contains("setting up") {
        return Some(InstallPhase::Configuring);
    }
    if step.contains("prepar") {
        return Some(InstallPhase::Preparing);
    }

    None
}

/// Candidate phase for a status poll result
pub fn phase_from_status(status: &InstallationStatus) -> Option<InstallPhase> {
    status.reported_phase()
}

/// Merge a candidate phase into the current one.
///
/// Precedence, first match wins:
/// 1. A terminal phase, or `Cancelling`, stays put. Leaving it takes an
///    explicit retry or abort confirmation.
/// 2. A phase waiting on the user stays put.
/// 3. `Failed` wins over any running phase.
/// 4. Otherwise the higher rank wins, so a stale poll never regresses the
///    phase.
pub fn reconcile(current: InstallPhase, candidate: InstallPhase) -> InstallPhase {
    if current.is_terminal() || current == InstallPhase::Cancelling {
        return current;
    }
    if current.is_waiting_for_user() {
        return current;
    }
    if candidate == InstallPhase::Failed {
        return InstallPhase::Failed;
    }

    match (current.rank(), candidate.rank()) {
        (Some(a), Some(b)) if b > a => candidate,
        _ => current,
    }
}
