//! Handler module - TEA update function and event handlers
//!
//! Organized into submodules:
//! - `update`: Main update() function and message dispatch
//! - `installer`: Installation phase transitions
//! - `environments`: Environment and extension operations
//! - `backends`: Backend service lifecycle and monitor outcomes
//! - `jupyter`: Jupyter server lifecycle and status polling
//! - `log_view`: Process output routing, log views and search
//! - `credentials`: User credential fetch and update

pub(crate) mod backends;
pub(crate) mod credentials;
pub(crate) mod environments;
pub(crate) mod installer;
pub(crate) mod jupyter;
pub(crate) mod log_view;
pub(crate) mod update;


use envpilot_bridge::BridgeCommand;

use crate::message::{CommandPurpose, Message};

// Re-export main entry point
pub use update::update;

/// Actions that the event loop should perform after update
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateAction {
    FetchEnvironments,

    FetchExtensions {
        environment: String,
    },

    FetchBackends,

    CheckJupyter {
        environment: String,
    },

    /// Query the installer status (polling fallback)
    PollInstallation,

    FetchLogHistory {
        process_id: String,
        count: Option<usize>,
    },

    FetchCredentials,

    /// Run host commands in order, stopping at the first failure.
    ///
    /// The outcome comes back as `CommandSucceeded` (with the last result)
    /// or `CommandFailed`, tagged with `purpose`.
    RunCommands {
        commands: Vec<BridgeCommand>,
        purpose: CommandPurpose,
    },

    /// Several independent actions from one update
    Batch(Vec<UpdateAction>),
}

impl UpdateAction {
    /// Run a single host command
    pub fn run(command: BridgeCommand, purpose: CommandPurpose) -> Self {
        UpdateAction::RunCommands {
            commands: vec![command],
            purpose,
        }
    }

    /// Combine actions, flattening empty and single-element batches
    pub fn batch(actions: Vec<UpdateAction>) -> Option<Self> {
        let mut actions = actions;
        match actions.len() {
            0 => None,
            1 => actions.pop(),
            _ => Some(UpdateAction::Batch(actions)),
        }
    }

    /// Every host command this action would run, in order
    pub fn commands(&self) -> Vec<&BridgeCommand> {
        match self {
            UpdateAction::RunCommands { commands, .. } => commands.iter().collect(),
            UpdateAction::Batch(actions) => actions.iter().flat_map(|a| a.commands()).collect(),
            _ => Vec::new(),
        }
    }
}

/// Result of processing a message
#[derive(Debug, Default)]
pub struct UpdateResult {
    /// Optional follow-up message to process
    pub message: Option<Message>,
    /// Optional action for the event loop to perform
    pub action: Option<UpdateAction>,
}

impl UpdateResult {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn message(msg: Message) -> Self {
        Self {
            message: Some(msg),
            action: None,
        }
    }

    pub fn action(action: UpdateAction) -> Self {
        Self {
            message: None,
            action: Some(action),
        }
    }

    pub fn maybe_action(action: Option<UpdateAction>) -> Self {
        Self {
            message: None,
            action,
        }
    }

    pub fn with_message(mut self, msg: Message) -> Self {
        self.message = Some(msg);
        self
    }
}
