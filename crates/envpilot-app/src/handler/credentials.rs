//! User credential fetch and update

use std::collections::BTreeMap;

use serde_json::Value;

use envpilot_bridge::BridgeCommand;
use envpilot_core::prelude::*;

use crate::credentials::validate_credentials;
use crate::handler::{UpdateAction, UpdateResult};
use crate::message::CommandPurpose;
use crate::state::AppState;

pub fn handle_load(state: &mut AppState) -> UpdateResult {
    state.credentials.loading = true;
    UpdateResult::action(UpdateAction::FetchCredentials)
}

pub fn handle_loaded(state: &mut AppState, credentials: BTreeMap<String, String>) -> UpdateResult {
    let creds = &mut state.credentials;
    creds.values = credentials;
    creds.loaded = true;
    creds.loading = false;
    creds.error = None;
    UpdateResult::none()
}

pub fn handle_load_failed(state: &mut AppState, error: String) -> UpdateResult {
    warn!("Loading credentials failed: {}", error);
    state.credentials.loading = false;
    state.credentials.error = Some(error);
    UpdateResult::none()
}

pub fn handle_save(state: &mut AppState, credentials: BTreeMap<String, String>) -> UpdateResult {
    if state.credentials.saving.is_some() {
        debug!("Credential update already in flight");
        return UpdateResult::none();
    }
    if let Err(e) = validate_credentials(&credentials) {
        state.credentials.error = Some(e.to_string());
        state.set_error(e.to_string());
        return UpdateResult::none();
    }

    state.credentials.saving = Some(credentials.clone());
    state.credentials.error = None;
    UpdateResult::action(UpdateAction::run(
        BridgeCommand::UpdateUserCredentials { credentials },
        CommandPurpose::SaveCredentials,
    ))
}

pub fn handle_save_result(
    state: &mut AppState,
    result: std::result::Result<Value, String>,
) -> UpdateResult {
    let saved = state.credentials.saving.take();
    match result {
        Ok(_) => {
            if let Some(saved) = saved {
                info!("Saved {} credential(s)", saved.len());
                state.credentials.values.extend(saved);
            }
            state.cache.set_onboarding(|f| f.credentials_prompted = true);
        }
        Err(error) => {
            warn!("Saving credentials failed: {}", error);
            state.credentials.error = Some(error.clone());
            state.set_error(error);
        }
    }
    UpdateResult::none()
}
