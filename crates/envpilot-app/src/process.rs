//! Message processing: the TEA loop plus cache write-back

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use envpilot_bridge::HostBridge;

use crate::actions::handle_action;
use crate::handler;
use crate::message::Message;
use crate::state::AppState;

/// Process a message through the TEA update function.
///
/// Follow-up messages are processed in the same call; actions are handed to
/// [`handle_action`] as they appear. The cache is written back once at the
/// end if any handler touched it.
pub fn process_message<B>(
    state: &mut AppState,
    message: Message,
    msg_tx: &mpsc::Sender<Message>,
    bridge: &Arc<B>,
) where
    B: HostBridge + Send + Sync + 'static,
{
    let mut msg = Some(message);
    while let Some(m) = msg {
        let result = handler::update(state, m);

        if let Some(action) = result.action {
            handle_action(action, msg_tx.clone(), bridge.clone());
        }

        // Continue with follow-up message
        msg = result.message;
    }

    persist_cache(state);
}

fn persist_cache(state: &mut AppState) {
    if !state.cache.take_dirty() {
        return;
    }
    let Some(path) = state.cache_path.as_ref() else {
        return;
    };
    match state.cache.save(path) {
        Ok(()) => debug!("Cache written to {}", path.display()),
        Err(e) => warn!("Failed to write cache: {}", e),
    }
}
