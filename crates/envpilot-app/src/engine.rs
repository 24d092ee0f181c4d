//! Engine - orchestration state shared by every frontend
//!
//! The Engine owns the TEA state, the message channel, the host bridge and
//! the shutdown signal. Frontends feed it messages and subscribe to the
//! [`EngineEvent`]s it derives from state changes.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use envpilot_bridge::{HostBridge, HostEvent};
use envpilot_core::{BackendStatus, InstallPhase, JupyterStatus};

use crate::cache::{default_cache_path, AppCache};
use crate::config;
use crate::engine_event::EngineEvent;
use crate::installer::InstallOutcome;
use crate::message::Message;
use crate::process;
use crate::signals;
use crate::state::AppState;

/// How often `Message::Tick` drives polls and timers
pub const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Lightweight snapshot of state for change detection.
///
/// Captured before message processing, compared after to detect
/// what changed and emit appropriate EngineEvents.
#[derive(Debug, Clone)]
struct StateSnapshot {
    install_phase: InstallPhase,
    install_finished: Option<bool>,
    environments: Vec<String>,
    backends: BTreeMap<String, (BackendStatus, Option<String>)>,
    jupyter: BTreeMap<String, (JupyterStatus, Option<String>)>,
    log_received: BTreeMap<String, u64>,
    error: Option<String>,
    host_connected: bool,
}

impl StateSnapshot {
    fn capture(state: &AppState) -> Self {
        Self {
            install_phase: state.installer.phase,
            install_finished: state.installer.outcome.as_ref().map(|outcome| match outcome {
                InstallOutcome::ContinueToEnvironments { configured } => *configured,
            }),
            environments: state
                .environments
                .items
                .iter()
                .map(|env| env.name.clone())
                .collect(),
            backends: state
                .backends
                .items
                .iter()
                .map(|b| (b.id.clone(), (b.status, b.error.clone())))
                .collect(),
            jupyter: state
                .jupyter
                .servers
                .iter()
                .map(|(env, server)| (env.clone(), (server.status, server.url.clone())))
                .collect(),
            log_received: state
                .log_views
                .iter()
                .map(|view| (view.process_id.clone(), view.received))
                .collect(),
            error: state.error.clone(),
            host_connected: state.host_connected,
        }
    }
}

/// Orchestration engine for envpilot.
///
/// Encapsulates everything a frontend needs:
/// - TEA state management
/// - Message channel
/// - Host bridge handle
/// - Shutdown signaling
/// - Event broadcasting for external consumers
pub struct Engine<B> {
    /// TEA application state (the Model)
    pub state: AppState,

    /// Sender half of the unified message channel.
    /// Clone this to give to input sources (signal handler, host events, stdin).
    pub msg_tx: mpsc::Sender<Message>,

    /// Receiver half of the unified message channel.
    pub msg_rx: mpsc::Receiver<Message>,

    /// Sender for the shutdown signal. Send `true` to initiate shutdown.
    pub shutdown_tx: watch::Sender<bool>,

    /// Receiver for the shutdown signal. Clone for background tasks.
    pub shutdown_rx: watch::Receiver<bool>,

    bridge: Arc<B>,

    /// Subscribers receive EngineEvents after each message processing cycle.
    event_tx: broadcast::Sender<EngineEvent>,
}

impl<B> Engine<B>
where
    B: HostBridge + Send + Sync + 'static,
{
    /// Create an Engine from the config directory.
    ///
    /// Loads settings and the local cache, then spawns the signal handler.
    pub fn new(config_dir: &Path, bridge: Arc<B>) -> Self {
        if let Err(e) = config::init_config_dir(config_dir) {
            warn!("Failed to initialize config directory: {}", e);
        }

        let settings = config::load_settings(config_dir);
        let cache_path = settings
            .cache
            .path
            .clone()
            .unwrap_or_else(default_cache_path);
        let cache = AppCache::load_or_default(&cache_path);

        let state = AppState::with_settings(settings).with_cache(cache, Some(cache_path));
        let engine = Self::with_state(state, bridge);

        signals::spawn_signal_handler(engine.msg_tx.clone());
        engine
    }

    /// Create an Engine around an existing state, without touching the
    /// filesystem or installing signal handlers
    pub fn with_state(state: AppState, bridge: Arc<B>) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel::<Message>(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (event_tx, _) = broadcast::channel(256);

        Self {
            state,
            msg_tx,
            msg_rx,
            shutdown_tx,
            shutdown_rx,
            bridge,
            event_tx,
        }
    }

    /// Subscribe to engine events.
    ///
    /// If the subscriber falls behind (buffer full), older events are
    /// dropped. Use `broadcast::error::RecvError::Lagged` to detect this.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    pub fn bridge(&self) -> &Arc<B> {
        &self.bridge
    }

    /// Process a single message through the TEA update cycle and emit
    /// events for whatever changed
    pub fn process_message(&mut self, msg: Message) {
        let pre = StateSnapshot::capture(&self.state);

        process::process_message(&mut self.state, msg, &self.msg_tx, &self.bridge);

        let post = StateSnapshot::capture(&self.state);
        self.emit_events(&pre, &post);
    }

    /// Drain and process all pending messages from the channel.
    ///
    /// Returns the number of messages processed.
    pub fn drain_pending_messages(&mut self) -> usize {
        let mut count = 0;
        while let Ok(msg) = self.msg_rx.try_recv() {
            self.process_message(msg);
            count += 1;
        }
        count
    }

    /// Get a clone of the message sender for spawning input sources.
    pub fn msg_sender(&self) -> mpsc::Sender<Message> {
        self.msg_tx.clone()
    }

    /// Get a clone of the shutdown receiver for background tasks.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn should_quit(&self) -> bool {
        self.state.should_quit()
    }

    /// Forward host process events into the message channel until the
    /// host goes away or shutdown is signalled
    pub fn forward_host_events(&self, mut events: mpsc::Receiver<HostEvent>) {
        let msg_tx = self.msg_tx.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => {
                        let Some(event) = event else {
                            debug!("Host event stream closed");
                            break;
                        };
                        if msg_tx.send(host_message(event)).await.is_err() {
                            break;
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Drive the message loop until quit or shutdown.
    ///
    /// Messages are processed as they arrive; a `Message::Tick` is fed in
    /// every [`TICK_INTERVAL`].
    pub async fn run(&mut self) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown_rx = self.shutdown_rx.clone();

        while !self.should_quit() {
            tokio::select! {
                msg = self.msg_rx.recv() => match msg {
                    Some(msg) => self.process_message(msg),
                    None => {
                        info!("Message channel closed");
                        break;
                    }
                },
                now = ticker.tick() => {
                    self.process_message(Message::Tick { now: now.into_std() });
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signalled");
                        break;
                    }
                }
            }
        }
    }

    /// Initiate shutdown: notify subscribers and signal background tasks.
    pub async fn shutdown(&mut self) {
        self.emit(EngineEvent::Shutdown);
        let _ = self.shutdown_tx.send(true);
    }

    /// Compare pre/post snapshots and emit an event per change.
    fn emit_events(&self, pre: &StateSnapshot, post: &StateSnapshot) {
        if pre.install_phase != post.install_phase {
            self.emit(EngineEvent::InstallerPhaseChanged {
                old_phase: pre.install_phase,
                new_phase: post.install_phase,
            });
        }
        if pre.install_finished.is_none() {
            if let Some(configured) = post.install_finished {
                self.emit(EngineEvent::InstallerFinished { configured });
            }
        }

        if pre.environments != post.environments {
            self.emit(EngineEvent::EnvironmentsChanged {
                names: post.environments.clone(),
            });
        }

        for (id, (status, error)) in &post.backends {
            let old = pre.backends.get(id);
            if old != Some(&(*status, error.clone())) {
                self.emit(EngineEvent::BackendStatusChanged {
                    id: id.clone(),
                    old_status: old.map(|(s, _)| *s),
                    new_status: *status,
                    error: error.clone(),
                });
            }
        }
        for id in pre.backends.keys() {
            if !post.backends.contains_key(id) {
                self.emit(EngineEvent::BackendRemoved { id: id.clone() });
            }
        }

        for (environment, (status, url)) in &post.jupyter {
            let (old_status, old_url) = pre
                .jupyter
                .get(environment)
                .cloned()
                .unwrap_or((JupyterStatus::Stopped, None));
            if old_status != *status || old_url != *url {
                self.emit(EngineEvent::JupyterStatusChanged {
                    environment: environment.clone(),
                    old_status,
                    new_status: *status,
                    url: url.clone(),
                });
            }
        }

        for (process_id, received) in &post.log_received {
            let before = pre.log_received.get(process_id).copied().unwrap_or(0);
            let new_count = received.saturating_sub(before) as usize;
            if new_count == 0 {
                continue;
            }
            let Some(view) = self.state.log_views.get(process_id) else {
                continue;
            };
            let mut entries = view.buffer.get_logs(Some(new_count));

            // Use batch emission for multiple logs
            if entries.len() > 1 {
                self.emit(EngineEvent::LogBatch {
                    process_id: process_id.clone(),
                    entries,
                });
            } else if let Some(entry) = entries.pop() {
                self.emit(EngineEvent::LogEntry { entry });
            }
        }

        if post.error != pre.error {
            if let Some(message) = &post.error {
                self.emit(EngineEvent::Error {
                    message: message.clone(),
                });
            }
        }

        if pre.host_connected && !post.host_connected {
            self.emit(EngineEvent::HostDisconnected);
        }
    }

    /// send() returns Err only if there are no receivers, which is fine.
    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }
}

fn host_message(event: HostEvent) -> Message {
    match event {
        HostEvent::Bridge(event) => Message::Bridge(event),
        HostEvent::Exited { code } => Message::HostExited { code },
    }
}
