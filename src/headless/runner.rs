//! Headless mode runner - main event loop without UI
//!
//! Spawns the host bridge, reads intents from stdin and writes every engine
//! event to stdout.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use envpilot_app::{config, Engine, EngineEvent, Message};
use envpilot_bridge::{BridgeClient, HostBridge, HostCommand, HostProcess};
use envpilot_core::prelude::*;

use super::{HeadlessEvent, HeadlessIntent};

/// Run in headless mode against the configured host executable
pub async fn run_headless(config_dir: &Path) -> Result<()> {
    info!("═══════════════════════════════════════════════════════");
    info!("envpilot starting in HEADLESS mode");
    info!("Config: {}", config_dir.display());
    info!("═══════════════════════════════════════════════════════");

    let settings = config::load_settings(config_dir);
    let command = HostCommand::new(settings.bridge.command.clone())
        .args(settings.bridge.args.clone())
        .request_timeout(settings.bridge.request_timeout());

    let (host_tx, host_rx) = mpsc::channel(256);
    let mut host = HostProcess::spawn(&command, host_tx)?;
    let bridge = Arc::new(BridgeClient::new(host.sender()));

    let mut engine = Engine::new(config_dir, bridge);
    engine.forward_host_events(host_rx);

    drive(
        &mut engine,
        std::io::BufReader::new(std::io::stdin()),
        std::io::stdout(),
    )
    .await?;

    if let Err(e) = host.shutdown().await {
        warn!("Host shutdown failed: {}", e);
    }

    info!("envpilot headless mode exiting");
    Ok(())
}

/// Run the engine until quit, feeding it intents from `input` and writing
/// events to `output`. Returns the writer once the final event is out.
pub async fn drive<B, R, W>(engine: &mut Engine<B>, input: R, output: W) -> Result<W>
where
    B: HostBridge + Send + Sync + 'static,
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    let (notice_tx, notice_rx) = mpsc::unbounded_channel();
    let printer = spawn_printer(engine.subscribe(), notice_rx, output);

    let msg_tx = engine.msg_sender();
    std::thread::spawn(move || read_intents(input, msg_tx, notice_tx));

    headless_auto_start(engine);
    engine.run().await;
    engine.shutdown().await;

    printer
        .await
        .map_err(|e| Error::channel_send(format!("headless printer failed: {}", e)))
}

/// Initial fetches so the first events describe what already exists
fn headless_auto_start<B>(engine: &mut Engine<B>)
where
    B: HostBridge + Send + Sync + 'static,
{
    engine.process_message(Message::RefreshEnvironments);
    engine.process_message(Message::RefreshBackends);
    if !engine.state.cache.onboarding.installation_complete {
        info!("Installation not recorded as complete; waiting for start_installation");
    }
}

fn spawn_printer<W>(
    mut events: broadcast::Receiver<EngineEvent>,
    mut notices: mpsc::UnboundedReceiver<HeadlessEvent>,
    mut out: W,
) -> JoinHandle<W>
where
    W: Write + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(notice) = notices.recv() => write_event(&mut out, &notice),
                event = events.recv() => match event {
                    Ok(event) => {
                        let done = event == EngineEvent::Shutdown;
                        write_event(&mut out, &HeadlessEvent::new(event));
                        if done {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Headless output fell behind, {} events dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        out
    })
}

fn write_event(out: &mut impl Write, event: &HeadlessEvent) {
    if let Err(e) = event.write_to(out) {
        error!("Failed to write headless event: {}", e);
    }
}

/// Blocking reader: one intent per line until EOF
fn read_intents<R: BufRead>(
    input: R,
    msg_tx: mpsc::Sender<Message>,
    notices: mpsc::UnboundedSender<HeadlessEvent>,
) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        };

        match HeadlessIntent::parse(&line) {
            Ok(Some(intent)) => {
                let quit = intent == HeadlessIntent::Quit;
                if msg_tx.blocking_send(intent.into()).is_err() || quit {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Invalid intent '{}': {}", line.trim(), e);
                let _ = notices.send(HeadlessEvent::error(format!("invalid intent: {}", e)));
            }
        }
    }

    info!("Stdin reader exiting");
}
