//! End-to-end flows through the engine, the action dispatcher and a
//! scripted host bridge

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;

use envpilot_app::{AppState, Engine, EngineEvent, InstallOutcome, Message};
use envpilot_bridge::test_utils::{test_backend, test_environment, FakeBridge};
use envpilot_core::{
    BackendStatus, BridgeEvent, InstallPhase, InstallProgress, JupyterStatus, ProcessOutput,
};

fn engine(bridge: &Arc<FakeBridge>) -> Engine<FakeBridge> {
    Engine::with_state(AppState::new(), bridge.clone())
}

/// Process action results until the bridge goes quiet
async fn pump(engine: &mut Engine<FakeBridge>) {
    while let Ok(Some(msg)) =
        tokio::time::timeout(Duration::from_millis(200), engine.msg_rx.recv()).await
    {
        engine.process_message(msg);
    }
}

fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn output(process_id: &str, line: &str) -> Message {
    Message::Bridge(BridgeEvent::ProcessOutput(ProcessOutput {
        process_id: process_id.into(),
        output: line.into(),
        timestamp: 1_700_000_000_000,
        stream: Some("stderr".into()),
    }))
}

fn environment_names(engine: &Engine<FakeBridge>) -> Vec<String> {
    engine
        .state
        .environments
        .items
        .iter()
        .map(|e| e.name.clone())
        .collect()
}

#[tokio::test]
async fn test_backend_traceback_stops_once_and_reports_error() {
    let bridge = Arc::new(FakeBridge::new());
    bridge.respond_always("list_backend_services", json!([test_backend("b1")]));
    let mut engine = engine(&bridge);

    engine.process_message(Message::RefreshBackends);
    pump(&mut engine).await;
    assert_eq!(engine.state.backends.items.len(), 1);

    let mut rx = engine.subscribe();
    engine.process_message(Message::StartBackend { id: "b1".into() });
    pump(&mut engine).await;

    assert_eq!(bridge.count("register_process_monitoring"), 1);
    assert_eq!(bridge.count("start_backend_service"), 1);
    // The host still lists it as stopped; the local start wins
    assert_eq!(
        engine.state.backends.status("b1"),
        Some(BackendStatus::Starting)
    );

    for line in [
        "Traceback (most recent call last):",
        "  File \"/envs/openbb/bin/openbb-api\", line 5, in <module>",
        "ModuleNotFoundError: No module named 'openbb_platform_api'",
        "",
    ] {
        engine.process_message(output("backend-b1", line));
    }
    engine.process_message(output("backend-b1", "ERROR: later noise"));
    pump(&mut engine).await;

    assert_eq!(bridge.count("stop_backend_service"), 1);
    assert_eq!(bridge.count("update_backend_service"), 1);

    let events = drain(&mut rx);
    let failure = events.iter().find_map(|event| match event {
        EngineEvent::BackendStatusChanged {
            new_status: BackendStatus::Error,
            error,
            ..
        } => error.clone(),
        _ => None,
    });
    let failure = failure.expect("backend error event");
    assert!(failure.contains("ModuleNotFoundError"));

    assert!(events.iter().any(|event| matches!(
        event,
        EngineEvent::LogEntry { entry } if entry.process_id == "backend-b1"
    )));
}

#[tokio::test]
async fn test_create_environment_refreshes_list() {
    let bridge = Arc::new(FakeBridge::new());
    bridge.respond_always(
        "list_conda_environments",
        json!([test_environment("base"), test_environment("ml")]),
    );
    let mut engine = engine(&bridge);
    let mut rx = engine.subscribe();

    engine.process_message(Message::CreateEnvironment {
        name: "ml".into(),
        python_version: "3.12".into(),
        extensions: vec!["numpy".into()],
    });
    assert!(engine.state.environments.is_busy("ml"));
    pump(&mut engine).await;

    assert!(!engine.state.environments.is_busy("ml"));
    assert_eq!(environment_names(&engine), vec!["base", "ml"]);
    assert_eq!(bridge.count("create_environment"), 1);
    assert_eq!(bridge.count("unregister_process_monitoring"), 1);
    assert!(drain(&mut rx).contains(&EngineEvent::EnvironmentsChanged {
        names: vec!["base".into(), "ml".into()]
    }));
}

#[tokio::test]
async fn test_removed_environment_stays_hidden_until_host_catches_up() {
    let bridge = Arc::new(FakeBridge::new());
    let both = json!([test_environment("base"), test_environment("ml")]);
    bridge.respond("list_conda_environments", both.clone());
    bridge.respond("list_conda_environments", both);
    bridge.respond("list_conda_environments", json!([test_environment("base")]));
    let mut engine = engine(&bridge);

    engine.process_message(Message::RefreshEnvironments);
    pump(&mut engine).await;
    assert_eq!(environment_names(&engine), vec!["base", "ml"]);

    engine.process_message(Message::RemoveEnvironment { name: "ml".into() });
    assert_eq!(environment_names(&engine), vec!["base"]);
    pump(&mut engine).await;

    // Host listing still has it, pending deletion hides it
    assert_eq!(bridge.count("remove_environment"), 1);
    assert_eq!(environment_names(&engine), vec!["base"]);

    engine.process_message(Message::RefreshEnvironments);
    pump(&mut engine).await;
    assert_eq!(environment_names(&engine), vec!["base"]);
    assert!(!engine.state.cache.is_pending_deletion("ml"));
}

#[tokio::test]
async fn test_jupyter_start_reaches_running() {
    let bridge = Arc::new(FakeBridge::new());
    bridge.respond_always(
        "check_jupyter_server",
        json!({"running": true, "url": "http://localhost:8888/lab?token=abc", "status": "running"}),
    );
    let mut engine = engine(&bridge);
    let mut rx = engine.subscribe();

    engine.process_message(Message::StartJupyter {
        environment: "base".into(),
        directory: "/work".into(),
    });
    pump(&mut engine).await;

    assert_eq!(engine.state.jupyter.status("base"), JupyterStatus::Running);
    let events = drain(&mut rx);
    assert!(events.iter().any(|event| matches!(
        event,
        EngineEvent::JupyterStatusChanged {
            new_status: JupyterStatus::Running,
            url: Some(url),
            ..
        } if url.contains("token=abc")
    )));
}

#[tokio::test]
async fn test_installer_runs_to_completion() {
    let bridge = Arc::new(FakeBridge::new());
    let mut engine = engine(&bridge);
    let mut rx = engine.subscribe();

    engine.process_message(Message::StartInstallation {
        directory: "/opt/openbb".into(),
    });
    pump(&mut engine).await;
    assert_eq!(bridge.count("install_conda"), 1);

    engine.process_message(Message::Bridge(BridgeEvent::InstallProgress(
        InstallProgress::new("install", 1.0, "Miniforge installation completed"),
    )));
    assert_eq!(engine.state.installer.phase, InstallPhase::VersionSelect);

    engine.process_message(Message::ConfirmPythonVersion);
    pump(&mut engine).await;
    assert_eq!(engine.state.installer.phase, InstallPhase::ExtensionSelect);

    engine.process_message(Message::SkipExtensions);
    pump(&mut engine).await;

    assert_eq!(engine.state.installer.phase, InstallPhase::Complete);
    assert_eq!(bridge.count("create_default_backend_services"), 1);
    assert_eq!(
        engine.state.installer.outcome,
        Some(InstallOutcome::ContinueToEnvironments { configured: true })
    );

    let events = drain(&mut rx);
    assert!(events.contains(&EngineEvent::InstallerFinished { configured: true }));
    assert!(events.contains(&EngineEvent::InstallerPhaseChanged {
        old_phase: InstallPhase::Configuring,
        new_phase: InstallPhase::Complete,
    }));
}

#[tokio::test]
async fn test_failed_start_surfaces_host_error() {
    let bridge = Arc::new(FakeBridge::new());
    bridge.respond_always("list_backend_services", json!([test_backend("b1")]));
    bridge.fail("start_backend_service", "port 6900 is taken");
    let mut engine = engine(&bridge);

    engine.process_message(Message::RefreshBackends);
    pump(&mut engine).await;

    let mut rx = engine.subscribe();
    engine.process_message(Message::StartBackend { id: "b1".into() });
    pump(&mut engine).await;

    assert_eq!(engine.state.backends.status("b1"), Some(BackendStatus::Error));
    assert!(drain(&mut rx).contains(&EngineEvent::Error {
        message: "port 6900 is taken".into()
    }));
}
