//! Host bridge process management

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Notify};

use envpilot_core::prelude::*;
use envpilot_core::BridgeEvent;

use crate::commands::{BridgeSender, RequestTracker, DEFAULT_REQUEST_TIMEOUT};
use crate::protocol::{parse_host_line, HostMessage};

/// How long `shutdown` waits for the host to exit after stdin closes
const GRACEFUL_EXIT_TIMEOUT: Duration = Duration::from_secs(2);

/// What the host process pushes to the application
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Bridge(BridgeEvent),
    /// The host process exited
    Exited { code: Option<i32> },
}

/// How to launch the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    pub program: String,
    pub args: Vec<String>,
    pub request_timeout: Duration,
}

impl HostCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Resolve the program through `PATH`
    pub fn resolve(&self) -> Result<PathBuf> {
        which::which(&self.program).map_err(|_| Error::HostNotFound {
            command: self.program.clone(),
        })
    }
}

/// Manages the host child process.
///
/// The `Child` handle is moved into a `wait_for_exit` task which emits
/// `HostEvent::Exited`. `HostProcess` keeps a kill channel, an exit flag for
/// synchronous checks and a `Notify` so `shutdown()` can await exit.
pub struct HostProcess {
    sender: BridgeSender,
    pid: Option<u32>,
    /// Closed on shutdown so the host sees EOF on stdin
    close_tx: Option<oneshot::Sender<()>>,
    kill_tx: Option<oneshot::Sender<()>>,
    exited: Arc<AtomicBool>,
    exit_notify: Arc<Notify>,
}

impl HostProcess {
    /// Spawn the host and start the stdio pumps
    pub fn spawn(command: &HostCommand, event_tx: mpsc::Sender<HostEvent>) -> Result<Self> {
        let program = command.resolve()?;

        info!(
            "Spawning host bridge: {} {}",
            program.display(),
            command.args.join(" ")
        );

        let mut child = Command::new(&program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::HostNotFound {
                        command: command.program.clone(),
                    }
                } else {
                    Error::host_spawn(e.to_string())
                }
            })?;

        let pid = child.id();
        info!("Host bridge started with PID: {:?}", pid);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::host_spawn("stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::host_spawn("stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::host_spawn("stderr was not captured"))?;

        let tracker = Arc::new(RequestTracker::new());
        let (stdin_tx, stdin_rx) = mpsc::channel::<String>(64);
        let (close_tx, close_rx) = oneshot::channel::<()>();
        tokio::spawn(Self::stdin_writer(stdin, stdin_rx, close_rx));
        tokio::spawn(Self::stdout_reader(
            stdout,
            Arc::clone(&tracker),
            event_tx.clone(),
        ));
        tokio::spawn(Self::stderr_reader(stderr));

        let exited = Arc::new(AtomicBool::new(false));
        let exit_notify = Arc::new(Notify::new());
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(Self::wait_for_exit(
            child,
            kill_rx,
            event_tx,
            Arc::clone(&tracker),
            Arc::clone(&exited),
            Arc::clone(&exit_notify),
        ));

        let sender = BridgeSender::new(stdin_tx, tracker).with_timeout(command.request_timeout);

        Ok(Self {
            sender,
            pid,
            close_tx: Some(close_tx),
            kill_tx: Some(kill_tx),
            exited,
            exit_notify,
        })
    }

    /// Background task: owns `child`, waits for it to exit, emits `HostEvent::Exited`.
    async fn wait_for_exit(
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        event_tx: mpsc::Sender<HostEvent>,
        tracker: Arc<RequestTracker>,
        exited: Arc<AtomicBool>,
        exit_notify: Arc<Notify>,
    ) {
        let code: Option<i32> = tokio::select! {
            result = child.wait() => {
                match result {
                    Ok(status) => {
                        info!("Host bridge exited with status: {:?}", status);
                        status.code()
                    }
                    Err(e) => {
                        error!("Error waiting for host bridge: {}", e);
                        None
                    }
                }
            }
            _ = kill_rx => {
                info!("Kill signal received, force-killing host bridge");
                if let Err(e) = child.kill().await {
                    error!("Failed to kill host bridge: {}", e);
                }
                child.wait().await.ok().and_then(|status| status.code())
            }
        };

        exited.store(true, Ordering::Release);
        exit_notify.notify_waiters();

        // No response can arrive any more
        tracker.cancel_all().await;

        let _ = event_tx.send(HostEvent::Exited { code }).await;
    }

    async fn stdout_reader(
        stdout: tokio::process::ChildStdout,
        tracker: Arc<RequestTracker>,
        tx: mpsc::Sender<HostEvent>,
    ) {
        let mut reader = BufReader::new(stdout).lines();

        while let Ok(Some(line)) = reader.next_line().await {
            trace!("host stdout: {}", line);

            match parse_host_line(&line) {
                Some(HostMessage::Response { id, result, error }) => {
                    if !tracker.handle_response(id, result, error).await {
                        debug!("Response #{} had no pending request", id);
                    }
                }
                Some(HostMessage::Event(event)) => {
                    if tx.send(HostEvent::Bridge(event)).await.is_err() {
                        debug!("host event channel closed");
                        break;
                    }
                }
                None => debug!("Ignoring non-protocol host output: {}", line),
            }
        }

        info!("host stdout reader finished, process likely exiting");
    }

    async fn stderr_reader(stderr: tokio::process::ChildStderr) {
        let mut reader = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            warn!(target: "envpilot::host", "{}", line);
        }
        debug!("host stderr reader finished");
    }

    async fn stdin_writer(
        mut stdin: tokio::process::ChildStdin,
        mut rx: mpsc::Receiver<String>,
        mut close_rx: oneshot::Receiver<()>,
    ) {
        loop {
            let line = tokio::select! {
                line = rx.recv() => match line {
                    Some(line) => line,
                    None => break,
                },
                _ = &mut close_rx => break,
            };

            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                error!("Failed to write to host stdin: {}", e);
                break;
            }
            if let Err(e) = stdin.write_all(b"\n").await {
                error!("Failed to write newline: {}", e);
                break;
            }
            if let Err(e) = stdin.flush().await {
                error!("Failed to flush host stdin: {}", e);
                break;
            }
        }

        debug!("host stdin writer finished");
    }

    /// Request sender bound to this process
    pub fn sender(&self) -> BridgeSender {
        self.sender.clone()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Close stdin, wait briefly for the host to exit, then kill it.
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.has_exited() {
            info!("Host bridge already exited");
            return Ok(());
        }

        info!("Shutting down host bridge");
        self.sender.tracker().cancel_all().await;

        let notified = self.exit_notify.notified();
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }

        if self.has_exited() {
            return Ok(());
        }

        if tokio::time::timeout(GRACEFUL_EXIT_TIMEOUT, notified)
            .await
            .is_ok()
        {
            info!("Host bridge exited gracefully");
            return Ok(());
        }

        warn!("Host bridge did not exit in time, killing");
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        Ok(())
    }
}

impl Drop for HostProcess {
    fn drop(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_is_host_not_found() {
        let cmd = HostCommand::new("envpilot-host-that-does-not-exist-4242");
        let err = cmd.resolve().unwrap_err();
        assert!(matches!(err, Error::HostNotFound { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_host_command_builder() {
        let cmd = HostCommand::new("envpilot-host")
            .args(vec!["--stdio".into()])
            .request_timeout(Duration::from_secs(5));
        assert_eq!(cmd.args, vec!["--stdio"]);
        assert_eq!(cmd.request_timeout, Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_echo_host_round_trip() {
        // `cat` echoes each request line back, which parses as a response
        // with the same id and no result.
        let (tx, _rx) = mpsc::channel(8);
        let mut host = HostProcess::spawn(&HostCommand::new("cat"), tx).unwrap();
        let response = host
            .sender()
            .send(&crate::BridgeCommand::ListBackends)
            .await
            .unwrap();
        assert!(response.success);
        host.shutdown().await.unwrap();
    }
}
