//! Per-process log monitors
//!
//! A [`ProcessMonitor`] turns the output stream of one host process into
//! [`MonitorOutcome`]s: it classifies each line, collects Python tracebacks
//! and runs the confirmation failsafe. The entity-specific wrappers add what
//! their owner needs on top (jupyter status polling, environment operation
//! logs). Monitors never touch list state themselves; the owning list
//! handler applies the outcomes.

use std::time::{Duration, Instant};

use envpilot_core::prelude::*;
use envpilot_core::{
    classify_line, CollectorConfig, FeedResult, JupyterStatus, LogClassification, Traceback,
    TracebackCollector,
};

/// Default upper bound on the "waiting for confirmation" spinner
pub const DEFAULT_CONFIRMATION_FAILSAFE: Duration = Duration::from_secs(45);

/// Structured result of feeding output to a monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// The process hit an error; `detail` is the raw line or the traceback
    Failed { detail: String },
    /// The server printed its pid
    PidDiscovered { pid: u32 },
    /// Nothing confirmed startup before the failsafe elapsed
    ConfirmationExpired,
}

// ─────────────────────────────────────────────────────────────────────────────
// ProcessMonitor
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ProcessMonitor {
    process_id: String,
    collector: TracebackCollector,
    failsafe: Duration,
    awaiting_since: Option<Instant>,
    /// Set after a failure; later output cannot fail the process again
    failed: bool,
    /// Set while a requested stop is in flight; shutdown noise is ignored
    standing_down: bool,
}

impl ProcessMonitor {
    pub fn new(process_id: impl Into<String>, config: CollectorConfig, failsafe: Duration) -> Self {
        Self {
            process_id: process_id.into(),
            collector: TracebackCollector::new(config),
            failsafe,
            awaiting_since: None,
            failed: false,
            standing_down: false,
        }
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    /// Start a fresh run: clear failure state and wait for confirmation
    pub fn arm(&mut self, now: Instant) {
        self.watch();
        self.awaiting_since = Some(now);
    }

    /// Watch a process that is already running, without a confirmation wait
    pub fn watch(&mut self) {
        self.collector.reset();
        self.failed = false;
        self.standing_down = false;
        self.awaiting_since = None;
    }

    /// The process is being stopped on request: stop classifying its output
    pub fn stand_down(&mut self) {
        self.collector.reset();
        self.standing_down = true;
        self.awaiting_since = None;
    }

    pub fn is_standing_down(&self) -> bool {
        self.standing_down
    }

    /// Stop waiting for confirmation without an outcome
    pub fn disarm(&mut self) {
        self.awaiting_since = None;
    }

    pub fn is_awaiting_confirmation(&self) -> bool {
        self.awaiting_since.is_some()
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn is_collecting_traceback(&self) -> bool {
        self.collector.is_collecting()
    }

    /// Feed one output line received at `now`
    pub fn feed_line(&mut self, line: &str, now: Instant) -> Option<MonitorOutcome> {
        if self.failed || self.standing_down {
            return None;
        }

        if self.collector.is_collecting() {
            match self.collector.feed_line(line, now) {
                FeedResult::Buffered => return None,
                FeedResult::Complete { traceback, .. } => {
                    // The terminating prompt line, if any, is ignored: the
                    // process is being stopped anyway.
                    return Some(self.fail_with_traceback(traceback));
                }
                FeedResult::NotConsumed => {}
            }
        }

        match classify_line(line) {
            LogClassification::TracebackStart => {
                self.collector.feed_line(line, now);
                None
            }
            LogClassification::Error { detail } => {
                warn!("[{}] error in output: {}", self.process_id, detail);
                Some(self.fail(detail))
            }
            LogClassification::Started { pid } => {
                debug!("[{}] started with pid {}", self.process_id, pid);
                self.awaiting_since = None;
                Some(MonitorOutcome::PidDiscovered { pid })
            }
            LogClassification::Ordinary => None,
        }
    }

    /// Advance timers: traceback silence and the confirmation failsafe
    pub fn tick(&mut self, now: Instant) -> Option<MonitorOutcome> {
        if !self.failed && !self.standing_down {
            if let Some(traceback) = self.collector.poll_timeout(now) {
                return Some(self.fail_with_traceback(traceback));
            }
        }

        if let Some(since) = self.awaiting_since {
            if now.saturating_duration_since(since) >= self.failsafe {
                debug!("[{}] confirmation failsafe elapsed", self.process_id);
                self.awaiting_since = None;
                return Some(MonitorOutcome::ConfirmationExpired);
            }
        }

        None
    }

    /// Earliest instant at which [`tick`](Self::tick) could produce an outcome
    pub fn next_deadline(&self) -> Option<Instant> {
        let failsafe = self.awaiting_since.map(|t| t + self.failsafe);
        match (self.collector.deadline(), failsafe) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn fail_with_traceback(&mut self, traceback: Traceback) -> MonitorOutcome {
        warn!(
            "[{}] traceback: {}",
            self.process_id,
            traceback.summary().unwrap_or("<empty>")
        );
        self.fail(traceback.detail())
    }

    fn fail(&mut self, detail: String) -> MonitorOutcome {
        self.failed = true;
        self.awaiting_since = None;
        self.collector.reset();
        MonitorOutcome::Failed { detail }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BackendMonitor
// ─────────────────────────────────────────────────────────────────────────────

/// Monitor for one backend service
#[derive(Debug)]
pub struct BackendMonitor {
    pub backend_id: String,
    pub process: ProcessMonitor,
}

impl BackendMonitor {
    pub fn new(backend_id: impl Into<String>, config: CollectorConfig, failsafe: Duration) -> Self {
        let backend_id = backend_id.into();
        let process = ProcessMonitor::new(
            envpilot_core::ProcessId::backend(&backend_id),
            config,
            failsafe,
        );
        Self {
            backend_id,
            process,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JupyterMonitor
// ─────────────────────────────────────────────────────────────────────────────

/// What the jupyter monitor wants done on a tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JupyterTick {
    Idle,
    /// Ask the host for the server status
    Poll,
    /// The server did not come up in time
    TimedOut,
}

/// Monitor for one environment's Jupyter server
///
/// While the server is starting or stopping its status is polled every
/// `poll_interval`; a start that has not reached `running` after
/// `start_timeout` is reported as timed out.
#[derive(Debug)]
pub struct JupyterMonitor {
    pub environment: String,
    pub process: ProcessMonitor,
    poll_interval: Duration,
    start_timeout: Duration,
    transition_started: Option<Instant>,
    next_poll: Option<Instant>,
}

impl JupyterMonitor {
    pub fn new(
        environment: impl Into<String>,
        config: CollectorConfig,
        failsafe: Duration,
        poll_interval: Duration,
        start_timeout: Duration,
    ) -> Self {
        let environment = environment.into();
        let process = ProcessMonitor::new(
            envpilot_core::ProcessId::jupyter(&environment),
            config,
            failsafe,
        );
        Self {
            environment,
            process,
            poll_interval,
            start_timeout,
            transition_started: None,
            next_poll: None,
        }
    }

    /// Track a status change; polling runs only while transitional
    pub fn observe_status(&mut self, status: JupyterStatus, now: Instant) {
        if status.is_transitional() {
            if self.transition_started.is_none() {
                self.transition_started = Some(now);
                self.next_poll = Some(now + self.poll_interval);
            }
        } else {
            self.transition_started = None;
            self.next_poll = None;
        }
    }

    pub fn is_polling(&self) -> bool {
        self.next_poll.is_some()
    }

    pub fn tick(&mut self, now: Instant) -> JupyterTick {
        let Some(started) = self.transition_started else {
            return JupyterTick::Idle;
        };

        if now.saturating_duration_since(started) >= self.start_timeout {
            self.transition_started = None;
            self.next_poll = None;
            return JupyterTick::TimedOut;
        }

        match self.next_poll {
            Some(due) if now >= due => {
                self.next_poll = Some(now + self.poll_interval);
                JupyterTick::Poll
            }
            _ => JupyterTick::Idle,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EnvironmentMonitor
// ─────────────────────────────────────────────────────────────────────────────

/// Output tracking for a long-running environment operation
/// (create, update, install)
#[derive(Debug)]
pub struct EnvironmentMonitor {
    pub name: String,
    pub process: ProcessMonitor,
    /// Most recent non-empty line, shown as operation progress
    pub last_line: Option<String>,
    pub lines_seen: usize,
}

impl EnvironmentMonitor {
    pub fn new(name: impl Into<String>, config: CollectorConfig) -> Self {
        let name = name.into();
        // Environment operations have no startup confirmation to wait for
        let process = ProcessMonitor::new(
            envpilot_core::ProcessId::environment(&name),
            config,
            Duration::ZERO,
        );
        Self {
            name,
            process,
            last_line: None,
            lines_seen: 0,
        }
    }

    pub fn feed_line(&mut self, line: &str, now: Instant) -> Option<MonitorOutcome> {
        self.lines_seen += 1;
        let trimmed = envpilot_core::strip_ansi_codes(line).trim().to_string();
        if !trimmed.is_empty() {
            self.last_line = Some(trimmed);
        }
        self.process.feed_line(line, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> ProcessMonitor {
        ProcessMonitor::new(
            "backend-b1",
            CollectorConfig::default(),
            DEFAULT_CONFIRMATION_FAILSAFE,
        )
    }

    #[test]
    fn test_error_line_fails_once() {
        let mut m = monitor();
        let now = Instant::now();
        m.arm(now);

        let outcome = m.feed_line("ERROR: [Errno 98] address already in use", now);
        assert_eq!(
            outcome,
            Some(MonitorOutcome::Failed {
                detail: "ERROR: [Errno 98] address already in use".into()
            })
        );
        assert!(m.has_failed());
        assert!(!m.is_awaiting_confirmation());

        assert_eq!(m.feed_line("ERROR: again", now), None);
    }

    #[test]
    fn test_stand_down_ignores_shutdown_noise() {
        let mut m = monitor();
        let now = Instant::now();
        m.arm(now);
        m.feed_line("Traceback (most recent call last):", now);
        m.stand_down();

        assert!(!m.is_collecting_traceback());
        assert_eq!(m.feed_line("ERROR:    Exception in ASGI application", now), None);
        assert_eq!(m.tick(now + Duration::from_secs(60)), None);
        assert!(!m.has_failed());

        m.watch();
        assert!(!m.is_standing_down());
        assert!(m.feed_line("ERROR: boom", now).is_some());
    }

    #[test]
    fn test_traceback_blank_line_path() {
        let mut m = monitor();
        let now = Instant::now();

        assert_eq!(m.feed_line("Traceback (most recent call last):", now), None);
        assert_eq!(m.feed_line("  File x", now), None);
        let outcome = m.feed_line("", now);
        assert_eq!(
            outcome,
            Some(MonitorOutcome::Failed {
                detail: "Traceback (most recent call last):\n  File x\n".into()
            })
        );
    }

    #[test]
    fn test_traceback_timeout_path() {
        let mut m = monitor();
        let start = Instant::now();

        m.feed_line("Traceback (most recent call last):", start);
        assert_eq!(m.tick(start + Duration::from_millis(1_999)), None);
        assert_eq!(m.next_deadline(), Some(start + Duration::from_secs(2)));

        let outcome = m.tick(start + Duration::from_secs(2));
        assert_eq!(
            outcome,
            Some(MonitorOutcome::Failed {
                detail: "Traceback (most recent call last):".into()
            })
        );
        assert!(!m.is_collecting_traceback());
    }

    #[test]
    fn test_prompt_line_ends_traceback_without_it() {
        let mut m = monitor();
        let now = Instant::now();
        m.feed_line("Traceback (most recent call last):", now);
        m.feed_line("ValueError: boom", now);
        let outcome = m.feed_line("$ ", now);
        assert_eq!(
            outcome,
            Some(MonitorOutcome::Failed {
                detail: "Traceback (most recent call last):\nValueError: boom".into()
            })
        );
    }

    #[test]
    fn test_error_signature_inside_traceback_is_buffered() {
        let mut m = monitor();
        let now = Instant::now();
        m.feed_line("Traceback (most recent call last):", now);
        assert_eq!(m.feed_line("OSError: address already in use", now), None);
        assert!(m.is_collecting_traceback());
    }

    #[test]
    fn test_started_line_discovers_pid_and_clears_spinner() {
        let mut m = monitor();
        let now = Instant::now();
        m.arm(now);
        assert!(m.is_awaiting_confirmation());

        let outcome = m.feed_line("INFO:     Started server process [4242]", now);
        assert_eq!(outcome, Some(MonitorOutcome::PidDiscovered { pid: 4242 }));
        assert!(!m.is_awaiting_confirmation());
    }

    #[test]
    fn test_confirmation_failsafe() {
        let mut m = monitor();
        let start = Instant::now();
        m.arm(start);

        assert_eq!(m.tick(start + Duration::from_secs(44)), None);
        assert_eq!(
            m.tick(start + Duration::from_secs(45)),
            Some(MonitorOutcome::ConfirmationExpired)
        );
        assert!(!m.is_awaiting_confirmation());
        assert_eq!(m.tick(start + Duration::from_secs(90)), None);
    }

    #[test]
    fn test_arm_resets_failure() {
        let mut m = monitor();
        let now = Instant::now();
        m.feed_line("ERROR: boom", now);
        m.arm(now);
        assert!(!m.has_failed());
        assert!(m.feed_line("ERROR: boom", now).is_some());
    }

    #[test]
    fn test_jupyter_polls_while_starting() {
        let start = Instant::now();
        let mut j = JupyterMonitor::new(
            "base",
            CollectorConfig::default(),
            DEFAULT_CONFIRMATION_FAILSAFE,
            Duration::from_secs(3),
            Duration::from_secs(30),
        );
        assert_eq!(j.tick(start), JupyterTick::Idle);

        j.observe_status(JupyterStatus::Starting, start);
        assert!(j.is_polling());
        assert_eq!(j.tick(start + Duration::from_secs(2)), JupyterTick::Idle);
        assert_eq!(j.tick(start + Duration::from_secs(3)), JupyterTick::Poll);
        assert_eq!(j.tick(start + Duration::from_secs(4)), JupyterTick::Idle);
        assert_eq!(j.tick(start + Duration::from_secs(6)), JupyterTick::Poll);

        j.observe_status(JupyterStatus::Running, start + Duration::from_secs(7));
        assert!(!j.is_polling());
        assert_eq!(j.tick(start + Duration::from_secs(9)), JupyterTick::Idle);
    }

    #[test]
    fn test_jupyter_start_timeout() {
        let start = Instant::now();
        let mut j = JupyterMonitor::new(
            "base",
            CollectorConfig::default(),
            DEFAULT_CONFIRMATION_FAILSAFE,
            Duration::from_secs(3),
            Duration::from_secs(30),
        );
        j.observe_status(JupyterStatus::Starting, start);
        // A repeated transitional status does not restart the clock
        j.observe_status(JupyterStatus::Starting, start + Duration::from_secs(20));
        assert_eq!(
            j.tick(start + Duration::from_secs(30)),
            JupyterTick::TimedOut
        );
        assert!(!j.is_polling());
    }

    #[test]
    fn test_environment_monitor_tracks_last_line() {
        let mut e = EnvironmentMonitor::new("openbb", CollectorConfig::default());
        let now = Instant::now();
        e.feed_line("Collecting numpy", now);
        e.feed_line("", now);
        assert_eq!(e.last_line.as_deref(), Some("Collecting numpy"));
        assert_eq!(e.lines_seen, 2);
        assert_eq!(e.process.process_id(), "env-openbb");
    }
}
