//! Backend child processes with out-of-band exit monitoring.
//!
//! ```text
//!   MonitoredProcess::spawn()
//!         │
//!         └── monitor task  ← owns the Child
//!                 ├── stderr collector  (filtered diagnostics)
//!                 ├── child.wait()      → NaturalExit | Error
//!                 └── stop request      → SIGTERM, grace, SIGKILL → UserStop
//!                         │
//!                         └── EngineEvent::ProcessExited { id, report }
//! ```
//!
//! The stop request and the natural exit race inside one `select!`, so the
//! origin attached to the report is decided exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use deck_proto::config::PlaybackConfig;
use deck_proto::platform;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::LaunchSpec;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventSender, ExitOrigin, ExitReport, PlaybackId};

/// How long to keep draining stderr after the child is gone.  Grandchildren
/// can hold the pipe open indefinitely.
const DIAGNOSTICS_DRAIN: Duration = Duration::from_millis(500);

/// Rules for turning an exit status plus stderr into an [`ExitOrigin`].
#[derive(Debug, Clone)]
pub struct ExitPolicy {
    pub natural_exit_codes: Vec<i32>,
    pub error_markers: Vec<String>,
    pub ignored_diagnostics: Vec<String>,
    pub stop_grace: Duration,
}

impl ExitPolicy {
    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self {
            natural_exit_codes: config.natural_exit_codes.clone(),
            error_markers: config
                .error_markers
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
            ignored_diagnostics: config.ignored_diagnostics.clone(),
            stop_grace: Duration::from_millis(config.stop_grace_ms),
        }
    }

    /// Classify an exit the monitor did not cause.
    ///
    /// Allow-listed codes are natural.  Anything else is a failure only if
    /// the diagnostics carry an error marker; backends that exit non-zero
    /// on a plain signal are treated as finished.
    pub fn classify(&self, code: Option<i32>, diagnostics: &str) -> ExitOrigin {
        if let Some(code) = code {
            if self.natural_exit_codes.contains(&code) {
                return ExitOrigin::NaturalExit;
            }
        }
        let lower = diagnostics.to_lowercase();
        if self.error_markers.iter().any(|m| lower.contains(m.as_str())) {
            ExitOrigin::Error
        } else {
            ExitOrigin::NaturalExit
        }
    }

    fn is_noise(&self, line: &str) -> bool {
        self.ignored_diagnostics
            .iter()
            .any(|pattern| line.contains(pattern.as_str()))
    }
}

impl Default for ExitPolicy {
    fn default() -> Self {
        Self::from_config(&PlaybackConfig::default())
    }
}

/// A running backend.  Dropping it without [`stop`](Self::stop) still tears
/// the child down, with no grace period.
pub struct MonitoredProcess {
    id: PlaybackId,
    pid: Option<u32>,
    /// Cleared by the monitor once the child is reaped, before it reports.
    alive: Arc<AtomicBool>,
    stop_tx: Option<oneshot::Sender<Duration>>,
    monitor: Option<JoinHandle<()>>,
    paused: bool,
}

impl MonitoredProcess {
    pub fn spawn(
        id: PlaybackId,
        spec: &LaunchSpec,
        policy: Arc<ExitPolicy>,
        events: EventSender,
    ) -> Result<Self> {
        let program = platform::find_binary(&spec.program)
            .ok_or_else(|| EngineError::BinaryNotFound(spec.program.clone()))?;

        info!(
            "process {}: spawning {} backend {:?} {:?}",
            id,
            spec.kind.label(),
            program,
            spec.args
        );

        let mut child = tokio::process::Command::new(&program)
            .args(&spec.args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Launch {
                program: spec.program.clone(),
                source,
            })?;

        let pid = child.id();
        let stderr = child.stderr.take();
        let alive = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor_task(
            id,
            child,
            stderr,
            stop_rx,
            alive.clone(),
            policy,
            events,
        ));

        Ok(Self {
            id,
            pid,
            alive,
            stop_tx: Some(stop_tx),
            monitor: Some(monitor),
            paused: false,
        })
    }

    pub fn id(&self) -> PlaybackId {
        self.id
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Ask the monitor to terminate the child and wait for it to finish.
    /// Safe to call repeatedly; later calls return immediately.
    pub async fn stop(&mut self, grace: Duration) {
        if let Some(tx) = self.stop_tx.take() {
            // Err means the monitor already saw a natural exit.
            let _ = tx.send(grace);
        }
        if let Some(handle) = self.monitor.take() {
            if let Err(e) = handle.await {
                warn!("process {}: monitor task failed: {}", self.id, e);
            }
        }
        self.paused = false;
    }

    /// Reap after the monitor has already reported an exit.
    pub async fn join(&mut self) {
        self.stop_tx = None;
        if let Some(handle) = self.monitor.take() {
            let _ = handle.await;
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        if self.paused {
            return Ok(());
        }
        if self.signal(Signal::Stop)? {
            self.paused = true;
        }
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if !self.paused {
            return Ok(());
        }
        self.signal(Signal::Continue)?;
        self.paused = false;
        Ok(())
    }

    /// Signal the child if it has not been reaped; a reaped pid may
    /// already belong to another process.  Returns whether it was sent.
    fn signal(&self, signal: Signal) -> Result<bool> {
        match self.pid {
            Some(pid) if self.monitor.is_some() && self.alive.load(Ordering::Acquire) => {
                send_signal(pid, signal)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl Drop for MonitoredProcess {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(Duration::ZERO);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Stop,
    Continue,
    Terminate,
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    let sig = match signal {
        Signal::Stop => libc::SIGSTOP,
        Signal::Continue => libc::SIGCONT,
        Signal::Terminate => libc::SIGTERM,
    };
    // SAFETY: kill(2) has no memory-safety preconditions; the pid belongs to
    // a child we have not reaped yet.
    let rc = unsafe { libc::kill(pid as libc::pid_t, sig) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        debug!("kill({}, {:?}) failed: {}", pid, signal, err);
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, signal: Signal) -> Result<()> {
    match signal {
        Signal::Terminate => Ok(()),
        Signal::Stop | Signal::Continue => Err(EngineError::PauseUnsupported),
    }
}

async fn monitor_task(
    id: PlaybackId,
    mut child: Child,
    stderr: Option<ChildStderr>,
    stop_rx: oneshot::Receiver<Duration>,
    alive: Arc<AtomicBool>,
    policy: Arc<ExitPolicy>,
    events: EventSender,
) {
    let collector = tokio::spawn(collect_diagnostics(id, stderr, policy.clone()));

    let (status, stopped) = tokio::select! {
        status = child.wait() => (status, false),
        Ok(grace) = stop_rx => (terminate(id, &mut child, grace).await, true),
    };
    alive.store(false, Ordering::Release);

    let code = match &status {
        Ok(s) => s.code(),
        Err(e) => {
            warn!("process {}: wait failed: {}", id, e);
            None
        }
    };

    let diagnostics = match tokio::time::timeout(DIAGNOSTICS_DRAIN, collector).await {
        Ok(Ok(text)) => text,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            debug!("process {}: stderr still open after exit, giving up on it", id);
            String::new()
        }
    };

    let origin = if stopped {
        ExitOrigin::UserStop
    } else {
        policy.classify(code, &diagnostics)
    };
    info!("process {}: exited code={:?} origin={:?}", id, code, origin);

    let _ = events.send(EngineEvent::ProcessExited {
        id,
        report: ExitReport {
            origin,
            code,
            diagnostics,
        },
    });
}

async fn terminate(
    id: PlaybackId,
    child: &mut Child,
    grace: Duration,
) -> std::io::Result<std::process::ExitStatus> {
    if let Some(pid) = child.id() {
        if !grace.is_zero() {
            debug!("process {}: SIGTERM, grace {:?}", id, grace);
            let _ = send_signal(pid, Signal::Terminate);
            // A stopped process cannot act on SIGTERM until continued.
            let _ = send_signal(pid, Signal::Continue);
            if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
                return status;
            }
            warn!("process {}: still alive after {:?}, killing", id, grace);
        }
    }
    child.kill().await?;
    child.wait().await
}

async fn collect_diagnostics(
    id: PlaybackId,
    stderr: Option<ChildStderr>,
    policy: Arc<ExitPolicy>,
) -> String {
    let Some(stderr) = stderr else {
        return String::new();
    };
    let mut lines = BufReader::new(stderr).lines();
    let mut collected = String::new();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() || policy.is_noise(line) {
                    continue;
                }
                debug!("process {}: stderr: {}", id, line);
                if !collected.is_empty() {
                    collected.push('\n');
                }
                collected.push_str(line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!("process {}: stderr read error: {}", id, e);
                break;
            }
        }
    }
    collected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_exit_is_natural() {
        let policy = ExitPolicy::default();
        assert_eq!(policy.classify(Some(0), "fatal error"), ExitOrigin::NaturalExit);
    }

    #[test]
    fn nonzero_with_marker_is_error() {
        let policy = ExitPolicy::default();
        assert_eq!(
            policy.classify(Some(1), "fluidsynth: ERROR: Couldn't load soundfont"),
            ExitOrigin::Error
        );
    }

    #[test]
    fn nonzero_without_marker_is_natural() {
        let policy = ExitPolicy::default();
        assert_eq!(policy.classify(Some(143), ""), ExitOrigin::NaturalExit);
        assert_eq!(policy.classify(None, "terminated"), ExitOrigin::NaturalExit);
    }

    #[test]
    fn custom_allow_list() {
        let policy = ExitPolicy {
            natural_exit_codes: vec![0, 1],
            ..ExitPolicy::default()
        };
        assert_eq!(policy.classify(Some(1), "error"), ExitOrigin::NaturalExit);
    }

    #[test]
    fn noise_lines_are_recognised() {
        let policy = ExitPolicy::default();
        assert!(policy.is_noise("fluidsynth: warning: Failed to set thread to high priority"));
        assert!(!policy.is_noise("fluidsynth: error: bad file"));
    }
}
