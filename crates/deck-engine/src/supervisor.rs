//! Renderer Supervisor: owns the single live render job.
//!
//! States: `Idle → Starting → Running → {Stopped(Natural) | Stopped(Intentional) | Failed}`.
//!
//! The supervisor never stops a previous job on its own; callers stop first
//! and then start.  Exit reports arrive through the engine's event channel
//! and are handed back via [`RendererSupervisor::on_exit`], which ignores
//! reports for jobs that are no longer live.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use deck_proto::media::MediaEntry;
use tracing::{debug, info, warn};

use crate::backend::{BackendKind, BackendTable, LaunchTarget};
use crate::error::{EngineError, Result};
use crate::events::{EventSender, ExitOrigin, ExitReport, PlaybackId};
use crate::process::{ExitPolicy, MonitoredProcess};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    /// The backend finished the track.
    Natural,
    /// The engine asked it to stop.
    Intentional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Starting,
    Running,
    Stopped(StopKind),
    Failed(String),
}

/// What became of a job, as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    NaturalCompletion,
    IntentionalStop,
    RuntimeFailure { diagnostics: String },
}

pub struct RenderJob {
    pub backend: BackendKind,
    pub media_path: PathBuf,
    pub aux_path: Option<PathBuf>,
    process: MonitoredProcess,
}

impl RenderJob {
    pub fn id(&self) -> PlaybackId {
        self.process.id()
    }

    pub fn is_paused(&self) -> bool {
        self.process.is_paused()
    }
}

pub struct RendererSupervisor {
    backends: BackendTable,
    policy: Arc<ExitPolicy>,
    events: EventSender,
    job: Option<RenderJob>,
    state: SupervisorState,
}

impl RendererSupervisor {
    pub fn new(backends: BackendTable, policy: Arc<ExitPolicy>, events: EventSender) -> Self {
        Self {
            backends,
            policy,
            events,
            job: None,
            state: SupervisorState::Idle,
        }
    }

    pub fn state(&self) -> &SupervisorState {
        &self.state
    }

    pub fn job(&self) -> Option<&RenderJob> {
        self.job.as_ref()
    }

    pub fn live_id(&self) -> Option<PlaybackId> {
        self.job.as_ref().map(RenderJob::id)
    }

    /// Launch the backend for `entry`.  Spawn failures are returned here and
    /// leave the supervisor in `Failed`; missing soundfonts fail before any
    /// process exists.
    pub fn start(&mut self, entry: &MediaEntry, soundfont: Option<&Path>) -> Result<PlaybackId> {
        debug_assert!(self.job.is_none(), "start() while a render job is live");
        if self.job.is_some() {
            return Err(EngineError::JobAlreadyLive);
        }

        let backend = BackendKind::for_media(entry.kind);
        let aux_path = if entry.kind.needs_soundfont() {
            soundfont.map(Path::to_path_buf)
        } else {
            None
        };
        let target = LaunchTarget::media(entry.path.clone(), aux_path.clone());
        let spec = self.backends.launch_spec(backend, &target)?;

        self.state = SupervisorState::Starting;
        let id = PlaybackId::next();
        match MonitoredProcess::spawn(id, &spec, self.policy.clone(), self.events.clone()) {
            Ok(process) => {
                info!("supervisor: job {} running {:?}", id, entry.path);
                self.job = Some(RenderJob {
                    backend,
                    media_path: entry.path.clone(),
                    aux_path,
                    process,
                });
                self.state = SupervisorState::Running;
                Ok(id)
            }
            Err(e) => {
                warn!("supervisor: launch failed: {}", e);
                self.state = SupervisorState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Terminate the live job (SIGTERM, grace period, SIGKILL) and join its
    /// monitor.  Returns `false` when nothing was running.
    pub async fn stop(&mut self) -> bool {
        let Some(mut job) = self.job.take() else {
            return false;
        };
        info!("supervisor: stopping job {}", job.id());
        job.process.stop(self.policy.stop_grace).await;
        self.state = SupervisorState::Stopped(StopKind::Intentional);
        true
    }

    /// Consume an exit report.  `None` if `id` is not the live job.
    pub async fn on_exit(&mut self, id: PlaybackId, report: &ExitReport) -> Option<JobOutcome> {
        if self.live_id() != Some(id) {
            debug!("supervisor: ignoring exit of stale job {}", id);
            return None;
        }
        let mut job = self.job.take()?;
        job.process.join().await;

        let outcome = match report.origin {
            ExitOrigin::UserStop => {
                self.state = SupervisorState::Stopped(StopKind::Intentional);
                JobOutcome::IntentionalStop
            }
            ExitOrigin::NaturalExit => {
                self.state = SupervisorState::Stopped(StopKind::Natural);
                JobOutcome::NaturalCompletion
            }
            ExitOrigin::Error => {
                self.state = SupervisorState::Failed(report.diagnostics.clone());
                JobOutcome::RuntimeFailure {
                    diagnostics: report.diagnostics.clone(),
                }
            }
        };
        info!("supervisor: job {} finished: {:?}", id, outcome);
        Some(outcome)
    }

    pub fn pause(&mut self) -> Result<bool> {
        match self.job.as_mut() {
            Some(job) => job.process.pause().map(|_| true),
            None => Ok(false),
        }
    }

    pub fn resume(&mut self) -> Result<bool> {
        match self.job.as_mut() {
            Some(job) => job.process.resume().map(|_| true),
            None => Ok(false),
        }
    }
}
