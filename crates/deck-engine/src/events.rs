//! Message types flowing into and out of the engine loop.
//!
//! Background tasks never touch engine state.  They post an [`EngineEvent`]
//! tagged with the [`PlaybackId`] of the job, session or clock that produced
//! it, and the engine drops anything whose id is no longer live.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use deck_proto::protocol::{Command, ErrorClass};
use tokio::sync::mpsc;

static NEXT_PLAYBACK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one render job, radio session or clock run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackId(u64);

impl PlaybackId {
    pub fn next() -> Self {
        Self(NEXT_PLAYBACK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a backend process went away.  Decided by the monitor at the moment
/// it observes the exit, so nothing downstream re-reads a shared flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOrigin {
    UserStop,
    NaturalExit,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    pub origin: ExitOrigin,
    pub code: Option<i32>,
    /// Filtered stderr of the backend.
    pub diagnostics: String,
}

#[derive(Debug)]
pub enum EngineEvent {
    /// A request from a presentation layer.
    Command(Command),
    ProcessExited {
        id: PlaybackId,
        report: ExitReport,
    },
    RadioTitle {
        id: PlaybackId,
        title: String,
    },
    /// The metadata reader stopped on its own (EOF or connection error).
    RadioStreamEnded {
        id: PlaybackId,
        reason: String,
    },
    Tick {
        id: PlaybackId,
    },
    ExportFinished {
        result: std::result::Result<PathBuf, String>,
    },
    Described {
        path: String,
        text: String,
    },
    /// A mixer run finished; `Ok` carries the volume now in effect.
    VolumeChanged {
        result: crate::error::Result<u8>,
    },
    Shutdown,
}

pub type EventSender = mpsc::UnboundedSender<EngineEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// What the engine pushes to presentation layers.
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastMessage {
    /// The snapshot changed; receivers read it from the shared handle.
    StateUpdated,
    Title(String),
    Progress {
        elapsed_secs: f64,
        total_secs: Option<f64>,
    },
    Status(String),
    Error {
        class: ErrorClass,
        message: String,
    },
    Description {
        path: String,
        text: String,
    },
    Log(String),
}
