//! Orchestration Engine: single-owner event loop over all playback state.
//!
//! Commands from presentation layers and reports from background tasks
//! (process monitors, the radio reader, the progress ticker, export and
//! describe runs) arrive on one ordered [`EngineEvent`] channel.  Only this
//! loop creates or destroys the live render job or radio session.
//!
//! Every transition stops whatever is live first (renderer, radio session,
//! clock) and only then starts the new target.  After each state change
//! the loop writes a fresh [`EngineSnapshot`] and broadcasts
//! `StateUpdated`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use deck_proto::catalog;
use deck_proto::config::Config;
use deck_proto::favourites::FavouritesStore;
use deck_proto::media::{MediaEntry, MediaKind, SoundfontEntry};
use deck_proto::platform::normalize_path;
use deck_proto::protocol::{Command, EngineSnapshot, ErrorClass, PlaybackStatus};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::backend::BackendTable;
use crate::clock::ProgressClock;
use crate::describe::{Describe, FileInfoDescriber};
use crate::error::{EngineError, Result};
use crate::events::{
    BroadcastMessage, EngineEvent, EventReceiver, EventSender, ExitOrigin, ExitReport, PlaybackId,
};
use crate::export::{self, ExportJob};
use crate::mixer;
use crate::playlist::{Direction, OrderMode, Playlist};
use crate::process::ExitPolicy;
use crate::radio::{RadioSession, RadioStreamReader};
use crate::supervisor::{JobOutcome, RendererSupervisor};

/// Cloneable access to a running engine for front ends such as the
/// control socket.
#[derive(Clone)]
pub struct EngineHandle {
    events: EventSender,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    snapshot: Arc<RwLock<EngineSnapshot>>,
}

impl EngineHandle {
    /// Queue a command.  Fails only when the engine loop has exited.
    pub fn send(&self, command: Command) -> anyhow::Result<()> {
        self.events
            .send(EngineEvent::Command(command))
            .map_err(|_| anyhow::anyhow!("engine loop is not running"))
    }

    pub fn shutdown(&self) {
        let _ = self.events.send(EngineEvent::Shutdown);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.broadcast_tx.subscribe()
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        self.snapshot.read().await.clone()
    }
}

pub struct Engine {
    config: Config,
    backends: BackendTable,
    playlist: Playlist,
    soundfonts: Vec<SoundfontEntry>,
    soundfont: Option<SoundfontEntry>,
    favourites: FavouritesStore,
    supervisor: RendererSupervisor,
    radio: RadioStreamReader,
    radio_session: Option<RadioSession>,
    clock: ProgressClock,
    tick_period: Duration,
    describer: Arc<dyn Describe>,
    events_tx: EventSender,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    snapshot: Arc<RwLock<EngineSnapshot>>,
    status: PlaybackStatus,
    status_message: Option<String>,
    volume: Option<u8>,
    export_running: bool,
}

impl Engine {
    /// Scan the configured directories and load favourites.  Nothing is
    /// spawned until the first command.
    pub fn new(
        config: Config,
        events_tx: EventSender,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        let backends = BackendTable::new(config.backends.clone());
        let policy = Arc::new(ExitPolicy::from_config(&config.playback));
        let supervisor = RendererSupervisor::new(backends.clone(), policy.clone(), events_tx.clone());
        let radio = RadioStreamReader::new(
            backends.clone(),
            policy,
            events_tx.clone(),
            Duration::from_secs(config.playback.stream_read_timeout_secs.max(1)),
        );

        let favourites = FavouritesStore::open(config.paths.favourites_file.clone());
        let mut playlist = Playlist::new(catalog::scan(&config.paths.media_dir, &config.catalog));
        playlist.apply_favourites(favourites.set());
        let soundfonts = catalog::scan_soundfonts(&config.paths.soundfont_dir);
        info!(
            "engine: {} media files, {} soundfonts, {} favourites",
            playlist.catalog().len(),
            soundfonts.len(),
            favourites.set().len()
        );

        let describer: Arc<dyn Describe> = Arc::new(FileInfoDescriber::new(config.catalog.clone()));
        let tick_period = Duration::from_millis(config.playback.tick_interval_ms.max(10));

        Self {
            config,
            backends,
            playlist,
            soundfonts,
            soundfont: None,
            favourites,
            supervisor,
            radio,
            radio_session: None,
            clock: ProgressClock::new(),
            tick_period,
            describer,
            events_tx,
            broadcast_tx,
            snapshot: Arc::new(RwLock::new(EngineSnapshot::default())),
            status: PlaybackStatus::Idle,
            status_message: None,
            volume: None,
            export_running: false,
        }
    }

    /// Replace the describe collaborator.
    pub fn with_describer(mut self, describer: Arc<dyn Describe>) -> Self {
        self.describer = describer;
        self
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            events: self.events_tx.clone(),
            broadcast_tx: self.broadcast_tx.clone(),
            snapshot: self.snapshot.clone(),
        }
    }

    /// Run until `Shutdown`.  The engine keeps a sender of its own, so the
    /// channel never closes underneath it.  Whatever is live is stopped
    /// before returning.
    pub async fn run(mut self, mut events_rx: EventReceiver) -> anyhow::Result<()> {
        info!("engine: starting event loop");
        self.publish().await;
        self.read_volume();

        while let Some(event) = events_rx.recv().await {
            match event {
                EngineEvent::Shutdown => {
                    info!("engine: shutdown requested");
                    break;
                }
                EngineEvent::Command(command) => {
                    info!("engine: command {:?}", command);
                    if let Err(e) = self.handle_command(command).await {
                        self.surface(e);
                    }
                    self.publish().await;
                }
                EngineEvent::Tick { id } => self.on_tick(id).await,
                other => {
                    if self.handle_background(other).await {
                        self.publish().await;
                    }
                }
            }
        }

        self.stop_all().await;
        self.publish().await;
        info!("engine: event loop finished");
        Ok(())
    }

    // ── commands ─────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Play { path } => self.play(path.map(PathBuf::from)).await,
            Command::PlayRadio { url, title } => self.play_radio(&url, &title).await,
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::TogglePause => self.toggle_pause(),
            Command::Stop => {
                self.stop().await;
                Ok(())
            }
            Command::Next => self.next().await,
            Command::Previous => self.previous().await,
            Command::ToggleShuffle => {
                self.toggle_shuffle().await;
                Ok(())
            }
            Command::SetFilter { text } => {
                self.set_filter(&text);
                Ok(())
            }
            Command::ToggleFavourite { path } => self.toggle_favourite(Path::new(&path)),
            Command::SelectSoundfont { path } => self.select_soundfont(Path::new(&path)).await,
            Command::Select { path } => self.select(Path::new(&path)),
            Command::Rescan => {
                self.rescan();
                Ok(())
            }
            Command::SetMediaDir { path } => {
                self.set_media_dir(PathBuf::from(path)).await;
                Ok(())
            }
            Command::SetSoundfontDir { path } => {
                self.set_soundfont_dir(PathBuf::from(path));
                Ok(())
            }
            Command::Export => self.export(),
            Command::Describe { path } => {
                self.describe(PathBuf::from(path));
                Ok(())
            }
            Command::SetVolume { percent } => {
                self.set_volume(percent);
                Ok(())
            }
            Command::GetState => Ok(()),
        }
    }

    /// Play `path`, or the cursor's entry when `None`.
    pub async fn play(&mut self, path: Option<PathBuf>) -> Result<()> {
        self.stop_all().await;
        if let Some(path) = path {
            if self.playlist.select_path(&path).is_none() {
                return Err(EngineError::UnsupportedMedia(path));
            }
        }
        let entry = self
            .playlist
            .current()
            .cloned()
            .ok_or(EngineError::NoFileSelected)?;
        self.start_entry(entry)
    }

    pub async fn next(&mut self) -> Result<()> {
        self.step(Direction::Next).await
    }

    pub async fn previous(&mut self) -> Result<()> {
        self.step(Direction::Previous).await
    }

    async fn step(&mut self, direction: Direction) -> Result<()> {
        self.stop_all().await;
        let entry = self
            .playlist
            .advance(direction)
            .cloned()
            .ok_or(EngineError::NoFileSelected)?;
        self.start_entry(entry)
    }

    pub async fn stop(&mut self) {
        if self.stop_all().await {
            self.status_message = Some("Stopped".to_string());
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        // A job that already exited is not signalled and stays unpaused.
        let paused = if self.supervisor.pause()? {
            self.supervisor.job().is_some_and(|job| job.is_paused())
        } else if let Some(session) = self.radio_session.as_mut() {
            session.pause()?;
            true
        } else {
            false
        };
        if paused {
            self.clock.pause();
            self.status = PlaybackStatus::Paused;
            self.status_message = Some("Paused".to_string());
        }
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        let resumed = if self.supervisor.resume()? {
            true
        } else if let Some(session) = self.radio_session.as_mut() {
            session.resume()?;
            true
        } else {
            false
        };
        if resumed {
            self.clock.resume();
            self.status = PlaybackStatus::Playing;
            self.status_message = None;
        }
        Ok(())
    }

    pub fn toggle_pause(&mut self) -> Result<()> {
        if self.status == PlaybackStatus::Paused {
            self.resume()
        } else {
            self.pause()
        }
    }

    /// Flip ordering mode.  Playback stops and the cursor returns to the
    /// top of the rebuilt view.
    pub async fn toggle_shuffle(&mut self) {
        self.stop_all().await;
        let mode = match self.playlist.mode() {
            OrderMode::Sorted => OrderMode::Shuffled,
            OrderMode::Shuffled => OrderMode::Sorted,
        };
        self.playlist.set_mode(mode);
        self.playlist.reset_cursor();
        self.status_message = Some(match mode {
            OrderMode::Shuffled => "Shuffle on".to_string(),
            OrderMode::Sorted => "Shuffle off".to_string(),
        });
    }

    pub fn set_filter(&mut self, text: &str) {
        self.playlist.set_predicate(text);
    }

    /// Flip membership and persist at once.  A failed write is logged; the
    /// in-memory set stays authoritative.
    pub fn toggle_favourite(&mut self, path: &Path) -> Result<()> {
        let (now, saved) = self.favourites.toggle(path);
        if !self.playlist.set_favourite(path, now) {
            debug!("engine: favourite {:?} is not in the catalog", path);
        }
        if let Err(e) = saved {
            self.surface(EngineError::Persistence(format!("{:#}", e)));
        }
        Ok(())
    }

    /// Record the soundfont; a live render job is restarted with it.
    pub async fn select_soundfont(&mut self, path: &Path) -> Result<()> {
        let normalized = normalize_path(path);
        let entry = match self.soundfonts.iter().find(|s| s.path == normalized) {
            Some(entry) => entry.clone(),
            None if normalized.is_file() => SoundfontEntry::new(normalized),
            None => return Err(EngineError::UnsupportedMedia(path.to_path_buf())),
        };
        info!("engine: soundfont {:?}", entry.path);
        self.soundfont = Some(entry);

        if let Some(media) = self.supervisor.job().map(|job| job.media_path.clone()) {
            self.stop_all().await;
            let entry = self
                .playlist
                .catalog()
                .iter()
                .find(|e| e.path == media)
                .cloned()
                .ok_or(EngineError::NoFileSelected)?;
            self.start_entry(entry)?;
        }
        Ok(())
    }

    pub fn select(&mut self, path: &Path) -> Result<()> {
        self.playlist
            .select_path(path)
            .map(|_| ())
            .ok_or_else(|| EngineError::UnsupportedMedia(path.to_path_buf()))
    }

    pub async fn play_radio(&mut self, url: &str, title: &str) -> Result<()> {
        self.stop_all().await;
        let session = self.radio.connect(url, title)?;
        self.clock
            .start(session.id(), None, self.events_tx.clone(), self.tick_period);
        self.status = PlaybackStatus::Playing;
        self.status_message = Some(format!("Streaming {}", title));
        self.radio_session = Some(session);
        Ok(())
    }

    /// Rescan both directories, keeping the current selection.
    pub fn rescan(&mut self) {
        let entries = catalog::scan(&self.config.paths.media_dir, &self.config.catalog);
        self.playlist.rebuild(entries);
        self.playlist.apply_favourites(self.favourites.set());
        self.reload_soundfonts();
    }

    pub async fn set_media_dir(&mut self, dir: PathBuf) {
        self.stop_all().await;
        info!("engine: media directory {:?}", dir);
        self.config.paths.media_dir = dir;
        let entries = catalog::scan(&self.config.paths.media_dir, &self.config.catalog);
        self.playlist.rebuild(entries);
        self.playlist.apply_favourites(self.favourites.set());
        self.playlist.reset_cursor();
    }

    pub fn set_soundfont_dir(&mut self, dir: PathBuf) {
        info!("engine: soundfont directory {:?}", dir);
        self.config.paths.soundfont_dir = dir;
        self.reload_soundfonts();
    }

    fn reload_soundfonts(&mut self) {
        self.soundfonts = catalog::scan_soundfonts(&self.config.paths.soundfont_dir);
        if let Some(current) = &self.soundfont {
            if !current.path.is_file() {
                warn!("engine: soundfont {:?} disappeared", current.path);
                self.soundfont = None;
            }
        }
    }

    /// Render the current MIDI-like entry to mp3 in the background.
    pub fn export(&mut self) -> Result<()> {
        if self.export_running {
            self.status_message = Some("Export already running".to_string());
            return Ok(());
        }
        let entry = self.playlist.current().ok_or(EngineError::NoFileSelected)?;
        if entry.kind != MediaKind::MidiLike {
            return Err(EngineError::UnsupportedMedia(entry.path.clone()));
        }
        let soundfont = self.soundfont.as_ref().ok_or(EngineError::NoSoundfontSelected)?;

        let job = ExportJob {
            media: entry.path.clone(),
            soundfont: soundfont.path.clone(),
            output_dir: export::resolve_output_dir(&self.config.paths.output_dir),
        };
        let backends = self.backends.clone();
        let events = self.events_tx.clone();
        self.export_running = true;
        self.status_message = Some(format!("Exporting {}", entry.display_name));

        tokio::spawn(async move {
            let result = export::export(&backends, &job)
                .await
                .map_err(|e| e.to_string());
            let _ = events.send(EngineEvent::ExportFinished { result });
        });
        Ok(())
    }

    /// Ask the mixer for the current volume off the loop.
    fn read_volume(&self) {
        let backends = self.backends.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = mixer::get_volume(&backends).await;
            let _ = events.send(EngineEvent::VolumeChanged { result });
        });
    }

    /// Apply a volume off the loop.  Failures are logged, never surfaced.
    pub fn set_volume(&self, percent: u8) {
        let backends = self.backends.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = mixer::set_volume(&backends, percent).await;
            let _ = events.send(EngineEvent::VolumeChanged { result });
        });
    }

    /// Describe `path` off the loop; the text comes back as an event.
    pub fn describe(&mut self, path: PathBuf) {
        let describer = self.describer.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let key = path.to_string_lossy().into_owned();
            let text = match tokio::task::spawn_blocking(move || describer.describe(&path)).await {
                Ok(text) => text,
                Err(e) => format!("Error extracting metadata: {}", e),
            };
            let _ = events.send(EngineEvent::Described { path: key, text });
        });
    }

    // ── transitions ──────────────────────────────────────────────────────────

    /// Stop the render job, the radio session and the clock, joining their
    /// tasks.  Returns whether anything was live.
    async fn stop_all(&mut self) -> bool {
        let mut stopped = self.supervisor.stop().await;
        if let Some(mut session) = self.radio_session.take() {
            self.radio.disconnect(&mut session).await;
            stopped = true;
        }
        self.stop_clock().await;
        self.status = PlaybackStatus::Idle;
        stopped
    }

    /// Stop the progress clock and tell presentation layers it is back at
    /// zero.  No-op when the clock is not running.
    async fn stop_clock(&mut self) {
        if self.clock.id().is_none() {
            return;
        }
        self.clock.stop().await;
        let _ = self.broadcast_tx.send(BroadcastMessage::Progress {
            elapsed_secs: 0.0,
            total_secs: None,
        });
    }

    /// Caller has already stopped everything.
    fn start_entry(&mut self, entry: MediaEntry) -> Result<()> {
        let soundfont = self.soundfont.as_ref().map(|s| s.path.as_path());
        let id = self.supervisor.start(&entry, soundfont)?;
        let total = self.describer.duration(&entry.path);
        self.clock
            .start(id, total, self.events_tx.clone(), self.tick_period);
        self.status = PlaybackStatus::Playing;
        self.status_message = Some(match (&self.soundfont, entry.kind) {
            (Some(sf), MediaKind::MidiLike) => {
                format!("Playing {} with {}", entry.display_name, sf.display_name)
            }
            _ => format!("Playing {}", entry.display_name),
        });
        Ok(())
    }

    fn surface(&mut self, err: EngineError) {
        if !err.is_surfaced() {
            warn!("engine: {}", err);
            return;
        }
        match err.class() {
            ErrorClass::Configuration => info!("engine: {}", err),
            _ => error!("engine: {}", err),
        }
        let message = err.to_string();
        self.status_message = Some(message.clone());
        let _ = self.broadcast_tx.send(BroadcastMessage::Error {
            class: err.class(),
            message,
        });
    }

    // ── background events ────────────────────────────────────────────────────

    /// Returns whether the snapshot needs republishing.
    async fn handle_background(&mut self, event: EngineEvent) -> bool {
        match event {
            EngineEvent::ProcessExited { id, report } => self.on_process_exited(id, report).await,
            EngineEvent::RadioTitle { id, title } => self.on_radio_title(id, title),
            EngineEvent::RadioStreamEnded { id, reason } => {
                if self.radio_session.as_ref().map(RadioSession::id) == Some(id) {
                    self.surface(EngineError::Stream(reason));
                }
                false
            }
            EngineEvent::ExportFinished { result } => {
                self.export_running = false;
                match result {
                    Ok(path) => {
                        let message = format!("Track saved as {}", path.display());
                        let _ = self
                            .broadcast_tx
                            .send(BroadcastMessage::Status(message.clone()));
                        self.status_message = Some(message);
                    }
                    Err(e) => self.surface(EngineError::Export(e)),
                }
                true
            }
            EngineEvent::Described { path, text } => {
                let _ = self
                    .broadcast_tx
                    .send(BroadcastMessage::Description { path, text });
                false
            }
            EngineEvent::VolumeChanged { result } => match result {
                Ok(percent) => {
                    self.volume = Some(percent);
                    true
                }
                Err(e) => {
                    self.surface(e);
                    false
                }
            },
            EngineEvent::Command(_) | EngineEvent::Tick { .. } | EngineEvent::Shutdown => false,
        }
    }

    async fn on_process_exited(&mut self, id: PlaybackId, report: ExitReport) -> bool {
        if self.supervisor.live_id() == Some(id) {
            let Some(outcome) = self.supervisor.on_exit(id, &report).await else {
                return false;
            };
            self.stop_clock().await;
            match outcome {
                JobOutcome::NaturalCompletion => {
                    info!("engine: track finished, advancing");
                    self.status = PlaybackStatus::Idle;
                    if let Err(e) = self.step(Direction::Next).await {
                        self.surface(e);
                    }
                }
                JobOutcome::IntentionalStop => {
                    self.status = PlaybackStatus::Idle;
                }
                JobOutcome::RuntimeFailure { diagnostics } => {
                    self.status = PlaybackStatus::Error;
                    self.surface(EngineError::Runtime { diagnostics });
                }
            }
            return true;
        }

        if self.radio_session.as_ref().map(RadioSession::id) == Some(id) {
            if let Some(mut session) = self.radio_session.take() {
                self.radio.reap(&mut session).await;
            }
            self.stop_clock().await;
            if report.origin == ExitOrigin::Error {
                self.status = PlaybackStatus::Error;
                self.surface(EngineError::Runtime {
                    diagnostics: report.diagnostics,
                });
            } else {
                self.status = PlaybackStatus::Idle;
                self.status_message = Some("Stream ended".to_string());
            }
            return true;
        }

        debug!("engine: ignoring exit of stale {}", id);
        false
    }

    fn on_radio_title(&mut self, id: PlaybackId, title: String) -> bool {
        let Some(session) = self.radio_session.as_mut() else {
            return false;
        };
        if session.id() != id {
            debug!("engine: ignoring title from stale {}", id);
            return false;
        }
        info!("engine: now streaming {:?}", title);
        session.display_title = title.clone();
        let _ = self.broadcast_tx.send(BroadcastMessage::Title(title));
        true
    }

    async fn on_tick(&self, id: PlaybackId) {
        if self.clock.id() != Some(id) {
            return;
        }
        let (elapsed, total) = self.clock.tick();
        let elapsed_secs = elapsed.as_secs_f64();
        let total_secs = total.map(|t| t.as_secs_f64());
        {
            let mut snapshot = self.snapshot.write().await;
            snapshot.elapsed_secs = Some(elapsed_secs);
            snapshot.total_secs = total_secs;
        }
        let _ = self.broadcast_tx.send(BroadcastMessage::Progress {
            elapsed_secs,
            total_secs,
        });
    }

    // ── snapshot ─────────────────────────────────────────────────────────────

    async fn publish(&self) {
        let (elapsed, total) = self.clock.tick();
        let clock_running = self.clock.id().is_some();
        let mut snapshot = self.snapshot.write().await;
        *snapshot = EngineSnapshot {
            rev: snapshot.rev + 1,
            status: self.status,
            current: self.playlist.current().cloned(),
            soundfont: self.soundfont.clone(),
            radio_url: self.radio_session.as_ref().map(|s| s.url.clone()),
            radio_title: self.radio_session.as_ref().map(|s| s.display_title.clone()),
            shuffle: self.playlist.mode() == OrderMode::Shuffled,
            filter: self.playlist.filter_text().to_string(),
            view_len: self.playlist.len(),
            cursor: self.playlist.cursor(),
            elapsed_secs: clock_running.then(|| elapsed.as_secs_f64()),
            total_secs: total.map(|t| t.as_secs_f64()),
            status_message: self.status_message.clone(),
            volume: self.volume,
        };
        drop(snapshot);
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }
}
