//! Progress Clock.
//!
//! [`PlaybackClock`] is the arithmetic: wall-clock elapsed time minus time
//! spent paused.  [`ProgressClock`] owns one clock plus the periodic task
//! that posts `Tick { id }` into the engine loop.  Stopping aborts and joins
//! that task, so no tick for the stopped run is sent afterwards; ticks
//! already queued carry the old id and are discarded by the engine.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::events::{EngineEvent, EventSender, PlaybackId};

#[derive(Debug, Clone)]
pub struct PlaybackClock {
    started: Instant,
    total: Option<Duration>,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl PlaybackClock {
    pub fn new(total: Option<Duration>) -> Self {
        Self::starting_at(Instant::now(), total)
    }

    pub fn starting_at(started: Instant, total: Option<Duration>) -> Self {
        Self {
            started,
            total,
            paused_at: None,
            paused_total: Duration::ZERO,
        }
    }

    pub fn total(&self) -> Option<Duration> {
        self.total
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn pause_at(&mut self, now: Instant) {
        if self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    pub fn resume_at(&mut self, now: Instant) {
        if let Some(at) = self.paused_at.take() {
            self.paused_total += now.saturating_duration_since(at);
        }
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        let end = self.paused_at.unwrap_or(now);
        end.saturating_duration_since(self.started)
            .saturating_sub(self.paused_total)
    }

    /// `(elapsed, total)`; elapsed never exceeds a known total.
    pub fn tick(&self) -> (Duration, Option<Duration>) {
        let elapsed = self.elapsed_at(Instant::now());
        let elapsed = match self.total {
            Some(total) => elapsed.min(total),
            None => elapsed,
        };
        (elapsed, self.total)
    }
}

struct ClockRun {
    id: PlaybackId,
    clock: PlaybackClock,
    ticker: JoinHandle<()>,
}

/// At most one running clock, tagged with the playback it measures.
#[derive(Default)]
pub struct ProgressClock {
    run: Option<ClockRun>,
}

impl ProgressClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start measuring playback `id`.  Any previous run must have been
    /// stopped first.
    pub fn start(
        &mut self,
        id: PlaybackId,
        total: Option<Duration>,
        events: EventSender,
        period: Duration,
    ) {
        debug_assert!(self.run.is_none(), "clock started twice");
        if let Some(old) = self.run.take() {
            old.ticker.abort();
        }
        let period = period.max(Duration::from_millis(10));
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if events.send(EngineEvent::Tick { id }).is_err() {
                    break;
                }
            }
        });
        debug!("clock: started for {}", id);
        self.run = Some(ClockRun {
            id,
            clock: PlaybackClock::new(total),
            ticker,
        });
    }

    /// Cancel the ticker and wait until it is gone.  No-op when idle.
    pub async fn stop(&mut self) {
        if let Some(run) = self.run.take() {
            run.ticker.abort();
            let _ = run.ticker.await;
            debug!("clock: stopped for {}", run.id);
        }
    }

    pub fn id(&self) -> Option<PlaybackId> {
        self.run.as_ref().map(|r| r.id)
    }

    pub fn pause(&mut self) {
        if let Some(run) = self.run.as_mut() {
            run.clock.pause_at(Instant::now());
        }
    }

    pub fn resume(&mut self) {
        if let Some(run) = self.run.as_mut() {
            run.clock.resume_at(Instant::now());
        }
    }

    /// Current reading, or zero when no clock runs.
    pub fn tick(&self) -> (Duration, Option<Duration>) {
        match &self.run {
            Some(run) => run.clock.tick(),
            None => (Duration::ZERO, None),
        }
    }
}
