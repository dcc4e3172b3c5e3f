//! trackdeck playback engine.
//!
//! ```text
//!   control socket ─┐
//!                   ├─► EngineEvent channel ─► Engine (single owner)
//!   monitors/radio ─┘                              │
//!   clock/export                                   ├─► RendererSupervisor ─► MonitoredProcess
//!                                                  ├─► RadioStreamReader  ─► MonitoredProcess + ICY reader
//!                                                  ├─► Playlist / FavouritesStore
//!                                                  └─► broadcast::Sender<BroadcastMessage>
//! ```

pub mod backend;
pub mod clock;
pub mod describe;
pub mod engine;
pub mod error;
pub mod events;
pub mod export;
pub mod icy;
pub mod logging;
pub mod mixer;
pub mod playlist;
pub mod process;
pub mod radio;
pub mod socket;
pub mod supervisor;

pub use engine::{Engine, EngineHandle};
pub use error::{EngineError, Result};
pub use events::{event_channel, BroadcastMessage, EngineEvent};
