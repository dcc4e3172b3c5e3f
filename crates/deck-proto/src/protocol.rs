use serde::{Deserialize, Serialize};

use crate::media::{MediaEntry, SoundfontEntry};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.
pub const PROTOCOL_VERSION: u32 = 1;

/// Requests from a presentation layer to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Play `path`, or the cursor's current entry when `None`.
    Play { path: Option<String> },
    PlayRadio { url: String, title: String },
    Pause,
    Resume,
    TogglePause,
    Stop,
    Next,
    Previous,
    ToggleShuffle,
    SetFilter { text: String },
    ToggleFavourite { path: String },
    SelectSoundfont { path: String },
    /// Move the cursor without starting playback.
    Select { path: String },
    Rescan,
    SetMediaDir { path: String },
    SetSoundfontDir { path: String },
    Export,
    Describe { path: String },
    /// Set the system output volume, 0-100.
    SetVolume { percent: u8 },
    GetState,
}

/// Messages from the engine to presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect.
    Hello {
        protocol_version: u32,
        state: EngineSnapshot,
    },
    State {
        data: EngineSnapshot,
    },
    /// Radio track title changed.
    Title {
        title: String,
    },
    Progress {
        elapsed_secs: f64,
        total_secs: Option<f64>,
    },
    /// User-facing status line.
    Status {
        message: String,
    },
    Error {
        class: ErrorClass,
        message: String,
    },
    Description {
        path: String,
        text: String,
    },
    Log {
        message: String,
    },
}

/// How a surfaced error should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Missing selection (no soundfont, no file).  Fully recoverable.
    Configuration,
    /// Backend missing or failed to spawn.
    Launch,
    /// Backend exited with recognisable error diagnostics.
    Runtime,
    /// Bad metadata frame or a dropped connection on a radio stream.
    TransientStream,
    /// Favourites file unreadable or unwritable.
    Persistence,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Playing,
    Paused,
    Error,
}

/// What the engine is currently doing, for presentation.  `rev` increments
/// on every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineSnapshot {
    #[serde(default)]
    pub rev: u64,
    pub status: PlaybackStatus,
    pub current: Option<MediaEntry>,
    pub soundfont: Option<SoundfontEntry>,
    pub radio_url: Option<String>,
    pub radio_title: Option<String>,
    pub shuffle: bool,
    pub filter: String,
    pub view_len: usize,
    pub cursor: Option<usize>,
    pub elapsed_secs: Option<f64>,
    pub total_secs: Option<f64>,
    pub status_message: Option<String>,
    /// System output volume in percent, once the mixer has reported it.
    #[serde(default)]
    pub volume: Option<u8>,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_encode_decode() {
        let msg = Message::Command(Command::SetFilter {
            text: "*".to_string(),
        });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::SetFilter { text }) => assert_eq!(text, "*"),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_hello_encode_decode() {
        let state = EngineSnapshot {
            rev: 42,
            shuffle: true,
            ..Default::default()
        };
        let msg = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            state,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        match decoded {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                state,
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(state.rev, 42);
                assert!(state.shuffle);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn partial_frame_is_rejected() {
        let encoded = Message::Command(Command::Next).encode().unwrap();
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
        assert!(Message::decode(&encoded[..2]).is_err());
    }

    #[test]
    fn set_volume_wire_form() {
        let json = serde_json::to_string(&Command::SetVolume { percent: 40 }).unwrap();
        assert_eq!(json, r#"{"cmd":"SetVolume","percent":40}"#);

        // Snapshots from before the volume field still decode.
        let mut value = serde_json::to_value(EngineSnapshot::default()).unwrap();
        value.as_object_mut().unwrap().remove("volume");
        let snapshot: EngineSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(snapshot.volume, None);
    }
}
