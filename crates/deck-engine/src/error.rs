use std::path::PathBuf;

use deck_proto::protocol::ErrorClass;
use thiserror::Error;

/// Everything the engine can surface or log.  `class()` decides how the
/// presentation layer sees it.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No SoundFont selected")]
    NoSoundfontSelected,

    #[error("No file selected")]
    NoFileSelected,

    #[error("Unsupported media: {0:?}")]
    UnsupportedMedia(PathBuf),

    #[error("{0} not found")]
    BinaryNotFound(String),

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("a renderer is already running")]
    JobAlreadyLive,

    #[error("renderer failed: {diagnostics}")]
    Runtime { diagnostics: String },

    #[error("stream error: {0}")]
    Stream(String),

    #[error("favourites: {0}")]
    Persistence(String),

    #[error("export failed: {0}")]
    Export(String),

    #[error("volume control: {0}")]
    Mixer(String),

    #[error("pause is not supported on this platform")]
    PauseUnsupported,
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NoSoundfontSelected | Self::NoFileSelected | Self::UnsupportedMedia(_) => {
                ErrorClass::Configuration
            }
            Self::BinaryNotFound(_) | Self::Launch { .. } | Self::JobAlreadyLive => {
                ErrorClass::Launch
            }
            Self::Runtime { .. } | Self::Export(_) | Self::Mixer(_) | Self::PauseUnsupported => {
                ErrorClass::Runtime
            }
            Self::Stream(_) => ErrorClass::TransientStream,
            Self::Persistence(_) => ErrorClass::Persistence,
        }
    }

    /// Transient stream problems, persistence and volume control failures
    /// are logged only.
    pub fn is_surfaced(&self) -> bool {
        !matches!(self, Self::Mixer(_))
            && !matches!(
                self.class(),
                ErrorClass::TransientStream | ErrorClass::Persistence
            )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy() {
        assert_eq!(EngineError::NoSoundfontSelected.to_string(), "No SoundFont selected");
        assert_eq!(EngineError::NoSoundfontSelected.class(), ErrorClass::Configuration);
        assert_eq!(
            EngineError::BinaryNotFound("fluidsynth".into()).class(),
            ErrorClass::Launch
        );
        assert!(!EngineError::Stream("bad frame".into()).is_surfaced());
        assert!(!EngineError::Persistence("read-only".into()).is_surfaced());
        assert!(!EngineError::Mixer("wpctl exited with 1".into()).is_surfaced());
        assert!(EngineError::Runtime {
            diagnostics: "error".into()
        }
        .is_surfaced());
    }
}
