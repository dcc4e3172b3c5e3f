//! Backend selection.  Each [`BackendKind`] maps to one argument builder;
//! adding a backend means adding a variant and its builder.

use std::ffi::OsString;
use std::path::PathBuf;

use deck_proto::config::BackendsConfig;
use deck_proto::media::MediaKind;
use deck_proto::platform;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Soundfont synthesizer for MIDI-like files.
    Synth,
    /// Tracker module player.
    ModulePlayer,
    /// Internet radio audio.
    Stream,
    /// Offline render of a MIDI-like file to wav.
    Export,
}

impl BackendKind {
    pub fn for_media(kind: MediaKind) -> Self {
        match kind {
            MediaKind::MidiLike => Self::Synth,
            MediaKind::ModuleLike => Self::ModulePlayer,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Synth => "synth",
            Self::ModulePlayer => "module-player",
            Self::Stream => "stream",
            Self::Export => "export",
        }
    }

    fn builder(self) -> ArgBuilder {
        match self {
            Self::Synth => synth_args,
            Self::ModulePlayer => module_args,
            Self::Stream => stream_args,
            Self::Export => export_args,
        }
    }
}

/// Inputs a backend may need.  Builders reject targets missing what they
/// require.
#[derive(Debug, Clone, Default)]
pub struct LaunchTarget {
    pub media: Option<PathBuf>,
    pub soundfont: Option<PathBuf>,
    pub url: Option<String>,
    pub output: Option<PathBuf>,
}

impl LaunchTarget {
    pub fn media(media: PathBuf, soundfont: Option<PathBuf>) -> Self {
        Self {
            media: Some(media),
            soundfont,
            ..Self::default()
        }
    }

    pub fn stream(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }
}

/// A fully resolved command line.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub kind: BackendKind,
    pub program: String,
    pub args: Vec<OsString>,
}

type ArgBuilder = fn(&BackendsConfig, &LaunchTarget) -> Result<Vec<OsString>>;

fn require_media(target: &LaunchTarget) -> Result<&PathBuf> {
    target.media.as_ref().ok_or(EngineError::NoFileSelected)
}

fn require_soundfont(target: &LaunchTarget) -> Result<&PathBuf> {
    target
        .soundfont
        .as_ref()
        .ok_or(EngineError::NoSoundfontSelected)
}

fn synth_args(config: &BackendsConfig, target: &LaunchTarget) -> Result<Vec<OsString>> {
    let soundfont = require_soundfont(target)?;
    let media = require_media(target)?;
    Ok(vec![
        "-a".into(),
        config.synth.audio_driver.clone().into(),
        "-m".into(),
        config.synth.midi_driver.clone().into(),
        "-i".into(),
        soundfont.into(),
        media.into(),
    ])
}

fn module_args(config: &BackendsConfig, target: &LaunchTarget) -> Result<Vec<OsString>> {
    let media = require_media(target)?;
    let mut args: Vec<OsString> = config
        .module_player
        .extra_args
        .iter()
        .map(OsString::from)
        .collect();
    args.push(media.into());
    Ok(args)
}

fn stream_args(_config: &BackendsConfig, target: &LaunchTarget) -> Result<Vec<OsString>> {
    let url = target
        .url
        .as_ref()
        .ok_or_else(|| EngineError::Stream("no stream url".to_string()))?;
    Ok(vec!["--no-video".into(), "--quiet".into(), url.into()])
}

fn export_args(_config: &BackendsConfig, target: &LaunchTarget) -> Result<Vec<OsString>> {
    let soundfont = require_soundfont(target)?;
    let media = require_media(target)?;
    let output = target
        .output
        .as_ref()
        .ok_or_else(|| EngineError::Export("no output path".to_string()))?;
    Ok(vec!["-F".into(), output.into(), soundfont.into(), media.into()])
}

/// Program names per kind, plus the argument builders.
#[derive(Debug, Clone)]
pub struct BackendTable {
    config: BackendsConfig,
}

impl BackendTable {
    pub fn new(config: BackendsConfig) -> Self {
        Self { config }
    }

    pub fn program(&self, kind: BackendKind) -> &str {
        match kind {
            BackendKind::Synth => &self.config.synth.program,
            BackendKind::ModulePlayer => &self.config.module_player.program,
            BackendKind::Stream => &self.config.stream.program,
            BackendKind::Export => &self.config.export.program,
        }
    }

    pub fn transcoder(&self) -> &str {
        &self.config.export.transcoder
    }

    pub fn mixer(&self) -> &str {
        &self.config.mixer.program
    }

    pub fn mixer_sink(&self) -> &str {
        &self.config.mixer.sink
    }

    pub fn launch_spec(&self, kind: BackendKind, target: &LaunchTarget) -> Result<LaunchSpec> {
        let args = (kind.builder())(&self.config, target)?;
        Ok(LaunchSpec {
            kind,
            program: self.program(kind).to_string(),
            args,
        })
    }

    /// Every program name the table may launch, for the startup check.
    pub fn programs(&self) -> Vec<String> {
        let mut programs: Vec<String> = [
            self.program(BackendKind::Synth),
            self.program(BackendKind::ModulePlayer),
            self.program(BackendKind::Stream),
            self.program(BackendKind::Export),
            self.transcoder(),
            self.mixer(),
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        programs.sort_unstable();
        programs.dedup();
        programs
    }

    /// Configured programs that cannot be resolved right now.
    pub fn missing_programs(&self) -> Vec<String> {
        self.programs()
            .into_iter()
            .filter(|p| platform::find_binary(p).is_none())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> BackendTable {
        BackendTable::new(BackendsConfig::default())
    }

    #[test]
    fn media_kind_selects_backend() {
        assert_eq!(BackendKind::for_media(MediaKind::MidiLike), BackendKind::Synth);
        assert_eq!(
            BackendKind::for_media(MediaKind::ModuleLike),
            BackendKind::ModulePlayer
        );
    }

    #[test]
    fn synth_requires_soundfont() {
        let target = LaunchTarget::media(PathBuf::from("/m/a.mid"), None);
        let err = table().launch_spec(BackendKind::Synth, &target).unwrap_err();
        assert!(matches!(err, EngineError::NoSoundfontSelected));
    }

    #[test]
    fn synth_command_line() {
        let target = LaunchTarget::media(
            PathBuf::from("/m/a.mid"),
            Some(PathBuf::from("/sf/GM.sf2")),
        );
        let spec = table().launch_spec(BackendKind::Synth, &target).unwrap();
        assert_eq!(spec.program, "fluidsynth");
        let args: Vec<_> = spec.args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec!["-a", "pulseaudio", "-m", "alsa_seq", "-i", "/sf/GM.sf2", "/m/a.mid"]
        );
    }

    #[test]
    fn module_player_ignores_soundfont() {
        let target = LaunchTarget::media(
            PathBuf::from("/m/b.xm"),
            Some(PathBuf::from("/sf/GM.sf2")),
        );
        let spec = table()
            .launch_spec(BackendKind::ModulePlayer, &target)
            .unwrap();
        assert_eq!(spec.args, vec![OsString::from("/m/b.xm")]);
    }

    #[test]
    fn export_command_line() {
        let target = LaunchTarget {
            output: Some(PathBuf::from("/out/a-GM.wav")),
            ..LaunchTarget::media(PathBuf::from("/m/a.mid"), Some(PathBuf::from("/sf/GM.sf2")))
        };
        let spec = table().launch_spec(BackendKind::Export, &target).unwrap();
        let args: Vec<_> = spec.args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["-F", "/out/a-GM.wav", "/sf/GM.sf2", "/m/a.mid"]);
    }

    #[test]
    fn unresolvable_programs_are_reported() {
        let mut config = BackendsConfig::default();
        config.stream.program = "no-such-stream-player".to_string();
        let table = BackendTable::new(config);
        let missing = table.missing_programs();
        assert!(missing.iter().any(|p| p == "no-such-stream-player"));
    }

    #[test]
    fn programs_are_deduplicated() {
        let table = table();
        let programs = table.programs();
        assert_eq!(
            programs.iter().filter(|p| **p == "fluidsynth").count(),
            1
        );
    }
}
