use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

/// Where media, fonts, favourites and exports live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,
    #[serde(default = "default_soundfont_dir")]
    pub soundfont_dir: PathBuf,
    #[serde(default = "default_favourites_file")]
    pub favourites_file: PathBuf,
    /// Export destination.  Created on demand.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

/// Extension allow-lists, lowercase, without the leading dot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_midi_extensions")]
    pub midi_extensions: Vec<String>,
    #[serde(default = "default_module_extensions")]
    pub module_extensions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default)]
    pub synth: SynthConfig,
    #[serde(default)]
    pub module_player: ModulePlayerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub mixer: MixerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthConfig {
    #[serde(default = "default_synth_program")]
    pub program: String,
    #[serde(default = "default_audio_driver")]
    pub audio_driver: String,
    #[serde(default = "default_midi_driver")]
    pub midi_driver: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulePlayerConfig {
    #[serde(default = "default_module_program")]
    pub program: String,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_stream_program")]
    pub program: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_synth_program")]
    pub program: String,
    #[serde(default = "default_transcoder_program")]
    pub transcoder: String,
}

/// System volume control (`wpctl` on PipeWire).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixerConfig {
    #[serde(default = "default_mixer_program")]
    pub program: String,
    #[serde(default = "default_mixer_sink")]
    pub sink: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Grace period between SIGTERM and SIGKILL.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_stream_read_timeout_secs")]
    pub stream_read_timeout_secs: u64,
    /// Substrings (case-insensitive) that mark renderer stderr as a real failure.
    #[serde(default = "default_error_markers")]
    pub error_markers: Vec<String>,
    /// Exit codes that always count as the track finishing.
    #[serde(default = "default_natural_exit_codes")]
    pub natural_exit_codes: Vec<i32>,
    /// Renderer stderr lines containing any of these are dropped as noise.
    #[serde(default = "default_ignored_diagnostics")]
    pub ignored_diagnostics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            media_dir: default_media_dir(),
            soundfont_dir: default_soundfont_dir(),
            favourites_file: default_favourites_file(),
            output_dir: default_output_dir(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            midi_extensions: default_midi_extensions(),
            module_extensions: default_module_extensions(),
        }
    }
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            program: default_synth_program(),
            audio_driver: default_audio_driver(),
            midi_driver: default_midi_driver(),
        }
    }
}

impl Default for ModulePlayerConfig {
    fn default() -> Self {
        Self {
            program: default_module_program(),
            extra_args: Vec::new(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            program: default_stream_program(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            program: default_synth_program(),
            transcoder: default_transcoder_program(),
        }
    }
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            program: default_mixer_program(),
            sink: default_mixer_sink(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            stop_grace_ms: default_stop_grace_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            stream_read_timeout_secs: default_stream_read_timeout_secs(),
            error_markers: default_error_markers(),
            natural_exit_codes: default_natural_exit_codes(),
            ignored_diagnostics: default_ignored_diagnostics(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: default_control_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_media_dir() -> PathBuf {
    platform::home_dir().join("MIDI")
}

fn default_soundfont_dir() -> PathBuf {
    PathBuf::from("/usr/share/sounds/sf2")
}

fn default_favourites_file() -> PathBuf {
    platform::data_dir().join("favourites.txt")
}

/// Relative: resolved against the working directory at export time.
fn default_output_dir() -> PathBuf {
    PathBuf::from("Output")
}

fn default_midi_extensions() -> Vec<String> {
    ["mid", "midi", "kar", "rmi"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_module_extensions() -> Vec<String> {
    [
        "mod", "xm", "s3m", "it", "mptm", "669", "mtm", "stm", "med", "okt", "far", "ult", "umx",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_synth_program() -> String {
    "fluidsynth".to_string()
}

fn default_audio_driver() -> String {
    "pulseaudio".to_string()
}

fn default_midi_driver() -> String {
    "alsa_seq".to_string()
}

fn default_module_program() -> String {
    "openmpt123".to_string()
}

fn default_stream_program() -> String {
    "mpv".to_string()
}

fn default_transcoder_program() -> String {
    "lame".to_string()
}

fn default_mixer_program() -> String {
    "wpctl".to_string()
}

fn default_mixer_sink() -> String {
    "@DEFAULT_AUDIO_SINK@".to_string()
}

fn default_stop_grace_ms() -> u64 {
    2000
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_stream_read_timeout_secs() -> u64 {
    15
}

fn default_error_markers() -> Vec<String> {
    vec!["error".to_string()]
}

fn default_natural_exit_codes() -> Vec<i32> {
    vec![0]
}

fn default_ignored_diagnostics() -> Vec<String> {
    vec![
        "Failed to set thread to high priority".to_string(),
        "Using PulseAudio driver".to_string(),
    ]
}

fn default_control_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    platform::CONTROL_TCP_PORT
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    /// Every extension the catalog should pick up.
    pub fn media_extensions(&self) -> Vec<String> {
        self.catalog
            .midi_extensions
            .iter()
            .chain(self.catalog.module_extensions.iter())
            .map(|e| e.to_ascii_lowercase())
            .collect()
    }
}
