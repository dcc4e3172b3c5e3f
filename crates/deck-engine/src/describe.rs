//! Text descriptions of media files for the presentation layer.
//!
//! The engine only depends on [`Describe`]; [`FileInfoDescriber`] is the
//! stock implementation, which reports file details and, for MIDI-like
//! files, the text meta-events `midicsv` prints.  Describing never fails:
//! problems are rendered into the returned text.

use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use deck_proto::config::CatalogConfig;
use deck_proto::media::{display_name, MediaKind};
use deck_proto::platform;

/// Meta-event tags whose text column is shown.
const TEXT_TAGS: &[&str] = &[
    "Title_t",
    "Text_t",
    "Copyright_t",
    "Composer",
    "Album",
    "Title",
    "Track_name",
    "Lyrics",
    "Metaeventtext",
    "Marker",
];

pub const NO_METADATA: &str = "**NO METADATA AVAILABLE FOR THIS MIDI**";

pub trait Describe: Send + Sync {
    fn describe(&self, path: &Path) -> String;

    /// Playback length, when the describer knows it.
    fn duration(&self, _path: &Path) -> Option<Duration> {
        None
    }
}

pub struct FileInfoDescriber {
    catalog: CatalogConfig,
    midicsv: String,
}

impl FileInfoDescriber {
    pub fn new(catalog: CatalogConfig) -> Self {
        Self::with_program(catalog, "midicsv")
    }

    pub fn with_program(catalog: CatalogConfig, midicsv: impl Into<String>) -> Self {
        Self {
            catalog,
            midicsv: midicsv.into(),
        }
    }

    fn try_describe(&self, path: &Path) -> anyhow::Result<String> {
        let size = fs::metadata(path)?.len();
        let absolute = platform::normalize_path(path);
        let mut text = format!(
            "Filename: {}\nPath: {}\nFile Size: {}\n",
            display_name(path),
            absolute.display(),
            format_size(size)
        );

        if MediaKind::from_path(path, &self.catalog) == Some(MediaKind::MidiLike) {
            let csv = self.run_midicsv(path)?;
            let lines = extract_text_events(&csv);
            text.push('\n');
            text.push_str(&lines.join("\n"));
            if lines.is_empty() {
                text.push_str("\n\n");
                text.push_str(NO_METADATA);
            }
        }
        Ok(text)
    }

    fn run_midicsv(&self, path: &Path) -> anyhow::Result<String> {
        let program = platform::find_binary(&self.midicsv)
            .ok_or_else(|| anyhow::anyhow!("{} not found", self.midicsv))?;
        let output = Command::new(program)
            .arg(path)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .output()?;
        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}",
                self.midicsv,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Describe for FileInfoDescriber {
    fn describe(&self, path: &Path) -> String {
        self.try_describe(path)
            .unwrap_or_else(|e| format!("Error extracting metadata: {}", e))
    }
}

/// Fourth column of every CSV record that mentions a text tag.
pub fn extract_text_events(csv: &str) -> Vec<String> {
    csv.lines()
        .filter(|line| TEXT_TAGS.iter().any(|tag| line.contains(tag)))
        .filter_map(|line| line.splitn(4, ',').nth(3))
        .map(|value| value.trim().to_string())
        .collect()
}

/// Bytes as KB, or MB above one mebibyte, two decimals.
pub fn format_size(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if bytes > MIB {
        format!("{:.2} MB", bytes as f64 / MIB as f64)
    } else {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    }
}
