use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::CatalogConfig;

/// Which renderer family a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    /// Standard MIDI files, rendered by the synthesizer with a soundfont.
    MidiLike,
    /// Tracker modules, rendered by the module player.
    ModuleLike,
}

impl MediaKind {
    /// Classify by extension against the configured allow-lists.
    /// MIDI extensions win if a user lists an extension in both.
    pub fn from_path(path: &Path, catalog: &CatalogConfig) -> Option<Self> {
        let ext = extension_lower(path)?;
        if catalog.midi_extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
            Some(Self::MidiLike)
        } else if catalog
            .module_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(&ext))
        {
            Some(Self::ModuleLike)
        } else {
            None
        }
    }

    pub fn needs_soundfont(self) -> bool {
        matches!(self, Self::MidiLike)
    }
}

/// One playable file in the catalog.  Identity is `path` (normalised, absolute).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaEntry {
    pub path: PathBuf,
    pub display_name: String,
    /// Name of the directory that holds the file.
    pub containing_folder: String,
    pub kind: MediaKind,
    #[serde(default)]
    pub is_favourite: bool,
}

impl MediaEntry {
    pub fn new(path: PathBuf, kind: MediaKind) -> Self {
        Self {
            display_name: display_name(&path),
            containing_folder: path
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path,
            kind,
            is_favourite: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundfontEntry {
    pub path: PathBuf,
    pub display_name: String,
}

impl SoundfontEntry {
    pub fn new(path: PathBuf) -> Self {
        Self {
            display_name: display_name(&path),
            path,
        }
    }
}

/// File name with invalid UTF-8 replaced, falling back to the full path.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// File stem (no extension), lossily decoded.
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub(crate) fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_by_extension() {
        let catalog = CatalogConfig::default();
        assert_eq!(
            MediaKind::from_path(Path::new("/m/a.MID"), &catalog),
            Some(MediaKind::MidiLike)
        );
        assert_eq!(
            MediaKind::from_path(Path::new("/m/b.xm"), &catalog),
            Some(MediaKind::ModuleLike)
        );
        assert_eq!(MediaKind::from_path(Path::new("/m/c.mp3"), &catalog), None);
        assert_eq!(MediaKind::from_path(Path::new("/m/noext"), &catalog), None);
    }

    #[test]
    fn entry_names() {
        let entry = MediaEntry::new(PathBuf::from("/music/chip/song.mod"), MediaKind::ModuleLike);
        assert_eq!(entry.display_name, "song.mod");
        assert_eq!(entry.containing_folder, "chip");
        assert!(!entry.is_favourite);
    }
}
