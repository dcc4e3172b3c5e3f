//! Filesystem discovery of playable files and soundfonts.
//!
//! Traversal is best-effort: unreadable directories are logged and skipped,
//! an unreadable root yields an empty catalog.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::CatalogConfig;
use crate::media::{extension_lower, MediaEntry, MediaKind, SoundfontEntry};
use crate::platform::normalize_path;

pub const SOUNDFONT_EXTENSION: &str = "sf2";

/// Recursively collect every file under `root` whose extension is in the
/// catalog allow-lists.  Result is sorted by case-insensitive full path and
/// contains each normalised path once.
pub fn scan(root: &Path, catalog: &CatalogConfig) -> Vec<MediaEntry> {
    let mut entries: Vec<MediaEntry> = walk_files(root)
        .into_iter()
        .filter_map(|path| MediaKind::from_path(&path, catalog).map(|kind| MediaEntry::new(path, kind)))
        .collect();
    entries.sort_by_cached_key(|e| sort_key(&e.path));
    debug!("catalog: {} media files under {:?}", entries.len(), root);
    entries
}

/// Recursively collect `.sf2` files under `root`, sorted like [`scan`].
pub fn scan_soundfonts(root: &Path) -> Vec<SoundfontEntry> {
    let mut fonts: Vec<SoundfontEntry> = walk_files(root)
        .into_iter()
        .filter(|p| extension_lower(p).as_deref() == Some(SOUNDFONT_EXTENSION))
        .map(SoundfontEntry::new)
        .collect();
    fonts.sort_by_cached_key(|f| sort_key(&f.path));
    debug!("catalog: {} soundfonts under {:?}", fonts.len(), root);
    fonts
}

pub fn sort_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

fn walk_files(root: &Path) -> Vec<PathBuf> {
    let root = normalize_path(root);
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for entry in WalkDir::new(&root).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                // Covers both an unreadable root and unreadable subtrees;
                // walkdir skips the failing directory and carries on.
                warn!("catalog: skipping {:?}: {}", e.path().unwrap_or(&root), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = normalize_path(entry.path());
        if seen.insert(path.clone()) {
            files.push(path);
        }
    }
    files
}
