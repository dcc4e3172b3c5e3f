//! Flat favourites list: one normalised absolute path per line, UTF-8.
//!
//! Favourites are non-critical.  Load failures degrade to an empty set and
//! save failures leave the in-memory set authoritative for the session.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::platform::normalize_path;

pub type FavouritesSet = BTreeSet<PathBuf>;

/// Read the favourites file, creating an empty one if it does not exist.
/// Any read or decode failure is logged and yields an empty set.
pub fn load(path: &Path) -> FavouritesSet {
    if !path.exists() {
        if let Err(e) = save(path, &FavouritesSet::new()) {
            warn!("favourites: could not create {:?}: {:#}", path, e);
        }
        return FavouritesSet::new();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => parse(&content),
        Err(e) => {
            warn!("favourites: could not read {:?}: {}", path, e);
            FavouritesSet::new()
        }
    }
}

pub fn parse(content: &str) -> FavouritesSet {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| normalize_path(Path::new(l)))
        .collect()
}

/// Rewrite the whole file.  Written to a sibling temp file and renamed over
/// the target so a crash mid-write never leaves a truncated list.
pub fn save(path: &Path, set: &FavouritesSet) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)
        .with_context(|| format!("creating favourites directory {:?}", parent))?;

    let mut body = String::new();
    for entry in set {
        body.push_str(&entry.to_string_lossy());
        body.push('\n');
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "favourites".to_string());
    let tmp_path = parent.join(format!(".{}.tmp", file_name));
    {
        let mut tmp = std::fs::File::create(&tmp_path)
            .with_context(|| format!("creating {:?}", tmp_path))?;
        tmp.write_all(body.as_bytes())?;
        tmp.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming {:?} over {:?}", tmp_path, path))?;
    debug!("favourites: saved {} entries to {:?}", set.len(), path);
    Ok(())
}

/// Add `path` if absent, remove it if present.
pub fn toggle(mut set: FavouritesSet, path: &Path) -> FavouritesSet {
    let key = normalize_path(path);
    if !set.remove(&key) {
        set.insert(key);
    }
    set
}

/// Favourites bound to their backing file.
pub struct FavouritesStore {
    path: PathBuf,
    set: FavouritesSet,
}

impl FavouritesStore {
    pub fn open(path: PathBuf) -> Self {
        let set = load(&path);
        info!("favourites: {} entries from {:?}", set.len(), path);
        Self { path, set }
    }

    pub fn set(&self) -> &FavouritesSet {
        &self.set
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.set.contains(&normalize_path(path))
    }

    /// Flip membership and persist.  Returns the new membership; the
    /// persistence result is returned separately so callers can log it
    /// without losing the in-memory change.
    pub fn toggle(&mut self, path: &Path) -> (bool, anyhow::Result<()>) {
        let set = std::mem::take(&mut self.set);
        self.set = toggle(set, path);
        let now = self.contains(path);
        (now, save(&self.path, &self.set))
    }
}
