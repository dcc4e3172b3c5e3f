//! Playlist Cursor: a filtered, ordered view over the catalog plus the
//! selected position in it.
//!
//! The view stores indices into the catalog, so reordering or refiltering
//! never touches catalog order.  Shuffled mode draws a fresh permutation on
//! every rebuild and `advance` picks uniformly from the whole view, which
//! means the same entry can come up twice in a row.

use std::path::Path;

use deck_proto::catalog::sort_key;
use deck_proto::favourites::FavouritesSet;
use deck_proto::media::MediaEntry;
use deck_proto::platform::normalize_path;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Filter text that selects favourites only.
pub const FAVOURITES_SENTINEL: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderMode {
    #[default]
    Sorted,
    Shuffled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    All,
    Favourites,
    /// Lowercased needle.
    Contains(String),
}

impl Predicate {
    fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            Self::All
        } else if text == FAVOURITES_SENTINEL {
            Self::Favourites
        } else {
            Self::Contains(text.to_lowercase())
        }
    }

    fn matches(&self, entry: &MediaEntry) -> bool {
        match self {
            Self::All => true,
            Self::Favourites => entry.is_favourite,
            Self::Contains(needle) => {
                entry.display_name.to_lowercase().contains(needle.as_str())
                    || entry.containing_folder.to_lowercase().contains(needle.as_str())
            }
        }
    }
}

pub struct Playlist {
    catalog: Vec<MediaEntry>,
    filter_text: String,
    predicate: Predicate,
    mode: OrderMode,
    view: Vec<usize>,
    cursor: Option<usize>,
    rng: StdRng,
}

impl Default for Playlist {
    fn default() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl Playlist {
    pub fn new(catalog: Vec<MediaEntry>) -> Self {
        let mut playlist = Self::default();
        playlist.rebuild(catalog);
        playlist
    }

    /// Deterministic shuffling, for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            catalog: Vec::new(),
            filter_text: String::new(),
            predicate: Predicate::All,
            mode: OrderMode::Sorted,
            view: Vec::new(),
            cursor: None,
            rng,
        }
    }

    // ── view construction ────────────────────────────────────────────────────

    /// Replace the catalog and recompute the view.  The cursor follows the
    /// previously selected path if it survives, else goes to the first entry.
    pub fn rebuild(&mut self, catalog: Vec<MediaEntry>) {
        self.catalog = catalog;
        self.refresh();
    }

    pub fn set_predicate(&mut self, text: &str) {
        self.filter_text = text.trim().to_string();
        self.predicate = Predicate::parse(text);
        self.refresh();
    }

    pub fn set_mode(&mut self, mode: OrderMode) {
        self.mode = mode;
        self.refresh();
    }

    /// Mark catalog entries from a favourites set.
    pub fn apply_favourites(&mut self, favourites: &FavouritesSet) {
        for entry in &mut self.catalog {
            entry.is_favourite = favourites.contains(&normalize_path(&entry.path));
        }
        if self.predicate == Predicate::Favourites {
            self.refresh();
        }
    }

    /// Update one entry's favourite flag.  Returns `false` if `path` is not
    /// in the catalog.
    pub fn set_favourite(&mut self, path: &Path, favourite: bool) -> bool {
        let path = normalize_path(path);
        let Some(entry) = self.catalog.iter_mut().find(|e| e.path == path) else {
            return false;
        };
        entry.is_favourite = favourite;
        if self.predicate == Predicate::Favourites {
            self.refresh();
        }
        true
    }

    fn refresh(&mut self) {
        let selected = self.current().map(|e| e.path.clone());

        let mut view: Vec<usize> = self
            .catalog
            .iter()
            .enumerate()
            .filter(|(_, e)| self.predicate.matches(e))
            .map(|(i, _)| i)
            .collect();
        match self.mode {
            OrderMode::Sorted => {
                let catalog = &self.catalog;
                view.sort_by_cached_key(|&i| sort_key(&catalog[i].path));
            }
            OrderMode::Shuffled => view.shuffle(&mut self.rng),
        }
        self.view = view;

        self.cursor = selected
            .and_then(|p| self.position_of(&p))
            .or(if self.view.is_empty() { None } else { Some(0) });
        debug!(
            "playlist: view {} of {} ({:?}, filter {:?})",
            self.view.len(),
            self.catalog.len(),
            self.mode,
            self.filter_text
        );
    }

    fn position_of(&self, path: &Path) -> Option<usize> {
        self.view.iter().position(|&i| self.catalog[i].path == path)
    }

    // ── navigation ───────────────────────────────────────────────────────────

    pub fn current(&self) -> Option<&MediaEntry> {
        self.cursor
            .and_then(|c| self.view.get(c))
            .map(|&i| &self.catalog[i])
    }

    /// Move the cursor and return the new entry.  Sorted mode wraps at both
    /// ends; shuffled mode picks any entry of the view at random.
    pub fn advance(&mut self, direction: Direction) -> Option<&MediaEntry> {
        let len = self.view.len();
        if len == 0 {
            self.cursor = None;
            return None;
        }
        let next = match (self.mode, self.cursor, direction) {
            (OrderMode::Shuffled, _, _) => self.rng.gen_range(0..len),
            (OrderMode::Sorted, None, Direction::Next) => 0,
            (OrderMode::Sorted, None, Direction::Previous) => len - 1,
            (OrderMode::Sorted, Some(c), Direction::Next) => (c + 1) % len,
            (OrderMode::Sorted, Some(c), Direction::Previous) => (c + len - 1) % len,
        };
        self.cursor = Some(next);
        self.current()
    }

    /// Point the cursor at `path` if it is in the view.
    pub fn select_path(&mut self, path: &Path) -> Option<&MediaEntry> {
        let path = normalize_path(path);
        self.select_where(|e| e.path == path)
    }

    /// Point the cursor at the first view entry satisfying `pred`.
    pub fn select_where<F>(&mut self, pred: F) -> Option<&MediaEntry>
    where
        F: Fn(&MediaEntry) -> bool,
    {
        let pos = self.view.iter().position(|&i| pred(&self.catalog[i]))?;
        self.cursor = Some(pos);
        self.current()
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = if self.view.is_empty() { None } else { Some(0) };
    }

    // ── accessors ────────────────────────────────────────────────────────────

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    pub fn mode(&self) -> OrderMode {
        self.mode
    }

    pub fn filter_text(&self) -> &str {
        &self.filter_text
    }

    pub fn catalog(&self) -> &[MediaEntry] {
        &self.catalog
    }

    /// Entries of the view in view order.
    pub fn entries(&self) -> impl Iterator<Item = &MediaEntry> {
        self.view.iter().map(|&i| &self.catalog[i])
    }
}
