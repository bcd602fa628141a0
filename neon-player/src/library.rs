//! Downloaded track library
//!
//! Downloads are stored flat in the music folder as
//! `{id}_{title}_{author}.{mp3|m4a}`. The set of downloaded ids is read once
//! and cached; call [`TrackLibrary::refresh`] after the folder changes.

use neon_common::Track;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

/// Extensions the downloader produces, in lookup order
pub const TRACK_EXTENSIONS: [&str; 2] = ["mp3", "m4a"];

/// Answers "is a local copy of this track id present"
pub trait DownloadIndex: Send + Sync {
    fn is_downloaded(&self, track_id: &str) -> bool;
}

/// View over the music folder
pub struct TrackLibrary {
    music_dir: PathBuf,
    ids: RwLock<Option<HashSet<String>>>,
}

impl TrackLibrary {
    pub fn new(music_dir: impl Into<PathBuf>) -> Self {
        Self {
            music_dir: music_dir.into(),
            ids: RwLock::new(None),
        }
    }

    pub fn music_dir(&self) -> &Path {
        &self.music_dir
    }

    /// File name stem the downloader uses for a track
    pub fn file_stem(track: &Track) -> String {
        format!("{}_{}_{}", track.id, track.title, track.author)
    }

    /// Expected path for a track with the given extension
    pub fn track_path(&self, track: &Track, extension: &str) -> PathBuf {
        self.music_dir
            .join(format!("{}.{}", Self::file_stem(track), extension))
    }

    /// Path of the local copy, if one exists
    ///
    /// Exact names are tried first. Titles are edited by catalogs over time,
    /// so a file whose name starts with the same id also counts.
    pub fn locate(&self, track: &Track) -> Option<PathBuf> {
        if let Some(path) = TRACK_EXTENSIONS
            .iter()
            .map(|ext| self.track_path(track, ext))
            .find(|path| path.is_file())
        {
            return Some(path);
        }

        let id = track.id.to_string();
        self.scan()
            .into_iter()
            .find(|(file_id, _)| *file_id == id)
            .map(|(_, path)| path)
    }

    /// Drop the cached id set so the next lookup rescans the folder
    pub fn refresh(&self) {
        *self.ids.write().unwrap_or_else(|e| e.into_inner()) = None;
        debug!("Track library cache cleared");
    }

    fn scan(&self) -> Vec<(String, PathBuf)> {
        let entries = match std::fs::read_dir(&self.music_dir) {
            Ok(entries) => entries,
            Err(e) => {
                if self.music_dir.exists() {
                    warn!("Cannot read music folder {}: {}", self.music_dir.display(), e);
                }
                return Vec::new();
            }
        };

        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter_map(|path| {
                let ext = path.extension()?.to_str()?.to_ascii_lowercase();
                if !TRACK_EXTENSIONS.contains(&ext.as_str()) {
                    return None;
                }
                let stem = path.file_stem()?.to_str()?;
                let id = stem.split('_').next()?.to_string();
                Some((id, path))
            })
            .collect()
    }

    fn load_ids(&self) -> HashSet<String> {
        let ids: HashSet<String> = self.scan().into_iter().map(|(id, _)| id).collect();
        debug!(
            "Indexed {} downloaded tracks in {}",
            ids.len(),
            self.music_dir.display()
        );
        ids
    }
}

impl DownloadIndex for TrackLibrary {
    fn is_downloaded(&self, track_id: &str) -> bool {
        if let Some(ids) = self.ids.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            return ids.contains(track_id);
        }

        let mut slot = self.ids.write().unwrap_or_else(|e| e.into_inner());
        slot.get_or_insert_with(|| self.load_ids())
            .contains(track_id)
    }
}
