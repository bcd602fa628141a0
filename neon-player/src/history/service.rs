//! Listening history service
//!
//! Sits between the playback controller and the repository: builds track
//! keys, rate-limits progress writes per track and turns stored rows back
//! into playable tracks for the "Recently played" playlist.

use crate::clock::{Clock, MonotonicClock};
use crate::config::HistorySettings;
use crate::error::Result;
use crate::history::database::HistoryDatabase;
use crate::history::repository::{HistoryRepository, ProgressRecord, TrackHistoryEntry};
use crate::history::throttle::WriteThrottle;
use crate::library::DownloadIndex;
use neon_common::{Track, TrackKey, TrackSource};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Name of the system playlist built from history
pub const RECENTLY_PLAYED_NAME: &str = "Recently played";

/// Result of a progress save request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written,
    /// Skipped, the track was written less than one interval ago
    Throttled,
}

/// System playlist of recently played tracks, newest first
#[derive(Debug, Clone, Serialize)]
pub struct RecentlyPlayed {
    pub name: String,
    pub tracks: Vec<Track>,
}

pub struct HistoryService {
    db: Arc<HistoryDatabase>,
    repo: HistoryRepository,
    throttle: WriteThrottle,
    downloads: Arc<dyn DownloadIndex>,
    recent_limit: i64,
}

impl HistoryService {
    pub fn new(
        db: Arc<HistoryDatabase>,
        settings: &HistorySettings,
        downloads: Arc<dyn DownloadIndex>,
    ) -> Self {
        Self::with_clock(db, settings, downloads, Arc::new(MonotonicClock))
    }

    pub fn with_clock(
        db: Arc<HistoryDatabase>,
        settings: &HistorySettings,
        downloads: Arc<dyn DownloadIndex>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo: HistoryRepository::new(Arc::clone(&db)),
            db,
            throttle: WriteThrottle::new(settings.save_interval(), clock),
            downloads,
            recent_limit: settings.recent_limit,
        }
    }

    pub fn repository(&self) -> &HistoryRepository {
        &self.repo
    }

    /// Stable `"{source}:{id}"` key of a track
    pub fn build_track_key(track: &Track) -> TrackKey {
        track.key()
    }

    fn record(track: &Track, position_ms: i64, duration_ms: i64, increment: i64) -> ProgressRecord {
        ProgressRecord {
            track_key: Self::build_track_key(track),
            title: track.title.clone(),
            author: track.author.clone(),
            source: track.source.as_str().to_string(),
            position_ms,
            duration_ms,
            listen_increment: increment,
        }
    }

    /// Persist progress unless the track was saved within the interval
    ///
    /// `force` bypasses the interval (pause, track switch, shutdown).
    pub async fn save_progress(
        &self,
        track: &Track,
        position_ms: i64,
        duration_ms: i64,
        force: bool,
    ) -> Result<SaveOutcome> {
        let key = Self::build_track_key(track);
        if !force && !self.throttle.should_write(&key) {
            return Ok(SaveOutcome::Throttled);
        }

        self.repo
            .upsert_progress(&Self::record(track, position_ms, duration_ms, 0))
            .await?;
        self.throttle.record(&key);

        debug!("Saved progress for {}: {}/{}ms", key, position_ms, duration_ms);
        Ok(SaveOutcome::Written)
    }

    /// Persist the final state and count one more listen; never throttled
    pub async fn mark_track_finished(
        &self,
        track: &Track,
        position_ms: i64,
        duration_ms: i64,
    ) -> Result<()> {
        let key = Self::build_track_key(track);
        self.repo
            .upsert_progress(&Self::record(track, position_ms, duration_ms, 1))
            .await?;
        self.throttle.record(&key);

        debug!("Marked {} finished", key);
        Ok(())
    }

    /// Saved position to resume from, 0 for an unknown track
    pub async fn get_resume_position(&self, track: &Track) -> Result<i64> {
        self.repo
            .get_saved_position(&Self::build_track_key(track))
            .await
    }

    pub async fn get_entry(&self, track: &Track) -> Result<Option<TrackHistoryEntry>> {
        self.repo.get_entry(&Self::build_track_key(track)).await
    }

    /// Recently played playlist with the configured default size
    pub async fn get_default_recent_playlist(&self) -> Result<Option<RecentlyPlayed>> {
        self.get_recent_playlist(self.recent_limit).await
    }

    /// Recently played playlist, `None` when history is empty
    pub async fn get_recent_playlist(&self, limit: i64) -> Result<Option<RecentlyPlayed>> {
        let entries = self.repo.get_recent_entries(limit).await?;
        if entries.is_empty() {
            return Ok(None);
        }

        let tracks = entries
            .into_iter()
            .map(|entry| self.rehydrate(entry))
            .collect();

        Ok(Some(RecentlyPlayed {
            name: RECENTLY_PLAYED_NAME.to_string(),
            tracks,
        }))
    }

    fn rehydrate(&self, entry: TrackHistoryEntry) -> Track {
        let fallback = entry
            .source
            .parse::<TrackSource>()
            .unwrap_or(TrackSource::Youtube);
        let (source, id) = entry.track_key.parse(fallback);
        let downloaded = self.downloads.is_downloaded(&id.to_string());

        let mut track = Track::new(source, id, entry.title, entry.author).with_downloaded(downloaded);
        track.listen_count = entry.listen_count;
        track
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}
