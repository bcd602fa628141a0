//! Playback controller
//!
//! Glues the media engine to listening history:
//! - switching tracks flushes the outgoing track's progress first
//! - a new track gets a history row right away and resumes from its saved
//!   position after a short settle delay
//! - progress is saved periodically while playing and on pause
//! - end of media counts a listen and is reported to the UI shell
//!
//! History failures are logged and never interrupt playback.

use crate::audio::{MediaEngine, PlayerEvent};
use crate::config::PlaybackSettings;
use crate::error::{Error, Result};
use crate::events::PlaybackEvent;
use crate::history::HistoryService;
use crate::playback::resolver::SourceResolver;
use crate::state::SharedState;
use neon_common::{Track, TrackKey};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

fn to_i64(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

pub struct PlaybackController {
    engine: Arc<MediaEngine>,
    history: Arc<HistoryService>,
    resolver: Arc<SourceResolver>,
    state: Arc<SharedState>,
    settings: PlaybackSettings,
    /// Token of the latest resume restore; cancelled once it ran or was superseded
    restore: Arc<Mutex<CancellationToken>>,
    shutdown: CancellationToken,
    started: Arc<AtomicBool>,
}

impl PlaybackController {
    pub fn new(
        engine: Arc<MediaEngine>,
        history: Arc<HistoryService>,
        resolver: Arc<SourceResolver>,
        settings: PlaybackSettings,
    ) -> Self {
        engine.set_volume(settings.initial_volume);

        let restore = CancellationToken::new();
        restore.cancel();

        Self {
            engine,
            history,
            resolver,
            state: Arc::new(SharedState::new()),
            settings,
            restore: Arc::new(Mutex::new(restore)),
            shutdown: CancellationToken::new(),
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cheap copy sharing all state, for background tasks
    fn clone_handles(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            history: Arc::clone(&self.history),
            resolver: Arc::clone(&self.resolver),
            state: Arc::clone(&self.state),
            settings: self.settings.clone(),
            restore: Arc::clone(&self.restore),
            shutdown: self.shutdown.clone(),
            started: Arc::clone(&self.started),
        }
    }

    /// Start the progress ticker and the end-of-media watcher
    ///
    /// Calling it again has no effect.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let ticker = self.clone_handles();
        tokio::spawn(async move {
            ticker.progress_ticker().await;
        });

        let watcher = self.clone_handles();
        let events = self.engine.subscribe_playback_events();
        tokio::spawn(async move {
            watcher.player_event_handler(events).await;
        });

        info!(
            "Playback controller started (progress interval {}ms)",
            self.settings.progress_interval_ms
        );
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.state.subscribe_events()
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn engine(&self) -> &Arc<MediaEngine> {
        &self.engine
    }

    pub async fn current_track(&self) -> Option<Track> {
        self.state.current_track().await
    }

    /// Play a track from its local file or a resolved stream
    ///
    /// If the source cannot be resolved the current track keeps playing. If
    /// the engine fails to start it, nothing is playing afterwards.
    pub async fn play_track(&self, track: Track) -> Result<()> {
        let key = track.key();
        info!("Play requested: {} ({})", track, key);

        if let Some(previous) = self.state.current_track().await {
            if previous != track {
                self.flush_progress(&previous).await;
            }
        }

        let source = match self.resolver.resolve(&track).await {
            Ok(source) => source,
            Err(e) => {
                warn!("Cannot resolve source for {}: {}", key, e);
                self.report_failure(&key, &e);
                return Err(e);
            }
        };

        let restore_token = self.replace_restore_token();

        self.state.set_paused(false).await;

        if let Err(e) = self.engine.play_both(&source.media_source()).await {
            warn!("Failed to start {}: {}", key, e);
            if source.is_stream() {
                self.resolver.invalidate(&key);
            }
            self.state.replace_current_track(None).await;
            self.report_failure(&key, &e);
            return Err(e);
        }

        self.state.replace_current_track(Some(track.clone())).await;
        self.state.broadcast_event(PlaybackEvent::TrackStarted {
            track_key: key.clone(),
        });

        let entry = match self.history.get_entry(&track).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Failed to read history for {}: {}", key, e);
                None
            }
        };

        let resume_ms = entry
            .as_ref()
            .filter(|entry| !entry.is_finished())
            .map(|entry| entry.position_ms.max(0))
            .unwrap_or(0);
        let duration_ms = entry
            .as_ref()
            .map(|entry| entry.duration_ms)
            .unwrap_or(0)
            .max(to_i64(self.engine.length_ms()));

        // Touch the row now so the track shows up in "Recently played"
        if let Err(e) = self
            .history
            .save_progress(&track, resume_ms, duration_ms, true)
            .await
        {
            warn!("Failed to record start of {}: {}", key, e);
        }

        if resume_ms > 0 {
            self.schedule_restore(key, resume_ms as u64, restore_token);
        } else {
            restore_token.cancel();
        }

        Ok(())
    }

    pub async fn pause(&self) {
        self.state.set_paused(true).await;
        self.engine.pause_both();

        if let Some(track) = self.state.current_track().await {
            self.flush_progress(&track).await;
        }

        self.state.broadcast_event(PlaybackEvent::Paused);
    }

    pub async fn resume(&self) -> Result<()> {
        if self.state.current_track().await.is_none() {
            return Err(Error::Playback("Nothing to resume".to_string()));
        }

        self.state.set_paused(false).await;
        self.engine.resume_both().await?;
        self.state.broadcast_event(PlaybackEvent::Resumed);
        Ok(())
    }

    /// Stop both streams and forget the current track
    pub async fn stop(&self) {
        if let Some(track) = self.state.current_track().await {
            self.flush_progress(&track).await;
        }
        self.cancel_restore();

        self.engine.stop_both();
        self.state.replace_current_track(None).await;
        self.state.set_paused(false).await;
    }

    /// Stop playback, end background tasks and close the history store
    pub async fn shutdown(&self) {
        info!("Shutting down playback controller");
        self.shutdown.cancel();
        self.stop().await;
        self.history.close().await;
    }

    pub fn is_playing(&self) -> bool {
        self.engine.is_playing()
    }

    pub async fn is_paused(&self) -> bool {
        self.state.is_paused().await
    }

    pub fn position_ms(&self) -> u64 {
        self.engine.time_ms()
    }

    pub fn set_position_ms(&self, position_ms: u64) {
        self.engine.set_time_ms(position_ms);
    }

    pub fn duration_ms(&self) -> u64 {
        self.engine.length_ms()
    }

    pub fn volume(&self) -> u8 {
        self.engine.volume()
    }

    pub fn set_volume(&self, volume: u8) {
        self.engine.set_volume(volume);
    }

    /// Periodic, throttled progress save
    pub async fn save_current_progress(&self) {
        if self.state.is_paused().await || !self.engine.is_playing() || self.restore_pending() {
            return;
        }
        let Some(track) = self.state.current_track().await else {
            return;
        };

        let position = to_i64(self.engine.time_ms());
        let duration = to_i64(self.engine.length_ms());
        if let Err(e) = self
            .history
            .save_progress(&track, position, duration, false)
            .await
        {
            warn!("Failed to save progress for {}: {}", track.key(), e);
        }
    }

    async fn flush_progress(&self, track: &Track) {
        // Position is meaningless until the saved one has been applied
        if self.restore_pending() {
            debug!("Skipping progress flush for {}, resume pending", track.key());
            return;
        }

        let position = to_i64(self.engine.time_ms());
        let duration = to_i64(self.engine.length_ms());
        if let Err(e) = self
            .history
            .save_progress(track, position, duration, true)
            .await
        {
            warn!("Failed to flush progress for {}: {}", track.key(), e);
        }
    }

    async fn handle_end_reached(&self) {
        self.cancel_restore();

        let Some(track) = self.state.current_track().await else {
            return;
        };
        let key = track.key();

        let mut duration = to_i64(self.engine.length_ms());
        if duration == 0 {
            duration = to_i64(self.engine.time_ms());
        }

        if let Err(e) = self
            .history
            .mark_track_finished(&track, duration, duration)
            .await
        {
            warn!("Failed to record finish of {}: {}", key, e);
        }

        info!("Track finished: {}", key);
        self.state
            .broadcast_event(PlaybackEvent::TrackFinished { track_key: key });
    }

    async fn handle_player_error(&self, reason: String) {
        let Some(track) = self.state.current_track().await else {
            return;
        };
        let key = track.key();
        warn!("Playback error on {}: {}", key, reason);

        if !track.downloaded {
            self.resolver.invalidate(&key);
        }
        self.state.broadcast_event(PlaybackEvent::PlaybackFailed {
            track_key: key,
            reason,
        });
    }

    async fn player_event_handler(&self, mut events: broadcast::Receiver<PlayerEvent>) {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(PlayerEvent::EndReached) => self.handle_end_reached().await,
                Ok(PlayerEvent::Error(reason)) => self.handle_player_error(reason).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} player events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Player event handler stopped");
    }

    async fn progress_ticker(&self) {
        let mut tick = tokio::time::interval(self.settings.progress_interval());
        // First tick completes immediately
        tick.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tick.tick() => self.save_current_progress().await,
            }
        }
        debug!("Progress ticker stopped");
    }

    fn restore_slot(&self) -> MutexGuard<'_, CancellationToken> {
        self.restore.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn restore_pending(&self) -> bool {
        !self.restore_slot().is_cancelled()
    }

    fn cancel_restore(&self) {
        self.restore_slot().cancel();
    }

    /// Cancel any pending restore and install a fresh token
    fn replace_restore_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = std::mem::replace(&mut *self.restore_slot(), token.clone());
        previous.cancel();
        token
    }

    fn schedule_restore(&self, key: TrackKey, position_ms: u64, token: CancellationToken) {
        let engine = Arc::clone(&self.engine);
        let state = Arc::clone(&self.state);
        let delay = self.settings.resume_settle_delay();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            if state.current_key().await.as_ref() == Some(&key) && !token.is_cancelled() {
                engine.set_time_ms(position_ms);
                info!("Resumed {} at {}ms", key, position_ms);
                state.broadcast_event(PlaybackEvent::PositionRestored {
                    track_key: key,
                    position_ms,
                });
            }
            token.cancel();
        });
    }

    fn report_failure(&self, key: &TrackKey, error: &Error) {
        self.state.broadcast_event(PlaybackEvent::PlaybackFailed {
            track_key: key.clone(),
            reason: error.to_string(),
        });
    }
}
