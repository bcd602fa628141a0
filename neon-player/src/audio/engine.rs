//! Media engine
//!
//! Owns the audible player and the silent analysis player and keeps them on
//! the same media. The analysis stream starts a little after the audible one
//! so the output device gets the first reads; a newer play or a pause
//! cancels a start that is still waiting, or undoes one that was already
//! opening the media when it was cancelled.

use crate::audio::backend::{Media, MediaBackend, MediaPlayer, PlayerEvent, PlayerRole};
use crate::error::{Error, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct MediaEngine {
    backend: Arc<dyn MediaBackend>,
    playback: Arc<dyn MediaPlayer>,
    analysis: Arc<dyn MediaPlayer>,
    analysis_delay: Duration,
    pending_analysis: Mutex<CancellationToken>,
}

impl MediaEngine {
    /// Create both players; a backend that cannot create them is fatal
    pub fn new(backend: Arc<dyn MediaBackend>, analysis_delay: Duration) -> Result<Self> {
        let playback = backend.player_new(PlayerRole::Output)?;
        let analysis = backend.player_new(PlayerRole::Capture)?;
        info!(
            "Media engine ready (analysis start delay {}ms)",
            analysis_delay.as_millis()
        );

        Ok(Self {
            backend,
            playback,
            analysis,
            analysis_delay,
            pending_analysis: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn playback_player(&self) -> Arc<dyn MediaPlayer> {
        Arc::clone(&self.playback)
    }

    /// Player whose PCM feeds the spectrum analyzer
    pub fn analysis_player(&self) -> Arc<dyn MediaPlayer> {
        Arc::clone(&self.analysis)
    }

    /// Create a media handle from a path or URL
    pub fn load(&self, source: &str) -> Result<Media> {
        self.backend.media_new(source)
    }

    /// Start the source on the audible player now and on the analysis player
    /// after the configured delay
    pub async fn play_both(&self, source: &str) -> Result<()> {
        let token = self.replace_pending_analysis();

        let playback_media = self.load(source)?;
        let analysis_media = playback_media.clone();

        let playback = Arc::clone(&self.playback);
        let analysis = Arc::clone(&self.analysis);
        tokio::task::spawn_blocking(move || {
            analysis.set_media(analysis_media);
            playback.set_media(playback_media);
            playback.play()
        })
        .await
        .map_err(|e| Error::Engine(format!("Playback start task failed: {}", e)))??;

        debug!("Audible stream started: {}", source);

        let playback = Arc::clone(&self.playback);
        let analysis = Arc::clone(&self.analysis);
        let delay = self.analysis_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let started = tokio::task::spawn_blocking(move || {
                let result = analysis.play();
                // Cancelled while the media was opening. A newer play has
                // replaced the media and failed this start; a pause needs
                // the session it missed paused now.
                if token.is_cancelled() {
                    if result.is_ok() && !playback.is_playing() {
                        analysis.pause();
                    }
                    return Ok(false);
                }
                result?;
                // Seeks issued before the start were dropped
                analysis.set_time_ms(playback.time_ms());
                Ok::<bool, Error>(true)
            });
            match started.await {
                Ok(Ok(true)) => debug!("Analysis stream started"),
                Ok(Ok(false)) => debug!("Analysis start cancelled while opening"),
                Ok(Err(e)) => warn!("Analysis stream failed to start: {}", e),
                Err(e) => warn!("Analysis start task failed: {}", e),
            }
        });

        Ok(())
    }

    pub fn pause_both(&self) {
        self.cancel_pending_analysis();
        self.playback.pause();
        self.analysis.pause();
    }

    /// Resume both players, realigning the analysis stream to the audible one
    pub async fn resume_both(&self) -> Result<()> {
        let playback = Arc::clone(&self.playback);
        let analysis = Arc::clone(&self.analysis);

        tokio::task::spawn_blocking(move || {
            playback.play()?;
            match analysis.play() {
                Ok(()) => analysis.set_time_ms(playback.time_ms()),
                Err(e) => warn!("Analysis stream failed to resume: {}", e),
            }
            Ok(())
        })
        .await
        .map_err(|e| Error::Engine(format!("Resume task failed: {}", e)))?
    }

    pub fn stop_both(&self) {
        self.cancel_pending_analysis();
        self.playback.stop();
        self.analysis.stop();
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_playing()
    }

    pub fn time_ms(&self) -> u64 {
        self.playback.time_ms()
    }

    /// Seek both streams
    pub fn set_time_ms(&self, position_ms: u64) {
        self.playback.set_time_ms(position_ms);
        self.analysis.set_time_ms(position_ms);
    }

    pub fn length_ms(&self) -> u64 {
        self.playback.length_ms()
    }

    pub fn volume(&self) -> u8 {
        self.playback.volume()
    }

    /// Audible player only; the analysis stream is never heard
    pub fn set_volume(&self, volume: u8) {
        self.playback.set_volume(volume.min(100));
    }

    /// End-of-media and error notifications of the audible player
    pub fn subscribe_playback_events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.playback.subscribe()
    }

    fn pending_slot(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.pending_analysis
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Cancel the previous analysis start and hand out the token for the next
    fn replace_pending_analysis(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = std::mem::replace(&mut *self.pending_slot(), token.clone());
        previous.cancel();
        token
    }

    fn cancel_pending_analysis(&self) {
        self.pending_slot().cancel();
    }
}

impl Drop for MediaEngine {
    fn drop(&mut self) {
        self.stop_both();
    }
}
