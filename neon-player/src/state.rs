//! Shared playback state
//!
//! What the controller is playing and whether it is paused, plus the event
//! channel the UI shell subscribes to.

use crate::events::PlaybackEvent;
use neon_common::{Track, TrackKey};
use tokio::sync::{broadcast, RwLock};

/// Shared state accessible by the controller and its background tasks
///
/// Uses RwLock for concurrent read access with rare writes
pub struct SharedState {
    /// Track the user asked for last (None before the first play)
    pub current_track: RwLock<Option<Track>>,

    /// Pause flag as requested by the user
    pub paused: RwLock<bool>,

    /// Event broadcaster for the UI shell
    pub event_tx: broadcast::Sender<PlaybackEvent>,
}

impl SharedState {
    /// Create new shared state with default values
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            current_track: RwLock::new(None),
            paused: RwLock::new(false),
            event_tx,
        }
    }

    /// Broadcast an event to all listeners
    pub fn broadcast_event(&self, event: PlaybackEvent) {
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.event_tx.subscribe()
    }

    pub async fn current_track(&self) -> Option<Track> {
        self.current_track.read().await.clone()
    }

    pub async fn current_key(&self) -> Option<TrackKey> {
        self.current_track.read().await.as_ref().map(Track::key)
    }

    /// Replace the current track, returning the previous one
    pub async fn replace_current_track(&self, track: Option<Track>) -> Option<Track> {
        std::mem::replace(&mut *self.current_track.write().await, track)
    }

    pub async fn is_paused(&self) -> bool {
        *self.paused.read().await
    }

    pub async fn set_paused(&self, paused: bool) {
        *self.paused.write().await = paused;
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
