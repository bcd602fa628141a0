//! Events published to the UI shell
//!
//! The controller never decides what happens after a track ends; it reports
//! and lets the shell advance, repeat or stop.

use neon_common::TrackKey;

/// Playback notifications broadcast by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Both streams were started for a track
    TrackStarted { track_key: TrackKey },

    /// A saved resume position was applied
    PositionRestored { track_key: TrackKey, position_ms: u64 },

    /// Playback was paused
    Paused,

    /// Playback was resumed
    Resumed,

    /// The audible stream reached the end of the track
    TrackFinished { track_key: TrackKey },

    /// The media framework reported an error for the current track
    PlaybackFailed { track_key: TrackKey, reason: String },
}
