//! Media framework seam
//!
//! The engine talks to players through these traits. The native backend
//! implements them on top of symphonia and cpal; tests plug in a scripted
//! fake.
//!
//! Every player is either audible ([`PlayerRole::Output`]) or a silent,
//! real-time paced decoder that hands PCM to a callback
//! ([`PlayerRole::Capture`]).

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

/// What a player does with decoded audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerRole {
    /// Sends audio to the output device
    Output,
    /// Delivers interleaved S16LE PCM to the audio callback, no sound
    Capture,
}

/// Where media bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaLocation {
    File(PathBuf),
    Url(String),
}

/// Loadable media handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    location: MediaLocation,
}

impl Media {
    /// Build a handle from a local path or a remote stream URL
    pub fn parse(source: &str) -> Result<Self> {
        let source = source.trim();
        if source.is_empty() {
            return Err(Error::Engine("empty media source".to_string()));
        }

        let lower = source.to_ascii_lowercase();
        let location = if lower.starts_with("http://") || lower.starts_with("https://") {
            MediaLocation::Url(source.to_string())
        } else {
            MediaLocation::File(PathBuf::from(source))
        };

        Ok(Self { location })
    }

    pub fn location(&self) -> &MediaLocation {
        &self.location
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.location, MediaLocation::Url(_))
    }
}

/// PCM layout requested from a capture player
///
/// Samples are always signed 16-bit little-endian, channels interleaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    pub const BYTES_PER_SAMPLE: usize = 2;

    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * Self::BYTES_PER_SAMPLE
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::new(44_100, 2)
    }
}

/// Receives `(bytes, frame_count)` on the player's decode thread
///
/// Must not block for long and must not panic.
pub type PcmCallback = Arc<dyn Fn(&[u8], usize) + Send + Sync>;

/// Notifications raised by a player
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// Media played through to its end
    EndReached,
    /// Decoding or output failed mid-stream
    Error(String),
}

/// One playback pipeline (decode plus output or capture)
///
/// Positions and lengths are in milliseconds, volume in percent (0-100).
/// `play` may block while media is opened, callers on an async runtime
/// should run it on a blocking thread.
pub trait MediaPlayer: Send + Sync {
    /// Replace the loaded media, stopping whatever was playing
    fn set_media(&self, media: Media);

    /// Start the loaded media, or resume it when paused
    fn play(&self) -> Result<()>;

    fn pause(&self);

    fn stop(&self);

    fn is_playing(&self) -> bool;

    fn time_ms(&self) -> u64;

    fn set_time_ms(&self, position_ms: u64);

    /// Media length, 0 when unknown
    fn length_ms(&self) -> u64;

    fn volume(&self) -> u8;

    fn set_volume(&self, volume: u8);

    /// PCM layout delivered to the audio callback (capture players)
    fn set_audio_format(&self, format: PcmFormat);

    /// Install or remove the PCM consumer (capture players)
    fn set_audio_callback(&self, callback: Option<PcmCallback>);

    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent>;
}

/// Factory for media handles and players sharing one framework instance
pub trait MediaBackend: Send + Sync {
    /// Validate a source and produce a media handle
    fn media_new(&self, source: &str) -> Result<Media>;

    fn player_new(&self, role: PlayerRole) -> Result<Arc<dyn MediaPlayer>>;
}
