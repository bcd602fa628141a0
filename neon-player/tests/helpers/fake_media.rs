//! Scriptable media framework
//!
//! Players record every call, report whatever position a test sets and let
//! the test fire PCM callbacks and player events by hand.

use neon_player::audio::{
    Media, MediaBackend, MediaLocation, MediaPlayer, PcmCallback, PcmFormat, PlayerEvent,
    PlayerRole,
};
use neon_player::Error;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub struct FakePlayer {
    pub role: PlayerRole,
    calls: Mutex<Vec<String>>,
    media: Mutex<Option<Media>>,
    playing: AtomicBool,
    position_ms: AtomicU64,
    length_ms: AtomicU64,
    volume: AtomicU8,
    format: Mutex<PcmFormat>,
    callback: Mutex<Option<PcmCallback>>,
    events: broadcast::Sender<PlayerEvent>,
    fail_play: AtomicBool,
    play_delay_ms: AtomicU64,
    media_generation: AtomicU64,
}

impl FakePlayer {
    pub fn new(role: PlayerRole) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            role,
            calls: Mutex::new(Vec::new()),
            media: Mutex::new(None),
            playing: AtomicBool::new(false),
            position_ms: AtomicU64::new(0),
            length_ms: AtomicU64::new(0),
            volume: AtomicU8::new(100),
            format: Mutex::new(PcmFormat::default()),
            callback: Mutex::new(None),
            events,
            fail_play: AtomicBool::new(false),
            play_delay_ms: AtomicU64::new(0),
            media_generation: AtomicU64::new(0),
        }
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Path or URL of the loaded media
    pub fn media_source(&self) -> Option<String> {
        self.media.lock().unwrap().as_ref().map(|media| match media.location() {
            MediaLocation::File(path) => path.to_string_lossy().into_owned(),
            MediaLocation::Url(url) => url.clone(),
        })
    }

    pub fn is_playing_now(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn set_length(&self, length_ms: u64) {
        self.length_ms.store(length_ms, Ordering::SeqCst);
    }

    /// Move the playhead without recording a seek
    pub fn advance_to(&self, position_ms: u64) {
        self.position_ms.store(position_ms, Ordering::SeqCst);
    }

    pub fn set_fail_play(&self, fail: bool) {
        self.fail_play.store(fail, Ordering::SeqCst);
    }

    /// Make `play` block this long, like opening a remote stream
    pub fn set_play_delay(&self, delay: Duration) {
        self.play_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    pub fn has_callback(&self) -> bool {
        self.callback.lock().unwrap().is_some()
    }

    pub fn audio_format(&self) -> PcmFormat {
        *self.format.lock().unwrap()
    }

    /// Deliver bytes to the installed PCM callback; false when none is installed
    pub fn feed_pcm(&self, bytes: &[u8]) -> bool {
        let callback = self.callback.lock().unwrap().clone();
        let frames = bytes.len() / self.audio_format().bytes_per_frame();
        match callback {
            Some(callback) => {
                callback(bytes, frames);
                true
            }
            None => false,
        }
    }
}

impl MediaPlayer for FakePlayer {
    fn set_media(&self, media: Media) {
        self.record("set_media");
        self.playing.store(false, Ordering::SeqCst);
        self.position_ms.store(0, Ordering::SeqCst);
        *self.media.lock().unwrap() = Some(media);
        self.media_generation.fetch_add(1, Ordering::SeqCst);
    }

    fn play(&self) -> neon_player::Result<()> {
        self.record("play");
        let generation = self.media_generation.load(Ordering::SeqCst);
        let delay = self.play_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.fail_play.load(Ordering::SeqCst) {
            return Err(Error::Engine("scripted play failure".to_string()));
        }
        if self.media.lock().unwrap().is_none() {
            return Err(Error::Engine("No media loaded".to_string()));
        }
        if self.media_generation.load(Ordering::SeqCst) != generation {
            return Err(Error::Engine("Media changed while starting".to_string()));
        }
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) {
        self.record("pause");
        self.playing.store(false, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.record("stop");
        self.media_generation.fetch_add(1, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);
        self.position_ms.store(0, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn time_ms(&self) -> u64 {
        self.position_ms.load(Ordering::SeqCst)
    }

    fn set_time_ms(&self, position_ms: u64) {
        self.record(format!("seek:{}", position_ms));
        self.position_ms.store(position_ms, Ordering::SeqCst);
    }

    fn length_ms(&self) -> u64 {
        self.length_ms.load(Ordering::SeqCst)
    }

    fn volume(&self) -> u8 {
        self.volume.load(Ordering::SeqCst)
    }

    fn set_volume(&self, volume: u8) {
        self.record(format!("volume:{}", volume));
        self.volume.store(volume, Ordering::SeqCst);
    }

    fn set_audio_format(&self, format: PcmFormat) {
        *self.format.lock().unwrap() = format;
    }

    fn set_audio_callback(&self, callback: Option<PcmCallback>) {
        *self.callback.lock().unwrap() = callback;
    }

    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }
}

/// Backend handing out one audible and one capture fake player
pub struct FakeBackend {
    pub playback: Arc<FakePlayer>,
    pub analysis: Arc<FakePlayer>,
    rejected: Mutex<HashSet<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            playback: Arc::new(FakePlayer::new(PlayerRole::Output)),
            analysis: Arc::new(FakePlayer::new(PlayerRole::Capture)),
            rejected: Mutex::new(HashSet::new()),
        }
    }

    /// Make `media_new` fail for this source
    pub fn reject(&self, source: &str) {
        self.rejected.lock().unwrap().insert(source.to_string());
    }
}

impl MediaBackend for FakeBackend {
    fn media_new(&self, source: &str) -> neon_player::Result<Media> {
        if self.rejected.lock().unwrap().contains(source) {
            return Err(Error::Engine(format!("Cannot open {}", source)));
        }
        Media::parse(source)
    }

    fn player_new(&self, role: PlayerRole) -> neon_player::Result<Arc<dyn MediaPlayer>> {
        let player: Arc<dyn MediaPlayer> = match role {
            PlayerRole::Output => self.playback.clone(),
            PlayerRole::Capture => self.analysis.clone(),
        };
        Ok(player)
    }
}
