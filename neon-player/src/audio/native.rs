//! Native media backend
//!
//! Each `play` starts a session: one decode thread running until the media
//! ends or the session is stopped. Output players push resampled audio into
//! the device ring buffer and let the device set the pace. Capture players
//! have no device, so they pace themselves against the wall clock and hand
//! S16LE bytes to the audio callback.

use crate::audio::backend::{
    Media, MediaBackend, MediaLocation, MediaPlayer, PcmCallback, PcmFormat, PlayerEvent,
    PlayerRole,
};
use crate::audio::decoder::StreamDecoder;
use crate::audio::output::{AudioOutput, OutputSink};
use crate::audio::resampler::{remap_channels, StreamResampler};
use crate::error::{Error, Result};
use ringbuf::traits::{Observer, Producer, Split};
use ringbuf::{HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Seconds of audio queued ahead of the device
const OUTPUT_BUFFER_SECS: f32 = 0.5;

/// Sleep granularity of idle workers
const IDLE_POLL: Duration = Duration::from_millis(10);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Backend decoding with symphonia and playing through cpal
pub struct NativeBackend {
    device_name: Option<String>,
}

impl NativeBackend {
    /// Check that an output device exists
    ///
    /// The device stream itself is opened on first playback.
    pub fn new(device_name: Option<String>) -> Result<Self> {
        let found = AudioOutput::probe(device_name.as_deref())?;
        info!("Native media backend ready (output device: {})", found);
        Ok(Self { device_name })
    }
}

impl MediaBackend for NativeBackend {
    fn media_new(&self, source: &str) -> Result<Media> {
        let media = Media::parse(source)?;
        if let MediaLocation::File(path) = media.location() {
            if !path.is_file() {
                return Err(Error::Engine(format!(
                    "Media file not found: {}",
                    path.display()
                )));
            }
        }
        Ok(media)
    }

    fn player_new(&self, role: PlayerRole) -> Result<Arc<dyn MediaPlayer>> {
        Ok(Arc::new(NativePlayer::new(role, self.device_name.clone())))
    }
}

/// Flags shared between a player and one decode thread
struct Session {
    paused: AtomicBool,
    stopped: AtomicBool,
    finished: AtomicBool,
    seek_to: Mutex<Option<u64>>,
    /// Capture: current position. Output: position at the last install or flush.
    position_ms: AtomicU64,
    length_ms: u64,
}

impl Session {
    fn new(length_ms: u64) -> Self {
        Self {
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            seek_to: Mutex::new(None),
            position_ms: AtomicU64::new(0),
            length_ms,
        }
    }

    fn is_over(&self) -> bool {
        self.stopped.load(Ordering::Acquire) || self.finished.load(Ordering::Acquire)
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn pending_seek(&self) -> Option<u64> {
        *lock(&self.seek_to)
    }

    fn take_seek(&self) -> Option<u64> {
        lock(&self.seek_to).take()
    }
}

struct PlayerInner {
    role: PlayerRole,
    device_name: Option<String>,
    media: Mutex<Option<Media>>,
    /// Bumped by `set_media` and `stop`; a start opened under an older value is dropped
    generation: AtomicU64,
    session: Mutex<Option<Arc<Session>>>,
    output: Mutex<Option<AudioOutput>>,
    volume: Arc<Mutex<f32>>,
    format: Mutex<PcmFormat>,
    callback: RwLock<Option<PcmCallback>>,
    events: broadcast::Sender<PlayerEvent>,
}

impl PlayerInner {
    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    fn output_sink(&self) -> Option<Arc<OutputSink>> {
        lock(&self.output).as_ref().map(AudioOutput::sink)
    }

    fn ensure_output(&self) -> Result<Arc<OutputSink>> {
        let mut output = lock(&self.output);
        if let Some(existing) = output.as_ref() {
            return Ok(existing.sink());
        }
        let opened = AudioOutput::open(self.device_name.clone(), Arc::clone(&self.volume))?;
        let sink = opened.sink();
        *output = Some(opened);
        Ok(sink)
    }

    fn current_session(&self) -> Option<Arc<Session>> {
        lock(&self.session).clone()
    }

    fn stop_session(&self) {
        if let Some(session) = lock(&self.session).take() {
            session.stopped.store(true, Ordering::Release);
        }
        if let Some(sink) = self.output_sink() {
            sink.uninstall();
        }
    }
}

/// Player backed by a decode thread per session
pub struct NativePlayer {
    inner: Arc<PlayerInner>,
}

impl NativePlayer {
    pub fn new(role: PlayerRole, device_name: Option<String>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(PlayerInner {
                role,
                device_name,
                media: Mutex::new(None),
                generation: AtomicU64::new(0),
                session: Mutex::new(None),
                output: Mutex::new(None),
                volume: Arc::new(Mutex::new(1.0)),
                format: Mutex::new(PcmFormat::default()),
                callback: RwLock::new(None),
                events,
            }),
        }
    }

    fn start_session(&self, media: &Media, generation: u64) -> Result<()> {
        // Opening can block on a download, keep the session lock free meanwhile
        let decoder = StreamDecoder::open(media.location())?;
        let session = Arc::new(Session::new(decoder.duration_ms()));
        let inner = Arc::clone(&self.inner);
        let sink = match self.inner.role {
            PlayerRole::Output => Some(self.inner.ensure_output()?),
            PlayerRole::Capture => None,
        };

        // Held until the new session is installed, so a concurrent set_media
        // either discards this start or stops the installed session
        let mut slot = lock(&self.inner.session);
        if self.inner.generation.load(Ordering::Acquire) != generation {
            debug!("Media changed while opening {:?}, dropping start", media.location());
            return Err(Error::Engine("Media changed while starting".to_string()));
        }
        if let Some(previous) = slot.take() {
            previous.stopped.store(true, Ordering::Release);
        }

        let worker_session = Arc::clone(&session);
        match sink {
            Some(sink) => {
                let capacity = (sink.sample_rate() as f32
                    * f32::from(sink.channels())
                    * OUTPUT_BUFFER_SECS) as usize;
                let (producer, consumer) = HeapRb::<f32>::new(capacity.max(4096)).split();
                sink.install(consumer);

                thread::Builder::new()
                    .name("neon-decode-out".to_string())
                    .spawn(move || run_output(inner, worker_session, decoder, sink, producer))?;
            }
            None => {
                let format = *lock(&self.inner.format);
                thread::Builder::new()
                    .name("neon-decode-capture".to_string())
                    .spawn(move || run_capture(inner, worker_session, decoder, format))?;
            }
        }

        *slot = Some(session);
        Ok(())
    }
}

impl MediaPlayer for NativePlayer {
    fn set_media(&self, media: Media) {
        {
            let mut slot = lock(&self.inner.media);
            *slot = Some(media);
            self.inner.generation.fetch_add(1, Ordering::AcqRel);
        }
        self.inner.stop_session();
    }

    fn play(&self) -> Result<()> {
        if let Some(session) = self.inner.current_session() {
            if !session.is_over() {
                session.paused.store(false, Ordering::Release);
                if let Some(sink) = self.inner.output_sink() {
                    sink.set_paused(false);
                }
                return Ok(());
            }
        }

        let (media, generation) = {
            let slot = lock(&self.inner.media);
            (slot.clone(), self.inner.generation.load(Ordering::Acquire))
        };
        let media = media.ok_or_else(|| Error::Engine("No media loaded".to_string()))?;

        debug!("Starting {:?} session for {:?}", self.inner.role, media.location());
        self.start_session(&media, generation)
    }

    fn pause(&self) {
        if let Some(session) = self.inner.current_session() {
            session.paused.store(true, Ordering::Release);
        }
        if let Some(sink) = self.inner.output_sink() {
            sink.set_paused(true);
        }
    }

    fn stop(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.inner.stop_session();
    }

    fn is_playing(&self) -> bool {
        self.inner
            .current_session()
            .map(|s| !s.is_over() && !s.is_paused())
            .unwrap_or(false)
    }

    fn time_ms(&self) -> u64 {
        let Some(session) = self.inner.current_session() else {
            return 0;
        };
        if let Some(target) = session.pending_seek() {
            return target;
        }

        let base = session.position_ms.load(Ordering::Acquire);
        match (self.inner.role, self.inner.output_sink()) {
            (PlayerRole::Output, Some(sink)) => base + sink.played_ms(),
            _ => base,
        }
    }

    fn set_time_ms(&self, position_ms: u64) {
        if let Some(session) = self.inner.current_session() {
            *lock(&session.seek_to) = Some(position_ms);
        }
    }

    fn length_ms(&self) -> u64 {
        self.inner
            .current_session()
            .map(|s| s.length_ms)
            .unwrap_or(0)
    }

    fn volume(&self) -> u8 {
        (*lock(&self.inner.volume) * 100.0).round() as u8
    }

    fn set_volume(&self, volume: u8) {
        *lock(&self.inner.volume) = f32::from(volume.min(100)) / 100.0;
    }

    fn set_audio_format(&self, format: PcmFormat) {
        *lock(&self.inner.format) = format;
    }

    fn set_audio_callback(&self, callback: Option<PcmCallback>) {
        let mut slot = self
            .inner
            .callback
            .write()
            .unwrap_or_else(|e| e.into_inner());
        *slot = callback;
    }

    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.inner.events.subscribe()
    }
}

impl Drop for NativePlayer {
    fn drop(&mut self) {
        self.inner.stop_session();
    }
}

/// Decode, convert and queue audio for the device until the media ends
fn run_output(
    inner: Arc<PlayerInner>,
    session: Arc<Session>,
    mut decoder: StreamDecoder,
    sink: Arc<OutputSink>,
    mut producer: HeapProd<f32>,
) {
    let channels = sink.channels().max(1) as usize;
    let mut resampler = match StreamResampler::new(decoder.sample_rate(), sink.sample_rate(), channels) {
        Ok(resampler) => resampler,
        Err(e) => {
            fail_session(&inner, &session, e);
            return;
        }
    };
    if !resampler.is_passthrough() {
        debug!("Output resampling {}Hz -> {}Hz", decoder.sample_rate(), sink.sample_rate());
    }

    'decode: loop {
        if session.is_stopped() {
            return;
        }

        if let Some(target) = session.take_seek() {
            match decoder.seek(target) {
                Ok(actual) => {
                    resampler.reset();
                    sink.flush();
                    session.position_ms.store(actual, Ordering::Release);
                }
                Err(e) => warn!("Seek failed: {}", e),
            }
        }

        if sink.take_error() {
            inner.emit(PlayerEvent::Error("Audio device stream error".to_string()));
        }

        if session.is_paused() {
            thread::sleep(IDLE_POLL);
            continue;
        }

        let chunk = match decoder.next_chunk() {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                if producer.occupied_len() == 0 {
                    session.finished.store(true, Ordering::Release);
                    debug!("Output session reached end of media");
                    inner.emit(PlayerEvent::EndReached);
                    return;
                }
                thread::sleep(IDLE_POLL);
                continue;
            }
            Err(e) => {
                fail_session(&inner, &session, e);
                return;
            }
        };

        let remapped = remap_channels(&chunk, decoder.channels(), channels);
        let samples = match resampler.process(&remapped) {
            Ok(samples) => samples,
            Err(e) => {
                fail_session(&inner, &session, e);
                return;
            }
        };

        let mut offset = 0;
        while offset < samples.len() {
            if session.is_stopped() {
                return;
            }
            if session.pending_seek().is_some() {
                continue 'decode;
            }

            let vacant = producer.vacant_len() / channels * channels;
            if vacant == 0 || session.is_paused() {
                thread::sleep(IDLE_POLL);
                continue;
            }

            let end = (offset + vacant).min(samples.len());
            offset += producer.push_slice(&samples[offset..end]);
        }
    }
}

/// Decode at real-time pace and deliver S16LE PCM to the audio callback
fn run_capture(
    inner: Arc<PlayerInner>,
    session: Arc<Session>,
    mut decoder: StreamDecoder,
    format: PcmFormat,
) {
    let channels = format.channels.max(1) as usize;
    let sample_rate = format.sample_rate.max(1);
    let mut resampler = match StreamResampler::new(decoder.sample_rate(), sample_rate, channels) {
        Ok(resampler) => resampler,
        Err(e) => {
            fail_session(&inner, &session, e);
            return;
        }
    };
    if !resampler.is_passthrough() {
        debug!("Capture resampling {}Hz -> {}Hz", decoder.sample_rate(), sample_rate);
    }

    // Wall-clock anchor for pacing: when `anchor` was taken we were at `anchor_ms`
    let mut anchor = Instant::now();
    let mut anchor_ms = 0.0f64;
    let mut position_ms = 0.0f64;
    let mut reanchor = false;

    loop {
        if session.is_stopped() {
            return;
        }

        if let Some(target) = session.take_seek() {
            match decoder.seek(target) {
                Ok(actual) => {
                    resampler.reset();
                    position_ms = actual as f64;
                    session.position_ms.store(actual, Ordering::Release);
                    reanchor = true;
                }
                Err(e) => warn!("Seek failed: {}", e),
            }
        }

        if session.is_paused() {
            reanchor = true;
            thread::sleep(IDLE_POLL);
            continue;
        }

        if reanchor {
            anchor = Instant::now();
            anchor_ms = position_ms;
            reanchor = false;
        }

        let chunk = match decoder.next_chunk() {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                session.finished.store(true, Ordering::Release);
                debug!("Capture session reached end of media");
                inner.emit(PlayerEvent::EndReached);
                return;
            }
            Err(e) => {
                fail_session(&inner, &session, e);
                return;
            }
        };

        let remapped = remap_channels(&chunk, decoder.channels(), channels);
        let samples = match resampler.process(&remapped) {
            Ok(samples) => samples,
            Err(e) => {
                fail_session(&inner, &session, e);
                return;
            }
        };

        let frames = samples.len() / channels;
        if frames > 0 {
            let bytes = to_s16le(&samples[..frames * channels]);
            let callback = inner
                .callback
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            if let Some(callback) = callback {
                callback(&bytes, frames);
            }
        }

        position_ms += frames as f64 * 1000.0 / f64::from(sample_rate);
        session
            .position_ms
            .store(position_ms as u64, Ordering::Release);

        let due = anchor + Duration::from_secs_f64(((position_ms - anchor_ms) / 1000.0).max(0.0));
        loop {
            let now = Instant::now();
            if now >= due
                || session.is_stopped()
                || session.is_paused()
                || session.pending_seek().is_some()
            {
                break;
            }
            thread::sleep((due - now).min(IDLE_POLL * 2));
        }
    }
}

fn fail_session(inner: &PlayerInner, session: &Session, error: Error) {
    warn!("Playback session failed: {}", error);
    session.finished.store(true, Ordering::Release);
    inner.emit(PlayerEvent::Error(error.to_string()));
}

/// Interleaved f32 to signed 16-bit little-endian bytes
fn to_s16le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * PcmFormat::BYTES_PER_SAMPLE);
    for sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_tone(path: &Path, sample_rate: u32, seconds: f32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..(sample_rate as f32 * seconds) as usize {
            let t = i as f32 / sample_rate as f32;
            writer
                .write_sample(((2.0 * std::f32::consts::PI * 1000.0 * t).sin() * 16_000.0) as i16)
                .unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_to_s16le() {
        assert_eq!(to_s16le(&[0.0, 1.0, -1.0, 2.0]), vec![0, 0, 0xff, 0x7f, 0x01, 0x80, 0xff, 0x7f]);
    }

    #[test]
    fn test_capture_player_delivers_pcm_until_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_tone(&path, 22_050, 0.3);

        let player = NativePlayer::new(PlayerRole::Capture, None);
        player.set_audio_format(PcmFormat::new(44_100, 2));

        let received = Arc::new(Mutex::new((0usize, 0usize)));
        let sink = Arc::clone(&received);
        player.set_audio_callback(Some(Arc::new(move |bytes: &[u8], frames: usize| {
            let mut totals = sink.lock().unwrap();
            totals.0 += bytes.len();
            totals.1 += frames;
        })));

        let mut events = player.subscribe();
        player
            .set_media(Media::parse(path.to_str().unwrap()).unwrap());
        player.play().unwrap();
        assert!(player.is_playing());
        assert_eq!(player.length_ms(), 300);

        let deadline = Instant::now() + Duration::from_secs(5);
        let event = loop {
            match events.try_recv() {
                Ok(event) => break event,
                Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                Err(e) => panic!("no player event: {:?}", e),
            }
        };
        assert_eq!(event, PlayerEvent::EndReached);
        assert!(!player.is_playing());

        let (bytes, frames) = *received.lock().unwrap();
        assert_eq!(bytes, frames * 4);
        // Up to one resampler chunk stays buffered at the end
        assert!(frames > 44_100 * 3 / 10 - 2_100, "got {} frames", frames);
    }

    #[test]
    fn test_start_dropped_when_media_changes_while_opening() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.wav");
        let second = dir.path().join("second.wav");
        write_tone(&first, 22_050, 0.3);
        write_tone(&second, 22_050, 0.5);

        let player = NativePlayer::new(PlayerRole::Capture, None);
        let media = Media::parse(first.to_str().unwrap()).unwrap();
        player.set_media(media.clone());
        let opened_under = player.inner.generation.load(Ordering::Acquire);

        // set_media lands while the first start is still opening
        player.set_media(Media::parse(second.to_str().unwrap()).unwrap());

        assert!(matches!(
            player.start_session(&media, opened_under),
            Err(Error::Engine(_))
        ));
        assert!(player.inner.current_session().is_none());

        player.play().unwrap();
        assert_eq!(player.length_ms(), 500);
        player.stop();
    }

    #[test]
    fn test_stop_drops_start_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_tone(&path, 22_050, 0.3);

        let player = NativePlayer::new(PlayerRole::Capture, None);
        let media = Media::parse(path.to_str().unwrap()).unwrap();
        player.set_media(media.clone());
        let opened_under = player.inner.generation.load(Ordering::Acquire);

        player.stop();

        assert!(player.start_session(&media, opened_under).is_err());
        assert!(!player.is_playing());
    }

    #[test]
    fn test_play_without_media_fails() {
        let player = NativePlayer::new(PlayerRole::Capture, None);
        assert!(matches!(player.play(), Err(Error::Engine(_))));
        assert_eq!(player.time_ms(), 0);
    }

    #[test]
    fn test_volume_is_percent() {
        let player = NativePlayer::new(PlayerRole::Output, None);
        player.set_volume(40);
        assert_eq!(player.volume(), 40);
        player.set_volume(250);
        assert_eq!(player.volume(), 100);
    }
}
