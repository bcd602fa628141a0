//! PCM capture and spectrum analysis
//!
//! The analysis player pushes S16LE PCM into a bounded byte ring from its
//! decode thread; the UI thread polls [`SpectrumAnalyzer::get_fft`] for a
//! normalized magnitude spectrum of the newest samples.
//!
//! Downmixing keeps the first channel of every frame rather than averaging.

use crate::audio::backend::{MediaPlayer, PcmCallback, PcmFormat};
use crate::config::AnalyzerSettings;
use realfft::RealFftPlanner;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Normalized magnitude spectrum
///
/// `frequencies[k] = k * sample_rate / n_fft` for `k` in `0..=n_fft/2`;
/// magnitudes are scaled so the loudest bin is 1 (all zeros for silence).
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub frequencies: Vec<f32>,
    pub magnitudes: Vec<f32>,
}

impl Spectrum {
    pub fn len(&self) -> usize {
        self.magnitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }

    /// Frequency of the strongest bin, `None` for silence
    pub fn peak_frequency(&self) -> Option<f32> {
        self.magnitudes
            .iter()
            .enumerate()
            .filter(|(_, magnitude)| **magnitude > 0.0)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, _)| self.frequencies[k])
    }
}

/// Bounded FIFO of raw PCM bytes, oldest bytes evicted first
struct PcmRing {
    bytes: Mutex<VecDeque<u8>>,
    capacity: usize,
    frame_bytes: usize,
}

impl PcmRing {
    fn new(capacity: usize, frame_bytes: usize) -> Self {
        let frame_bytes = frame_bytes.max(1);
        let capacity = capacity / frame_bytes * frame_bytes;
        Self {
            bytes: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            frame_bytes,
        }
    }

    /// Append `frames` frames from `data`, truncating to whole frames `data` holds
    fn push(&self, data: &[u8], frames: usize) {
        if data.is_empty() || frames == 0 {
            return;
        }

        let size = frames.saturating_mul(self.frame_bytes).min(data.len()) / self.frame_bytes
            * self.frame_bytes;
        if size == 0 {
            return;
        }
        let mut ring = lock(&self.bytes);
        ring.extend(&data[..size]);
        if ring.len() > self.capacity {
            let excess = ring.len() - self.capacity;
            ring.drain(..excess);
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        let ring = lock(&self.bytes);
        let (front, back) = ring.as_slices();
        [front, back].concat()
    }

    fn len(&self) -> usize {
        lock(&self.bytes).len()
    }

    fn clear(&self) {
        lock(&self.bytes).clear();
    }
}

/// Capture buffer plus FFT over the most recent samples
pub struct SpectrumAnalyzer {
    format: PcmFormat,
    ring: Arc<PcmRing>,
    samples_per_read: usize,
    min_fft_size: usize,
    planner: Mutex<RealFftPlanner<f32>>,
    attached: Mutex<Option<Arc<dyn MediaPlayer>>>,
}

impl SpectrumAnalyzer {
    pub fn new(settings: &AnalyzerSettings) -> Self {
        let format = PcmFormat::new(settings.sample_rate.max(1), settings.channels.max(1));
        let capacity = (f64::from(format.sample_rate)
            * format.bytes_per_frame() as f64
            * f64::from(settings.buffer_duration_secs.max(0.0))) as usize;

        debug!(
            "Spectrum analyzer: {}Hz x{} ch, {} byte ring",
            format.sample_rate, format.channels, capacity
        );

        Self {
            format,
            ring: Arc::new(PcmRing::new(capacity, format.bytes_per_frame())),
            samples_per_read: settings.samples_per_read.max(2),
            min_fft_size: settings.min_fft_size.max(2),
            planner: Mutex::new(RealFftPlanner::new()),
            attached: Mutex::new(None),
        }
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Most bytes the ring retains
    pub fn capacity_bytes(&self) -> usize {
        self.ring.capacity
    }

    pub fn available_bytes(&self) -> usize {
        self.ring.len()
    }

    pub fn clear_buffer(&self) {
        self.ring.clear();
    }

    /// PCM callback feeding this analyzer
    ///
    /// The closure never unwinds into the caller's decode thread.
    pub fn callback(&self) -> PcmCallback {
        let ring = Arc::clone(&self.ring);
        Arc::new(move |data: &[u8], frames: usize| {
            if std::panic::catch_unwind(AssertUnwindSafe(|| ring.push(data, frames))).is_err() {
                warn!("PCM capture callback panicked, block dropped");
            }
        })
    }

    /// Append PCM directly, as the callback does
    pub fn push_pcm(&self, data: &[u8], frames: usize) {
        self.ring.push(data, frames);
    }

    /// Configure a capture player and route its PCM here
    ///
    /// A previously attached player is detached first.
    pub fn attach(&self, player: Arc<dyn MediaPlayer>) {
        self.detach();
        player.set_audio_format(self.format);
        player.set_audio_callback(Some(self.callback()));
        *lock(&self.attached) = Some(player);
    }

    /// Remove the callback from the attached player, if any
    pub fn detach(&self) {
        if let Some(player) = lock(&self.attached).take() {
            player.set_audio_callback(None);
        }
    }

    /// Spectrum of the newest buffered samples
    ///
    /// `None` until at least `min_fft_size` mono samples are buffered, or when
    /// the even window length falls below that minimum.
    pub fn get_fft(&self) -> Option<Spectrum> {
        let bytes = self.ring.snapshot();
        if bytes.is_empty() {
            return None;
        }

        let samples = to_mono(&bytes, self.format.channels as usize);
        if samples.len() < self.min_fft_size {
            return None;
        }

        let n_fft = fft_size(self.samples_per_read, samples.len());
        if n_fft < self.min_fft_size {
            return None;
        }
        let tail = &samples[samples.len() - n_fft..];
        let window = hann_window(n_fft);

        let fft = lock(&self.planner).plan_fft_forward(n_fft);
        let mut input = fft.make_input_vec();
        for ((slot, sample), w) in input.iter_mut().zip(tail).zip(&window) {
            *slot = sample * w;
        }
        let mut output = fft.make_output_vec();
        if let Err(e) = fft.process(&mut input, &mut output) {
            warn!("FFT failed: {}", e);
            return None;
        }

        let mut magnitudes: Vec<f32> = output.iter().map(|c| c.norm()).collect();
        let max = magnitudes.iter().copied().fold(0.0f32, f32::max);
        if max > 0.0 {
            for magnitude in &mut magnitudes {
                *magnitude /= max;
            }
        }

        let bin_hz = self.format.sample_rate as f32 / n_fft as f32;
        let frequencies = (0..magnitudes.len()).map(|k| k as f32 * bin_hz).collect();

        Some(Spectrum {
            frequencies,
            magnitudes,
        })
    }
}

impl Drop for SpectrumAnalyzer {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Decode S16LE bytes, keeping the first channel of each frame
fn to_mono(bytes: &[u8], channels: usize) -> Vec<f32> {
    bytes
        .chunks_exact(PcmFormat::BYTES_PER_SAMPLE)
        .step_by(channels.max(1))
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

/// Window length: capped by `samples_per_read`, rounded down to even
fn fft_size(samples_per_read: usize, available: usize) -> usize {
    let n = samples_per_read.min(available);
    n - n % 2
}

/// Symmetric Hann window of length `n`
fn hann_window(n: usize) -> Vec<f32> {
    if n < 2 {
        return vec![1.0; n];
    }
    let denom = (n - 1) as f32;
    (0..n)
        .map(|k| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * k as f32 / denom).cos())
        .collect()
}
