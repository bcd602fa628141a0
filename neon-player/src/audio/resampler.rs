//! Streaming sample rate and channel conversion
//!
//! Decoded packets arrive in whatever rate and layout the file has. The
//! output device and the capture format each want one fixed layout, so every
//! chunk goes through channel remapping and then rubato.

use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

/// Input frames fed to rubato per process call
const CHUNK_FRAMES: usize = 1024;

/// Incremental resampler that buffers partial chunks between calls
pub struct StreamResampler {
    channels: usize,
    inner: Option<FastFixedIn<f32>>,
    pending: Vec<Vec<f32>>,
}

impl StreamResampler {
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self> {
        let channels = channels.max(1);

        let inner = if input_rate == output_rate {
            debug!("Sample rate already at {}Hz, skipping resample", output_rate);
            None
        } else {
            debug!(
                "Resampling from {}Hz to {}Hz ({} channels)",
                input_rate, output_rate, channels
            );
            Some(
                FastFixedIn::<f32>::new(
                    output_rate as f64 / input_rate.max(1) as f64,
                    1.0,
                    PolynomialDegree::Septic,
                    CHUNK_FRAMES,
                    channels,
                )
                .map_err(|e| Error::Decode(format!("Failed to create resampler: {}", e)))?,
            )
        };

        Ok(Self {
            channels,
            inner,
            pending: vec![Vec::new(); channels],
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Resample interleaved input, returning whatever output is ready
    ///
    /// Input that does not fill a whole rubato chunk is held for the next call.
    pub fn process(&mut self, interleaved: &[f32]) -> Result<Vec<f32>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(interleaved.to_vec());
        };

        for (pending, channel) in self
            .pending
            .iter_mut()
            .zip(deinterleave(interleaved, self.channels))
        {
            pending.extend(channel);
        }

        let mut output = vec![Vec::new(); self.channels];

        loop {
            let needed = inner.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }

            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|channel| channel.drain(..needed).collect())
                .collect();

            let resampled = inner
                .process(&chunk, None)
                .map_err(|e| Error::Decode(format!("Resampling failed: {}", e)))?;

            for (out, channel) in output.iter_mut().zip(resampled) {
                out.extend(channel);
            }
        }

        Ok(interleave(output))
    }

    /// Drop buffered input and filter state, used after a seek
    pub fn reset(&mut self) {
        for channel in &mut self.pending {
            channel.clear();
        }
        if let Some(inner) = self.inner.as_mut() {
            inner.reset();
        }
    }
}

/// Convert between channel layouts
///
/// Mono fans out to every output channel, a wider source folds down by
/// averaging, and equal layouts pass through.
pub fn remap_channels(samples: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }

    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);

    for frame in samples.chunks_exact(from) {
        if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            for ch in 0..to {
                out.push(frame[ch.min(from - 1)]);
            }
        }
    }

    out
}

/// Convert interleaved samples to planar format.
///
/// Input:  [L, R, L, R, L, R, ...]
/// Output: [[L, L, L, ...], [R, R, R, ...]]
fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let num_frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(num_frames); channels];

    for frame in samples.chunks_exact(channels) {
        for (ch, sample) in frame.iter().enumerate() {
            planar[ch].push(*sample);
        }
    }

    planar
}

/// Convert planar samples to interleaved format.
fn interleave(planar: Vec<Vec<f32>>) -> Vec<f32> {
    if planar.is_empty() {
        return Vec::new();
    }

    let num_channels = planar.len();
    let num_frames = planar[0].len();
    let mut interleaved = Vec::with_capacity(num_frames * num_channels);

    for frame_idx in 0..num_frames {
        for channel in &planar {
            interleaved.push(channel[frame_idx]);
        }
    }

    interleaved
}
