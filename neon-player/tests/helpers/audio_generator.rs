//! PCM and WAV generation for analyzer and decoder tests

use hound::{SampleFormat, WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::Path;

/// Interleaved S16LE sine, same signal on every channel
pub fn sine_pcm(frequency: f32, sample_rate: u32, channels: u16, frames: usize, amplitude: f32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frames * channels as usize * 2);
    for n in 0..frames {
        let t = n as f32 / sample_rate as f32;
        let value = (amplitude * (2.0 * PI * frequency * t).sin() * i16::MAX as f32) as i16;
        for _ in 0..channels {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }
    bytes
}

pub fn silence_pcm(channels: u16, frames: usize) -> Vec<u8> {
    vec![0u8; frames * channels as usize * 2]
}

/// 16-bit WAV sine file
pub fn write_sine_wav<P: AsRef<Path>>(
    path: P,
    frequency: f32,
    sample_rate: u32,
    channels: u16,
    duration_ms: u64,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    let frames = sample_rate as u64 * duration_ms / 1000;
    for n in 0..frames {
        let t = n as f32 / sample_rate as f32;
        let value = (0.5 * (2.0 * PI * frequency * t).sin() * i16::MAX as f32) as i16;
        for _ in 0..channels {
            writer.write_sample(value)?;
        }
    }
    writer.finalize()
}
